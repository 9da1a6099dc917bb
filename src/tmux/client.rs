use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{PaneId, PaneSnapshot, PaneSource, TmuxPane};

const LIST_PANES_FORMAT: &str = "#{pane_id}\t#{session_name}\t#{window_index}\t#{pane_index}\t#{pane_current_path}\t#{pane_current_command}";

/// Trailing non-empty lines searched by the text filter
const TEXT_FILTER_LINES: usize = 40;

/// How a listed pane gets past the filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Always,
    IfTextMatches,
    Never,
}

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
    /// Number of trailing lines to capture per pane
    lines: usize,
    /// Upper bound for any single tmux invocation
    timeout: Duration,
    /// Panes whose foreground command matches are always watched
    command_filter: Option<Regex>,
    /// Other panes are watched when their recent text matches. Agents often
    /// run as `node`, which a command filter alone cannot tell apart.
    text_filter: Option<Regex>,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
            lines: 120,
            timeout: Duration::from_secs(5),
            command_filter: None,
            text_filter: None,
        }
    }

    #[must_use]
    pub fn with_tmux_path(mut self, path: impl Into<String>) -> Self {
        self.tmux_path = path.into();
        self
    }

    #[must_use]
    pub fn with_lines(mut self, lines: usize) -> Self {
        self.lines = lines;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_command_filter(mut self, filter: Option<Regex>) -> Self {
        self.command_filter = filter;
        self
    }

    #[must_use]
    pub fn with_text_filter(mut self, filter: Option<Regex>) -> Self {
        self.text_filter = filter;
        self
    }

    /// Run tmux with a deadline; the child is killed if the deadline passes
    async fn run(&self, args: &[&str]) -> Result<Output> {
        let child = Command::new(&self.tmux_path)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        tokio::time::timeout(self.timeout, child)
            .await
            .with_context(|| format!("tmux {} timed out after {:?}", args[0], self.timeout))?
            .with_context(|| format!("Failed to execute tmux {}", args[0]))
    }

    /// List all panes across all sessions
    pub async fn list_panes(&self) -> Result<Vec<TmuxPane>> {
        let output = self
            .run(&["list-panes", "-a", "-F", LIST_PANES_FORMAT])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("no sessions") {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-panes failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_pane_line).collect())
    }

    /// Capture the last `lines` rendered lines of a pane, wrapped lines joined
    pub async fn capture_pane(&self, pane_id: &PaneId) -> Result<String> {
        let start = format!("-{}", self.lines);
        let output = self
            .run(&["capture-pane", "-p", "-J", "-t", pane_id.as_str(), "-S", start.as_str()])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux capture-pane {} failed: {}", pane_id, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// With no filters every pane is watched. Otherwise a command match
    /// admits the pane outright, and a text filter gets the final say.
    fn admission(&self, pane: &TmuxPane) -> Admission {
        let by_command = self
            .command_filter
            .as_ref()
            .map(|re| re.is_match(&pane.current_command));

        match (by_command, &self.text_filter) {
            (Some(true), _) | (None, None) => Admission::Always,
            (_, Some(_)) => Admission::IfTextMatches,
            (Some(false), None) => Admission::Never,
        }
    }

    fn text_matches(&self, text: &str) -> bool {
        let Some(re) = &self.text_filter else {
            return true;
        };
        let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(TEXT_FILTER_LINES);
        re.is_match(&lines[start..].join("\n"))
    }
}

impl PaneSource for TmuxClient {
    async fn snapshot(&self) -> Result<Vec<PaneSnapshot>> {
        let panes: Vec<(TmuxPane, Admission)> = self
            .list_panes()
            .await?
            .into_iter()
            .map(|pane| {
                let admission = self.admission(&pane);
                (pane, admission)
            })
            .filter(|(_, admission)| *admission != Admission::Never)
            .collect();

        let captures = join_all(panes.iter().map(|(pane, _)| self.capture_pane(&pane.id))).await;

        let mut snapshots = Vec::with_capacity(panes.len());
        for ((pane, admission), capture) in panes.iter().zip(captures) {
            match capture {
                Ok(text) if *admission == Admission::IfTextMatches && !self.text_matches(&text) => {
                    debug!(pane = %pane.id, "no agent text, pane skipped")
                }
                Ok(text) => snapshots.push(PaneSnapshot::from_capture(pane, text, Utc::now())),
                Err(e) => debug!(pane = %pane.id, error = %e, "capture failed, pane skipped"),
            }
        }

        Ok(snapshots)
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_pane_line(line: &str) -> Option<TmuxPane> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() != 6 || parts[0].is_empty() {
        return None;
    }

    Some(TmuxPane {
        id: PaneId::new(parts[0]),
        session_name: parts[1].to_string(),
        window_index: parts[2].to_string(),
        pane_index: parts[3].to_string(),
        current_path: parts[4].to_string(),
        current_command: parts[5].to_string(),
    })
}
