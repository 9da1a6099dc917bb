use serde::Serialize;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Branch and dirty flag for a directory, or why they could not be read
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EnrichedContext {
    pub working_dir: String,
    pub branch: Option<String>,
    pub is_dirty: Option<bool>,
    pub resolution_error: Option<String>,
}

impl EnrichedContext {
    pub fn resolved(working_dir: &str, branch: Option<String>, is_dirty: bool) -> Self {
        Self {
            working_dir: working_dir.to_string(),
            branch,
            is_dirty: Some(is_dirty),
            resolution_error: None,
        }
    }

    /// Branch known, working tree state not
    pub fn branch_only(working_dir: &str, branch: String) -> Self {
        Self {
            working_dir: working_dir.to_string(),
            branch: Some(branch),
            is_dirty: None,
            resolution_error: None,
        }
    }

    pub fn failed(working_dir: &str, reason: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.to_string(),
            branch: None,
            is_dirty: None,
            resolution_error: Some(reason.into()),
        }
    }
}

/// Looks up context for a directory. Never fails: problems are reported
/// through [`EnrichedContext::resolution_error`].
pub trait ContextEnricher {
    async fn enrich(&self, working_dir: &str) -> EnrichedContext;
}

/// Reads branch and status with `git status --porcelain=v2 --branch`.
/// When status is too slow (large worktrees), falls back to
/// `git rev-parse --abbrev-ref HEAD` for the branch alone.
pub struct GitEnricher {
    git_path: String,
    timeout: Duration,
}

enum GitFailure {
    Unavailable(std::io::Error),
    TimedOut,
}

impl GitEnricher {
    pub fn new() -> Self {
        Self {
            git_path: "git".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_git_path(mut self, path: impl Into<String>) -> Self {
        self.git_path = path.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn git(&self, working_dir: &str, args: &[&str]) -> Result<Output, GitFailure> {
        let child = Command::new(&self.git_path)
            .arg("-C")
            .arg(working_dir)
            .args(args)
            .env("GIT_OPTIONAL_LOCKS", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(GitFailure::Unavailable(e)),
            Err(_) => Err(GitFailure::TimedOut),
        }
    }

    /// Branch name alone; `None` on a detached HEAD or any failure
    async fn branch_name(&self, working_dir: &str) -> Option<String> {
        let output = self
            .git(working_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!name.is_empty() && name != "HEAD").then_some(name)
    }
}

impl Default for GitEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextEnricher for GitEnricher {
    async fn enrich(&self, working_dir: &str) -> EnrichedContext {
        if working_dir.trim().is_empty() {
            return EnrichedContext::failed(working_dir, "directory unknown");
        }

        let output = match self
            .git(working_dir, &["status", "--porcelain=v2", "--branch"])
            .await
        {
            Ok(output) => output,
            Err(GitFailure::Unavailable(e)) => {
                debug!(dir = working_dir, error = %e, "git could not be started");
                return EnrichedContext::failed(working_dir, format!("git unavailable: {}", e));
            }
            Err(GitFailure::TimedOut) => {
                debug!(dir = working_dir, "git status timed out, reading branch only");
                return match self.branch_name(working_dir).await {
                    Some(branch) => EnrichedContext::branch_only(working_dir, branch),
                    None => EnrichedContext::failed(
                        working_dir,
                        format!("git status timed out after {:?}", self.timeout),
                    ),
                };
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("git status failed")
                .to_string();
            debug!(dir = working_dir, %reason, "git status failed");
            return EnrichedContext::failed(working_dir, reason);
        }

        let (branch, is_dirty) = parse_status(&String::from_utf8_lossy(&output.stdout));
        EnrichedContext::resolved(working_dir, branch, is_dirty)
    }
}

/// Extract the branch (or `detached@<sha>`) and whether any entry is listed
fn parse_status(stdout: &str) -> (Option<String>, bool) {
    let mut head = None;
    let mut oid = None;
    let mut dirty = false;

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("# branch.head ") {
            head = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("# branch.oid ") {
            oid = Some(rest.trim());
        } else if !line.starts_with('#') && !line.trim().is_empty() {
            dirty = true;
        }
    }

    let branch = match head {
        Some("(detached)") => oid
            .filter(|sha| *sha != "(initial)")
            .map(|sha| format!("detached@{}", &sha[..sha.len().min(7)])),
        Some(name) if !name.is_empty() => Some(name.to_string()),
        _ => None,
    };

    (branch, dirty)
}
