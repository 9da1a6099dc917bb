mod client;
mod heuristics;

pub use client::TmuxClient;
pub use heuristics::{ActivityClassifier, ActivityState, TokenIndicatorClassifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable tmux pane identifier (e.g., "%12")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaneId(String);

impl PaneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// A live tmux pane as reported by `list-panes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmuxPane {
    pub id: PaneId,
    pub session_name: String,
    pub window_index: String,
    pub pane_index: String,
    /// Working directory, empty when tmux cannot resolve it
    pub current_path: String,
    /// Foreground command (e.g., "zsh", "node", "cursor-agent")
    pub current_command: String,
}

impl TmuxPane {
    /// Human-readable `session:window.pane` label
    pub fn label(&self) -> String {
        format!(
            "{}:{}.{}",
            self.session_name, self.window_index, self.pane_index
        )
    }
}

/// One pane's capture for a single poll cycle
#[derive(Debug, Clone, Serialize)]
pub struct PaneSnapshot {
    pub id: PaneId,
    pub label: String,
    pub working_dir: String,
    /// Last N rendered lines, oldest first
    pub raw_text: String,
    pub captured_at: DateTime<Utc>,
}

impl PaneSnapshot {
    pub fn from_capture(pane: &TmuxPane, raw_text: String, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: pane.id.clone(),
            label: pane.label(),
            working_dir: pane.current_path.clone(),
            raw_text,
            captured_at,
        }
    }
}

/// Produces the set of live pane snapshots for a poll cycle.
///
/// Panes that vanish or fail to capture mid-cycle are left out of the
/// result rather than failing the whole call.
pub trait PaneSource {
    async fn snapshot(&self) -> anyhow::Result<Vec<PaneSnapshot>>;
}
