use serde::Serialize;

use crate::enrich::EnrichedContext;
use crate::tracker::TransitionEvent;

/// Rendered notification text, ready for a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePayload {
    pub text: String,
}

/// Render an idle transition and its git context as a short message.
pub fn format_message(
    agent_name: &str,
    event: &TransitionEvent,
    ctx: &EnrichedContext,
) -> MessagePayload {
    let dir = if event.working_dir.trim().is_empty() {
        "unknown"
    } else {
        event.working_dir.as_str()
    };

    let branch = match (&ctx.branch, ctx.is_dirty) {
        (Some(name), Some(true)) => format!("{} (uncommitted changes)", name),
        (Some(name), _) => name.clone(),
        (None, _) => match &ctx.resolution_error {
            Some(reason) => format!("unknown ({})", reason),
            None => "unknown".to_string(),
        },
    };

    let text = format!(
        "{agent} is awaiting input in {label} ({pane})\nDirectory: {dir}\nBranch: {branch}\nIdle since {at} UTC",
        agent = agent_name,
        label = event.label,
        pane = event.pane_id,
        at = event.occurred_at.format("%H:%M:%S"),
    );

    MessagePayload { text }
}
