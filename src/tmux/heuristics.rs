use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Activity state of a pane, inferred from its rendered text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Agent is generating a response
    Active,
    /// Agent is showing its input box and waiting for the user
    IdleAwaitingInput,
    /// No agent UI on screen (plain shell or another program)
    NotStarted,
    /// Capture was empty or unreadable
    #[default]
    Unknown,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Active => "active",
            ActivityState::IdleAwaitingInput => "idle",
            ActivityState::NotStarted => "not_started",
            ActivityState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Strategy for turning a captured pane into an [`ActivityState`].
///
/// Implementations must be pure: the same text always yields the same state.
pub trait ActivityClassifier: Send + Sync {
    fn classify(&self, raw_text: &str) -> ActivityState;
}

/// Token counter the agent renders above its prompt while generating,
/// e.g. "1234 tokens", "1.2k tokens", "↑ 310 tokens".
static RE_TOKEN_INDICATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b\d+(?:[.,]\d+)*\s*[km]?\s*tokens?\b").unwrap());

/// Top or bottom border of a drawn box
static RE_BOX_BORDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[╭┌╰└]─{3,}").unwrap());

/// A prompt glyph just inside a box side
static RE_BOX_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[│┃|]\s*(?:>|→|❯)").unwrap());

/// Placeholder text the agent shows in an empty input box
static RE_PROMPT_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Add a follow-up|Plan, search, build anything").unwrap());

/// Non-empty lines at the bottom of the pane that decide the state.
/// Anything above is scrollback and may hold a stale token counter.
const TAIL_LINES: usize = 20;

/// Matches cursor-agent style UIs: a token counter while busy and a boxed
/// input prompt while waiting.
///
/// Only the last [`TAIL_LINES`] non-empty lines are searched. A counter
/// that scrolled above them, or a token count in the agent's own output,
/// does not keep the pane active.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenIndicatorClassifier;

impl TokenIndicatorClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ActivityClassifier for TokenIndicatorClassifier {
    fn classify(&self, raw_text: &str) -> ActivityState {
        let clean = normalize(raw_text);
        let lines: Vec<&str> = clean.lines().filter(|line| !line.trim().is_empty()).collect();
        if lines.is_empty() {
            return ActivityState::Unknown;
        }
        let tail = lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n");

        // Priority order: Active > IdleAwaitingInput > NotStarted
        if RE_TOKEN_INDICATOR.is_match(&tail) {
            return ActivityState::Active;
        }

        if is_input_prompt(&tail) {
            return ActivityState::IdleAwaitingInput;
        }

        ActivityState::NotStarted
    }
}

/// A drawn table alone is not a prompt: the box needs a prompt glyph inside
/// it, unless the placeholder text is showing.
fn is_input_prompt(tail: &str) -> bool {
    RE_PROMPT_PLACEHOLDER.is_match(tail)
        || (RE_BOX_BORDER.is_match(tail) && RE_BOX_PROMPT.is_match(tail))
}

/// Strip escape sequences and split carriage-return redraws into separate
/// lines. Control characters left over from garbled frames are dropped.
fn normalize(raw_text: &str) -> String {
    let unfolded = raw_text.replace("\r\n", "\n").replace('\r', "\n");
    strip_ansi_escapes::strip_str(&unfolded)
        .chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> ActivityState {
        TokenIndicatorClassifier::new().classify(text)
    }

    const IDLE_BOX: &str = "\
  ╭──────────────────────────────────────╮
  │ → Add a follow-up                    │
  ╰──────────────────────────────────────╯
  Claude 4 Sonnet · 12%
";

    #[test]
    fn test_detect_active() {
        let content = "Reading src/main.rs\n  ⬡ Generating.  1234 tokens\n";
        assert_eq!(classify(content), ActivityState::Active);

        let content = "Editing file\n 1.2k tokens · ctrl+c to stop";
        assert_eq!(classify(content), ActivityState::Active);
    }

    #[test]
    fn test_active_wins_over_prompt() {
        let content = format!("  ⬡ Thinking  512 tokens\n{}", IDLE_BOX);
        assert_eq!(classify(&content), ActivityState::Active);
    }

    #[test]
    fn test_active_through_ansi_sequences() {
        let content = "\x1b[2K\x1b[1G\x1b[38;5;245m  \x1b[1m98\x1b[22m tokens\x1b[0m\r\n";
        assert_eq!(classify(content), ActivityState::Active);

        let content = "\x1b]0;cursor-agent\x07\x1b[?25l 77 tokens \x1b[?25h";
        assert_eq!(classify(content), ActivityState::Active);
    }

    #[test]
    fn test_repeated_redraw_lines_count_once() {
        let content = "12 tokens\r40 tokens\r96 tokens\n12 tokens\n";
        assert_eq!(classify(content), ActivityState::Active);
    }

    #[test]
    fn test_detect_idle_prompt() {
        assert_eq!(classify(IDLE_BOX), ActivityState::IdleAwaitingInput);

        let content = "Done. Updated 3 files.\n┌────────────┐\n│ > \n└────────────┘";
        assert_eq!(classify(content), ActivityState::IdleAwaitingInput);
    }

    #[test]
    fn test_idle_prompt_with_escapes() {
        let content = "\x1b[90m╭──────────╮\x1b[0m\n\x1b[90m│\x1b[0m \x1b[1m→\x1b[0m \n\x1b[90m╰──────────╯\x1b[0m";
        assert_eq!(classify(content), ActivityState::IdleAwaitingInput);
    }

    #[test]
    fn test_stale_counter_above_prompt_is_idle() {
        let mut content = String::from("  ⬡ Generating.  1234 tokens\n");
        for i in 0..40 {
            content.push_str(&format!("  edited src/module_{}.rs\n", i));
        }
        content.push_str(IDLE_BOX);
        assert_eq!(classify(&content), ActivityState::IdleAwaitingInput);
    }

    #[test]
    fn test_counter_near_bottom_is_active() {
        let mut content = String::new();
        for i in 0..40 {
            content.push_str(&format!("  edited src/module_{}.rs\n", i));
        }
        content.push_str("  ⬡ Generating.  1234 tokens\n");
        content.push_str(IDLE_BOX);
        // blank rows below the box do not push the counter out of range
        content.push_str(&"\n".repeat(30));
        assert_eq!(classify(&content), ActivityState::Active);
    }

    #[test]
    fn test_table_output_is_not_a_prompt() {
        let content = "\
me@box:~$ psql -c 'select id, name from users'
┌────┬───────┐
│ id │ name  │
├────┼───────┤
│  1 │ alice │
└────┴───────┘
me@box:~$ ";
        assert_eq!(classify(content), ActivityState::NotStarted);

        let content = "quote of the day:\n| > stay hungry\nme@box:~$ ";
        assert_eq!(classify(content), ActivityState::NotStarted);
    }

    #[test]
    fn test_detect_not_started() {
        let content = "user@host:~/proj$ ls\nCargo.toml src\nuser@host:~/proj$ ";
        assert_eq!(classify(content), ActivityState::NotStarted);

        let content = "top - 10:00:01 up 3 days\nTasks: 212 total";
        assert_eq!(classify(content), ActivityState::NotStarted);
    }

    #[test]
    fn test_word_tokens_without_count_is_not_active() {
        let content = "see docs/tokens.md for details\n$ ";
        assert_eq!(classify(content), ActivityState::NotStarted);
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(classify(""), ActivityState::Unknown);
        assert_eq!(classify("\n\n   \n"), ActivityState::Unknown);
        assert_eq!(classify("\x1b[2J\x1b[H\x1b[?25l"), ActivityState::Unknown);
        assert_eq!(classify("\u{fffd}\u{fffd}\x07\x08"), ActivityState::Unknown);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let content = format!("noise\n{}\n", IDLE_BOX);
        let first = classify(&content);
        for _ in 0..5 {
            assert_eq!(classify(&content), first);
        }
    }
}
