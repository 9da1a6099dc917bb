use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "agent-notifier",
    version,
    about = "Notify a webhook when a coding agent in a tmux pane goes idle"
)]
pub struct Cli {
    /// Config file (default: ~/.config/agent-notifier/config.toml)
    #[arg(long, short = 'c', env = "AGENT_NOTIFIER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub opts: RunOpts,

    /// Without a subcommand the poll loop runs until SIGINT/SIGTERM
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture and classify every pane once, then exit
    Status {
        /// Print a JSON array instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Settings that override the config file
#[derive(Args, Debug, Default, Clone)]
pub struct RunOpts {
    /// Webhook URL to POST notifications to
    #[arg(long, env = "AGENT_NOTIFIER_WEBHOOK")]
    pub webhook_url: Option<String>,

    /// Seconds between poll cycles
    #[arg(long, env = "AGENT_NOTIFIER_INTERVAL")]
    pub interval: Option<u64>,

    /// Trailing pane lines to capture and scan
    #[arg(long, env = "AGENT_NOTIFIER_LINES")]
    pub lines: Option<usize>,

    /// Consecutive cycles a new state must persist before it counts
    #[arg(long, env = "AGENT_NOTIFIER_DEBOUNCE")]
    pub debounce: Option<u32>,

    /// Debounce by time instead: seconds a new state must persist
    #[arg(long)]
    pub debounce_dwell: Option<u64>,

    /// Only watch panes whose foreground command matches this regex
    #[arg(long, env = "AGENT_NOTIFIER_MATCH_COMMAND")]
    pub match_command: Option<String>,

    /// Also watch panes whose recent output matches this regex (case-insensitive)
    #[arg(long, env = "AGENT_NOTIFIER_MATCH_TEXT")]
    pub match_text: Option<String>,

    /// Log notifications instead of sending them
    #[arg(long)]
    pub dry_run: bool,
}
