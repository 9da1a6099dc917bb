use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod enrich;
mod notify;
mod poll_loop;
mod tmux;
mod tracker;

use cli::{Cli, Command};
use config::{Config, FileConfig};
use enrich::GitEnricher;
use notify::{DryRunNotifier, HttpTransport, Notifier, RetryPolicy, WebhookSink};
use poll_loop::{shutdown_signal, PollLoop};
use tmux::{
    ActivityClassifier, ActivityState, PaneId, PaneSnapshot, PaneSource, TmuxClient,
    TokenIndicatorClassifier,
};
use tracker::PaneStateTracker;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Configuration errors are fatal before the loop starts
    let file = FileConfig::load(cli.config.as_deref())?;
    let config = Config::resolve(&cli.opts, file)?;

    match cli.command {
        Some(Command::Status { json }) => print_status(&config, json).await,
        None => run(config).await,
    }
}

fn tmux_client(config: &Config) -> TmuxClient {
    TmuxClient::new()
        .with_tmux_path(&config.tmux_bin)
        .with_lines(config.lines)
        .with_timeout(config.capture_timeout)
        .with_command_filter(config.match_command.clone())
        .with_text_filter(config.match_text.clone())
}

async fn run(config: Config) -> Result<()> {
    if config.dry_run {
        info!("dry run: notifications are logged, not sent");
        run_loop(&config, DryRunNotifier).await;
        return Ok(());
    }

    let url = config.require_webhook()?;
    let transport =
        HttpTransport::new(config.http_timeout).context("Failed to build HTTP client")?;
    let policy = RetryPolicy::default().with_max_attempts(config.max_attempts);
    run_loop(&config, WebhookSink::new(url, transport, policy)).await;
    Ok(())
}

async fn run_loop<N: Notifier>(config: &Config, notifier: N) {
    let enricher = GitEnricher::new()
        .with_git_path(&config.git_bin)
        .with_timeout(config.git_timeout);

    PollLoop::new(
        tmux_client(config),
        Box::new(TokenIndicatorClassifier::new()),
        PaneStateTracker::new(config.debounce),
        enricher,
        notifier,
    )
    .with_interval(config.interval)
    .with_agent_name(&config.agent_name)
    .run(shutdown_signal())
    .await;
}

/// One row of `status` output
#[derive(Debug, Serialize)]
struct PaneStatus<'a> {
    pane_id: &'a PaneId,
    label: &'a str,
    state: ActivityState,
    working_dir: &'a str,
}

fn pane_statuses<'a>(
    snapshots: &'a [PaneSnapshot],
    classifier: &dyn ActivityClassifier,
) -> Vec<PaneStatus<'a>> {
    snapshots
        .iter()
        .map(|pane| PaneStatus {
            pane_id: &pane.id,
            label: &pane.label,
            state: classifier.classify(&pane.raw_text),
            working_dir: &pane.working_dir,
        })
        .collect()
}

async fn print_status(config: &Config, json: bool) -> Result<()> {
    let snapshots = tmux_client(config).snapshot().await?;
    let rows = pane_statuses(&snapshots, &TokenIndicatorClassifier::new());

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No tmux panes found.");
        return Ok(());
    }
    for row in &rows {
        println!(
            "{:<6} {:<20} {:<12} {}",
            row.pane_id, row.label, row.state, row.working_dir
        );
    }
    Ok(())
}
