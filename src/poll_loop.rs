use anyhow::Context;
use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_AGENT_NAME;
use crate::enrich::ContextEnricher;
use crate::notify::{format_message, Notifier};
use crate::tmux::{ActivityClassifier, PaneSource};
use crate::tracker::{process_cycle, PaneStateTracker};

/// What one cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub panes: usize,
    pub events: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct PollLoop<S, E, N> {
    source: S,
    classifier: Box<dyn ActivityClassifier>,
    tracker: PaneStateTracker,
    enricher: E,
    notifier: N,
    agent_name: String,
    interval: Duration,
}

impl<S, E, N> PollLoop<S, E, N>
where
    S: PaneSource,
    E: ContextEnricher,
    N: Notifier,
{
    pub fn new(
        source: S,
        classifier: Box<dyn ActivityClassifier>,
        tracker: PaneStateTracker,
        enricher: E,
        notifier: N,
    ) -> Self {
        Self {
            source,
            classifier,
            tracker,
            enricher,
            notifier,
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            interval: Duration::from_secs(7),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    pub fn tracker(&self) -> &PaneStateTracker {
        &self.tracker
    }

    /// Run one snapshot/classify/track/notify pass.
    ///
    /// Fails only when the pane list itself cannot be read; the tracker is
    /// left untouched in that case. Enrichment and delivery problems are
    /// logged and counted, never returned.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        let snapshots = self
            .source
            .snapshot()
            .await
            .context("failed to snapshot panes")?;

        let events = process_cycle(&mut self.tracker, &snapshots, self.classifier.as_ref());
        let mut report = CycleReport {
            panes: snapshots.len(),
            events: events.len(),
            ..CycleReport::default()
        };
        if events.is_empty() {
            return Ok(report);
        }

        let contexts = join_all(
            events
                .iter()
                .map(|event| self.enricher.enrich(&event.working_dir)),
        )
        .await;

        for (event, ctx) in events.iter().zip(contexts) {
            info!(
                pane = %event.pane_id,
                label = %event.label,
                dir = %event.working_dir,
                branch = ctx.branch.as_deref().unwrap_or("unknown"),
                "agent went idle"
            );
            let payload = format_message(&self.agent_name, event, &ctx);
            match self.notifier.deliver(&payload).await {
                Ok(delivery) => {
                    report.delivered += 1;
                    debug!(pane = %event.pane_id, attempts = delivery.attempts, "notification sent");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(pane = %event.pane_id, error = %e, "notification not delivered");
                }
            }
        }

        Ok(report)
    }

    /// Run cycles on the interval until `shutdown` resolves. A cycle still
    /// in flight at shutdown is abandoned.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.interval, "poll loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                result = self.run_cycle() => result,
                _ = &mut shutdown => {
                    info!("shutdown requested, abandoning in-flight cycle");
                    break;
                }
            };

            match result {
                Ok(report) => debug!(
                    panes = report.panes,
                    events = report.events,
                    delivered = report.delivered,
                    failed = report.failed,
                    tracked = self.tracker.len(),
                    "cycle complete"
                ),
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(%error, "cycle skipped");
                }
            }
        }

        info!("poll loop stopped");
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
