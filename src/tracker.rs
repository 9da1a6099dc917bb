use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::tmux::{ActivityClassifier, ActivityState, PaneId, PaneSnapshot};

/// How long a differing observation must persist before it is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Debounce {
    /// Seen on this many consecutive cycles (values below 1 act as 1)
    Cycles(u32),
    /// Seen continuously for at least this long
    Dwell(Duration),
}

impl Default for Debounce {
    fn default() -> Self {
        Debounce::Cycles(2)
    }
}

impl Debounce {
    fn is_satisfied(&self, consecutive: u32, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Debounce::Cycles(threshold) => consecutive >= (*threshold).max(1),
            Debounce::Dwell(dwell) => (now - since)
                .to_std()
                .map_or(false, |elapsed| elapsed >= *dwell),
        }
    }
}

/// Tracked state for one live pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneRecord {
    pub current_state: ActivityState,
    pub last_changed_at: DateTime<Utc>,
    /// Consecutive observations of `pending` that differ from `current_state`
    pub consecutive_unstable_count: u32,
    pending: Option<ActivityState>,
    pending_since: DateTime<Utc>,
}

impl PaneRecord {
    fn new(state: ActivityState, now: DateTime<Utc>) -> Self {
        Self {
            current_state: state,
            last_changed_at: now,
            consecutive_unstable_count: 0,
            pending: None,
            pending_since: now,
        }
    }

    fn clear_pending(&mut self) {
        self.consecutive_unstable_count = 0;
        self.pending = None;
    }
}

/// A confirmed `Active -> IdleAwaitingInput` change for one pane
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub pane_id: PaneId,
    pub label: String,
    pub working_dir: String,
    pub from: ActivityState,
    pub to: ActivityState,
    pub occurred_at: DateTime<Utc>,
}

/// Owns every live pane's [`PaneRecord`] for the lifetime of the process
#[derive(Debug, Default)]
pub struct PaneStateTracker {
    records: HashMap<PaneId, PaneRecord>,
    debounce: Debounce,
}

impl PaneStateTracker {
    pub fn new(debounce: Debounce) -> Self {
        Self {
            records: HashMap::new(),
            debounce,
        }
    }

    pub fn get(&self, id: &PaneId) -> Option<&PaneRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Feed one classified observation, timestamped by the snapshot
    pub fn observe(
        &mut self,
        pane: &PaneSnapshot,
        observed: ActivityState,
    ) -> Option<TransitionEvent> {
        let now = pane.captured_at;

        let Some(record) = self.records.get_mut(&pane.id) else {
            debug!(pane = %pane.id, state = %observed, "tracking new pane");
            self.records
                .insert(pane.id.clone(), PaneRecord::new(observed, now));
            return None;
        };

        if observed == record.current_state {
            record.clear_pending();
            return None;
        }

        if record.pending != Some(observed) {
            record.pending = Some(observed);
            record.pending_since = now;
            record.consecutive_unstable_count = 0;
        }
        record.consecutive_unstable_count += 1;

        if !self.debounce.is_satisfied(
            record.consecutive_unstable_count,
            record.pending_since,
            now,
        ) {
            debug!(
                pane = %pane.id,
                from = %record.current_state,
                to = %observed,
                count = record.consecutive_unstable_count,
                "transition pending"
            );
            return None;
        }

        let from = record.current_state;
        record.current_state = observed;
        record.last_changed_at = now;
        record.clear_pending();
        info!(pane = %pane.id, label = %pane.label, %from, to = %observed, "state changed");

        (from == ActivityState::Active && observed == ActivityState::IdleAwaitingInput).then(
            || TransitionEvent {
                pane_id: pane.id.clone(),
                label: pane.label.clone(),
                working_dir: pane.working_dir.clone(),
                from,
                to: observed,
                occurred_at: now,
            },
        )
    }

    /// Drop records for panes not in `live`; returns how many were removed
    pub fn retain_live(&mut self, live: &HashSet<PaneId>) -> usize {
        let before = self.records.len();
        self.records.retain(|id, _| {
            let keep = live.contains(id);
            if !keep {
                debug!(pane = %id, "pane gone, record dropped");
            }
            keep
        });
        before - self.records.len()
    }
}

/// Classify and track one cycle's snapshots, then purge panes that are gone.
pub fn process_cycle(
    tracker: &mut PaneStateTracker,
    snapshots: &[PaneSnapshot],
    classifier: &dyn ActivityClassifier,
) -> Vec<TransitionEvent> {
    let mut events = Vec::new();
    for pane in snapshots {
        let state = classifier.classify(&pane.raw_text);
        if let Some(event) = tracker.observe(pane, state) {
            events.push(event);
        }
    }

    let live: HashSet<PaneId> = snapshots.iter().map(|pane| pane.id.clone()).collect();
    tracker.retain_live(&live);

    events
}
