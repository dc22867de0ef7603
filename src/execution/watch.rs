//! Run Watching
//!
//! Delivers state-transition events to subscribers of a run, in the order
//! the transitions happened. Delivery is synchronous: the engine calls
//! [`Watcher::emit`] right after recording each transition. A subscriber
//! that panics is logged and skipped; the others still get the event and
//! the run carries on.

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use crate::workflow::state::{Run, RunStatus, StepStatus};

/// What changed.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "scope", content = "status", rename_all = "snake_case")]
pub enum EventStatus {
    /// A step moved to this status
    Step(StepStatus),
    /// The engine reached a fixed point with the run in this status
    Run(RunStatus),
    /// A save failed and the run is back at its last stored state, which
    /// has this status. Earlier events since that save did not stick.
    Reverted(RunStatus),
}

/// One observed transition.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub run_id: String,
    /// Present for step transitions, absent for run-level events
    pub step_id: Option<String>,
    pub status: EventStatus,
    /// Copy of the run's active paths after the transition
    pub active_paths: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl WatchEvent {
    /// Event for a step's new status.
    pub fn step(run: &Run, step_id: &str, status: StepStatus) -> Self {
        Self {
            run_id: run.run_id.clone(),
            step_id: Some(step_id.to_string()),
            status: EventStatus::Step(status),
            active_paths: run.active_paths.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Event for the run reaching a fixed point.
    pub fn settled(run: &Run) -> Self {
        Self::run_level(run, EventStatus::Run(run.status()))
    }

    /// Event for a run rolled back to its last stored state.
    pub fn reverted(run: &Run) -> Self {
        Self::run_level(run, EventStatus::Reverted(run.status()))
    }

    fn run_level(run: &Run, status: EventStatus) -> Self {
        Self {
            run_id: run.run_id.clone(),
            step_id: None,
            status,
            active_paths: run.active_paths.clone(),
            timestamp: Utc::now(),
        }
    }
}

type Callback = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// Per-run, ordered subscriber lists.
#[derive(Default)]
pub struct Watcher {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(u64, Callback)>>>,
}

impl Watcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a callback for a run's events.
    ///
    /// The callback stays registered until the returned [`Subscription`]
    /// is dropped or unsubscribed.
    pub fn subscribe<F>(self: &Arc<Self>, run_id: &str, callback: F) -> Subscription
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(run_id.to_string())
            .or_default()
            .push((id, Arc::new(callback)));

        debug!("Subscriber {} watching run '{}'", id, run_id);
        Subscription {
            watcher: Arc::downgrade(self),
            run_id: run_id.to_string(),
            id,
        }
    }

    /// Number of subscribers for a run.
    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(run_id)
            .map_or(0, Vec::len)
    }

    /// Delivers an event to the run's subscribers in subscription order.
    pub fn emit(&self, event: &WatchEvent) {
        // Deliver outside the lock so callbacks may (un)subscribe
        let callbacks: Vec<(u64, Callback)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.run_id)
            .cloned()
            .unwrap_or_default();

        for (id, callback) in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(
                    "Subscriber {} panicked while handling an event for run '{}'",
                    id, event.run_id
                );
            }
        }
    }

    fn remove(&self, run_id: &str, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = subscribers.get_mut(run_id) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subscribers.remove(run_id);
            }
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let runs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Watcher").field("watched_runs", &runs).finish()
    }
}

/// Handle returned by [`Watcher::subscribe`].
#[must_use = "dropping a Subscription unregisters its callback"]
#[derive(Debug)]
pub struct Subscription {
    watcher: Weak<Watcher>,
    run_id: String,
    id: u64,
}

impl Subscription {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stops delivery to this subscriber. Same as dropping it.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.upgrade() {
            watcher.remove(&self.run_id, self.id);
            debug!("Subscriber {} stopped watching run '{}'", self.id, self.run_id);
        }
    }
}
