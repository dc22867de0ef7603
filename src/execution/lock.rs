//! Per-Run Exclusivity
//!
//! At most one `start`/`resume` may advance a given run at a time. What
//! happens to a second attempt is decided by the [`ConcurrencyPolicy`].

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::RunError;

/// What to do when a run is already being advanced.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Wait for the current holder to finish
    #[default]
    Serialize,
    /// Fail immediately with [`RunError::RunBusy`]
    Reject,
}

/// Tracks which run ids are currently held.
#[derive(Debug, Default)]
pub struct RunLocks {
    policy: ConcurrencyPolicy,
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl RunLocks {
    pub fn new(policy: ConcurrencyPolicy) -> Self {
        Self {
            policy,
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    pub fn policy(&self) -> ConcurrencyPolicy {
        self.policy
    }

    /// Takes the run, waiting or failing per the policy.
    pub fn acquire(&self, run_id: &str) -> Result<RunGuard<'_>, RunError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        while held.contains(run_id) {
            match self.policy {
                ConcurrencyPolicy::Reject => return Err(RunError::RunBusy(run_id.to_string())),
                ConcurrencyPolicy::Serialize => {
                    debug!("Run '{}' is busy, waiting", run_id);
                    held = self
                        .released
                        .wait(held)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }

        held.insert(run_id.to_string());
        Ok(RunGuard {
            locks: self,
            run_id: run_id.to_string(),
        })
    }

    /// Returns true if some caller currently holds the run.
    pub fn is_held(&self, run_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(run_id)
    }

    fn release(&self, run_id: &str) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(run_id);
        self.released.notify_all();
    }
}

/// Releases the run when dropped.
#[derive(Debug)]
pub struct RunGuard<'a> {
    locks: &'a RunLocks,
    run_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.run_id);
    }
}
