//! Run State
//!
//! The persisted model of a single workflow execution: per-step results,
//! the set of active paths, and the derived overall run status.
//!
//! A [`Run`] is only ever mutated by the execution engine while it holds the
//! run's exclusivity guard. Every mutation goes through one of the `mark_*`
//! methods so that step statuses only move forward and `active_paths` always
//! mirrors the steps that are `running` or `suspended`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::execution::suspend::Continuation;

use super::graph::StepGraph;

/// Lifecycle status of a single step within a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for predecessors
    Pending,
    /// Body is executing
    Running,
    /// Body returned an output
    Success,
    /// Body paused and awaits an external resume
    Suspended,
    /// Body (or its contracts) failed
    Failed,
}

impl StepStatus {
    /// Returns true for statuses that keep a step in `active_paths`.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }

    /// Returns true for statuses no transition can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Checks the forward-only transition table.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Suspended, Self::Running)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Suspended)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Overall status of a run, derived from its step results.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why a step ended up `failed`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The body returned an error
    Body,
    /// Input or output did not match the declared contract
    Validation,
    /// The body panicked
    Panic,
}

/// Error detail recorded on a failed step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Result slot for one step of a run.
///
/// `output` is present iff the step succeeded and `error` iff it failed.
/// `suspend_payload` and `continuation` are set by a suspension and kept
/// while a resumed body runs, until the step succeeds or fails.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepResult {
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_payload: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,

    /// Where a suspended body re-enters, plus its saved locals and input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Continuation>,

    /// How many times this step has been resumed
    #[serde(default)]
    pub resume_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepResult {
    fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            output: None,
            suspend_payload: None,
            error: None,
            continuation: None,
            resume_count: 0,
            started_at: None,
            ended_at: None,
        }
    }
}

/// A step status change that the transition table forbids.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("step '{0}' is not part of this run")]
    UnknownStep(String),

    #[error("step '{step_id}' cannot move from {from} to {to}")]
    Forbidden {
        step_id: String,
        from: StepStatus,
        to: StepStatus,
    },
}

/// One execution instance of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Run {
    pub run_id: String,

    /// Name of the workflow this run executes
    pub workflow: String,

    pub trigger_data: Value,

    pub step_results: BTreeMap<String, StepResult>,

    /// Steps currently running or suspended
    pub active_paths: BTreeSet<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Creates a run with every step pending.
    pub fn new<I, S>(
        run_id: impl Into<String>,
        workflow: impl Into<String>,
        trigger_data: Value,
        step_ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            workflow: workflow.into(),
            trigger_data,
            step_results: step_ids
                .into_iter()
                .map(|id| (id.into(), StepResult::pending()))
                .collect(),
            active_paths: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Looks up a step's result.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.get(step_id)
    }

    /// Returns a step's status, if the step belongs to this run.
    pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        self.step_results.get(step_id).map(|r| r.status)
    }

    /// Derives the overall run status.
    ///
    /// Anything running wins, then anything suspended (the run is still
    /// waiting on input), then any failure. Pending steps with nothing
    /// active and nothing failed mean the run has not been driven yet.
    pub fn status(&self) -> RunStatus {
        let has = |status: StepStatus| self.step_results.values().any(|r| r.status == status);

        if has(StepStatus::Running) {
            RunStatus::Running
        } else if has(StepStatus::Suspended) {
            RunStatus::Suspended
        } else if has(StepStatus::Failed) {
            RunStatus::Failed
        } else if has(StepStatus::Pending) {
            RunStatus::Running
        } else {
            RunStatus::Completed
        }
    }

    /// Ids of all currently suspended steps.
    pub fn suspended_steps(&self) -> Vec<String> {
        self.step_results
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Suspended)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Pending steps that can never start because an ancestor failed.
    pub fn blocked_steps(&self, graph: &StepGraph) -> Vec<String> {
        let mut blocked: BTreeSet<String> = BTreeSet::new();

        // Predecessors always precede dependents in topological order, so a
        // single pass propagates the failure down the graph.
        for id in graph.ordered_ids() {
            if self.status_of(id) != Some(StepStatus::Pending) {
                continue;
            }
            let foreclosed = graph.predecessors(id).iter().any(|pred| {
                self.status_of(pred) == Some(StepStatus::Failed) || blocked.contains(pred)
            });
            if foreclosed {
                blocked.insert(id.to_string());
            }
        }

        blocked.into_iter().collect()
    }

    /// Marks a step as running (fresh start or resume).
    pub fn mark_running(&mut self, step_id: &str) -> Result<(), TransitionError> {
        let result = self.transition(step_id, StepStatus::Running)?;
        if result.continuation.is_some() {
            result.resume_count += 1;
        } else {
            result.started_at = Some(Utc::now());
        }
        self.active_paths.insert(step_id.to_string());
        Ok(())
    }

    /// Records a step's output.
    pub fn mark_success(&mut self, step_id: &str, output: Value) -> Result<(), TransitionError> {
        let result = self.transition(step_id, StepStatus::Success)?;
        result.output = Some(output);
        result.suspend_payload = None;
        result.continuation = None;
        result.ended_at = Some(Utc::now());
        self.active_paths.remove(step_id);
        Ok(())
    }

    /// Records a suspension; the step stays in `active_paths`.
    pub fn mark_suspended(
        &mut self,
        step_id: &str,
        payload: Value,
        continuation: Continuation,
    ) -> Result<(), TransitionError> {
        let result = self.transition(step_id, StepStatus::Suspended)?;
        result.suspend_payload = Some(payload);
        result.continuation = Some(continuation);
        self.active_paths.insert(step_id.to_string());
        Ok(())
    }

    /// Records a failure and takes the step off `active_paths`.
    pub fn mark_failed(
        &mut self,
        step_id: &str,
        failure: StepFailure,
    ) -> Result<(), TransitionError> {
        let result = self.transition(step_id, StepStatus::Failed)?;
        result.error = Some(failure);
        result.suspend_payload = None;
        result.continuation = None;
        result.ended_at = Some(Utc::now());
        self.active_paths.remove(step_id);
        Ok(())
    }

    /// Rewinds steps left `running` by a drive that never finished.
    ///
    /// Only valid while nothing is advancing the run. A step that had
    /// suspended before goes back to `suspended` with its continuation;
    /// any other step goes back to `pending`. Returns the rewound ids.
    pub fn requeue_interrupted(&mut self) -> Vec<String> {
        let mut rewound = Vec::new();

        for (id, result) in self.step_results.iter_mut() {
            if result.status != StepStatus::Running {
                continue;
            }
            if result.continuation.is_some() {
                result.status = StepStatus::Suspended;
            } else {
                result.status = StepStatus::Pending;
                result.started_at = None;
                self.active_paths.remove(id);
            }
            rewound.push(id.clone());
        }

        rewound
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn transition(
        &mut self,
        step_id: &str,
        next: StepStatus,
    ) -> Result<&mut StepResult, TransitionError> {
        let result = self
            .step_results
            .get_mut(step_id)
            .ok_or_else(|| TransitionError::UnknownStep(step_id.to_string()))?;

        if !result.status.can_transition_to(next) {
            return Err(TransitionError::Forbidden {
                step_id: step_id.to_string(),
                from: result.status,
                to: next,
            });
        }

        debug!("Step '{}': {} -> {}", step_id, result.status, next);
        result.status = next;
        Ok(result)
    }
}
