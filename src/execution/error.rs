//! Caller-facing errors for starting and resuming runs.

use thiserror::Error;

use crate::snapshot::StorageError;
use crate::workflow::contract::ValidationError;
use crate::workflow::graph::GraphError;
use crate::workflow::state::{StepStatus, TransitionError};

/// Errors returned by `start` / `resume`.
///
/// Misuse errors (`UnknownRun`, `NotSuspended`, `RunBusy`, ...) leave the
/// stored run untouched. `Storage` means a transition may not have been
/// recorded durably; the caller's view is not advanced past the last
/// successful save.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("unknown run '{0}'")]
    UnknownRun(String),

    #[error("run '{0}' already exists")]
    RunExists(String),

    #[error("run '{run_id}' belongs to workflow '{actual}', not '{expected}'")]
    WorkflowMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("step '{step_id}' of run '{run_id}' is not suspended ({})", describe(.status))]
    NotSuspended {
        run_id: String,
        step_id: String,
        status: Option<StepStatus>,
    },

    #[error("run '{0}' is busy with another start/resume")]
    RunBusy(String),

    #[error("trigger data rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("invalid state transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("snapshot storage failed: {0}")]
    Storage(#[from] StorageError),
}

fn describe(status: &Option<StepStatus>) -> String {
    match status {
        Some(status) => format!("status: {}", status),
        None => "no such step".to_string(),
    }
}
