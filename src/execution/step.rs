//! Step Bodies and Invocation
//!
//! Handles the execution of a single step:
//! - Input assembly (trigger data merged with predecessor outputs)
//! - Resume-time context merging
//! - Body invocation with panic isolation
//! - Outcome classification (complete, suspend, fail)

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use log::{debug, error};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::workflow::model::StepDefinition;
use crate::workflow::state::{FailureKind, StepFailure};

use super::suspend::{SuspendController, SuspendToken};

/// What a step body produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The body ran to the end with this output
    Complete(Value),
    /// The body paused at a suspension point
    Suspend(SuspendToken),
}

/// Failure returned by a step body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct StepError {
    message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The work a step performs.
///
/// Implemented per step. Any `Fn(&mut StepContext) -> Result<StepOutcome,
/// StepError>` closure is a step body too.
pub trait StepBody: Send + Sync {
    fn execute(&self, ctx: &mut StepContext) -> Result<StepOutcome, StepError>;
}

impl<F> StepBody for F
where
    F: Fn(&mut StepContext) -> Result<StepOutcome, StepError> + Send + Sync,
{
    fn execute(&self, ctx: &mut StepContext) -> Result<StepOutcome, StepError> {
        self(ctx)
    }
}

/// Everything a step body can see and do during one invocation.
#[derive(Debug, Clone)]
pub struct StepContext {
    run_id: String,
    step_id: String,
    input: Value,
    trigger: Value,
    outputs: BTreeMap<String, Value>,
    suspend: SuspendController,
}

impl StepContext {
    pub(crate) fn new(
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        input: Value,
        trigger: Value,
        outputs: BTreeMap<String, Value>,
        suspend: SuspendController,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            input,
            trigger,
            outputs,
            suspend,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Merged input: trigger data, predecessor outputs, and on resume the
    /// resume context.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// The run's original trigger data.
    pub fn trigger(&self) -> &Value {
        &self.trigger
    }

    /// Output of a declared predecessor.
    pub fn output_of(&self, step_id: &str) -> Option<&Value> {
        self.outputs.get(step_id)
    }

    /// Point the body should continue from (`0` on a fresh start).
    pub fn resume_point(&self) -> u32 {
        self.suspend.resume_point()
    }

    pub fn is_resuming(&self) -> bool {
        self.suspend.is_resuming()
    }

    /// Reads a local saved before an earlier suspension.
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.suspend.local(key)
    }

    /// Saves a local so it is handed back after the next suspension.
    pub fn set_local(&mut self, key: impl Into<String>, value: Value) {
        self.suspend.set_local(key, value);
    }

    /// Suspends at the point following the current one.
    ///
    /// Return the result from the body; nothing after the call runs until
    /// the step is resumed.
    pub fn suspend(&self, payload: Value) -> StepOutcome {
        self.suspend.suspend(payload)
    }

    /// Suspends at an explicit point.
    pub fn suspend_at(&self, point: u32, payload: Value) -> StepOutcome {
        self.suspend.suspend_at(point, payload)
    }

    pub fn suspender(&self) -> &SuspendController {
        &self.suspend
    }
}

/// Result of running one body, ready for the engine to record.
#[derive(Debug)]
pub(crate) struct Invocation {
    pub outcome: Result<StepOutcome, StepFailure>,
    /// Input the body ran with (stored on suspension)
    pub input: Value,
}

/// Runs a step body, turning errors and panics into [`StepFailure`]s.
pub(crate) fn invoke_step(step: &StepDefinition, mut ctx: StepContext) -> Invocation {
    debug!(
        "Invoking step '{}' (run '{}', resume point {})",
        ctx.step_id(),
        ctx.run_id(),
        ctx.resume_point()
    );

    let result = panic::catch_unwind(AssertUnwindSafe(|| step.body().execute(&mut ctx)));

    let outcome = match result {
        Ok(Ok(StepOutcome::Suspend(token))) => match ctx.suspender().check(&token) {
            Ok(()) => Ok(StepOutcome::Suspend(token)),
            Err(message) => Err(StepFailure::new(FailureKind::Body, message)),
        },
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => Err(StepFailure::new(FailureKind::Body, err.message)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "step body panicked".to_string());
            error!("Step '{}' panicked: {}", ctx.step_id(), message);
            Err(StepFailure::new(FailureKind::Panic, message))
        }
    };

    Invocation {
        outcome,
        input: ctx.input,
    }
}

/// Builds a step's input from trigger data and predecessor outputs.
///
/// Object values are merged key by key in order (later keys win);
/// a non-object predecessor output lands under the predecessor's id.
pub(crate) fn merge_inputs<'a, I>(trigger: &Value, predecessor_outputs: I) -> Value
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut merged = Map::new();

    if let Value::Object(fields) = trigger {
        merged.extend(fields.clone());
    }

    for (step_id, output) in predecessor_outputs {
        match output {
            Value::Object(fields) => merged.extend(fields.clone()),
            Value::Null => {}
            other => {
                merged.insert(step_id.to_string(), other.clone());
            }
        }
    }

    Value::Object(merged)
}

/// Layers a resume context over the input a step suspended with.
pub(crate) fn merge_resume(input: &Value, context: Value) -> Value {
    let mut merged = match input {
        Value::Object(fields) => fields.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("input".to_string(), other.clone());
            map
        }
    };

    match context {
        Value::Object(fields) => merged.extend(fields),
        Value::Null => {}
        other => {
            merged.insert("resume".to_string(), other);
        }
    }

    Value::Object(merged)
}
