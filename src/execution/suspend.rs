//! Suspension Points
//!
//! A step body that needs external input is written as a small state
//! machine over numbered suspension points. Point `0` is the start of the
//! body; each call to [`SuspendController::suspend`] names the point the
//! body will re-enter at when it is resumed. The engine persists that point
//! together with the body's saved locals and its input as a
//! [`Continuation`], and hands them back on resume.
//!
//! ```
//! use durastep::execution::{StepContext, StepError, StepOutcome};
//! use serde_json::json;
//!
//! fn approval(ctx: &mut StepContext) -> Result<StepOutcome, StepError> {
//!     match ctx.resume_point() {
//!         0 => Ok(ctx.suspend(json!({"ask": "approve?"}))),
//!         _ => Ok(StepOutcome::Complete(json!({"approved": ctx.input()["approved"]}))),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::step::StepOutcome;

/// Persisted marker telling the engine where a suspended step re-enters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Continuation {
    /// Suspension point the body reached
    pub point: u32,

    /// Locals the body saved before suspending
    #[serde(default)]
    pub locals: Value,

    /// Input the body was running with when it suspended
    #[serde(default)]
    pub input: Value,
}

/// The single suspension point reached by one step invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SuspendToken {
    pub point: u32,
    pub payload: Value,
    pub locals: Value,
}

/// Per-invocation suspend capability.
#[derive(Debug, Clone)]
pub struct SuspendController {
    resume_point: u32,
    locals: Value,
}

impl SuspendController {
    /// Controller for a body that starts from the top.
    pub(crate) fn fresh() -> Self {
        Self {
            resume_point: 0,
            locals: Value::Null,
        }
    }

    /// Controller for a body re-entering at a stored continuation.
    pub(crate) fn resuming(continuation: &Continuation) -> Self {
        Self {
            resume_point: continuation.point,
            locals: continuation.locals.clone(),
        }
    }

    /// Point the body should continue from (`0` on a fresh start).
    pub fn resume_point(&self) -> u32 {
        self.resume_point
    }

    /// Returns true when the body is being re-entered after a suspension.
    pub fn is_resuming(&self) -> bool {
        self.resume_point > 0
    }

    /// Reads a saved local.
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    /// Saves a local so it survives the next suspension.
    pub fn set_local(&mut self, key: impl Into<String>, value: Value) {
        if !self.locals.is_object() {
            self.locals = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.locals {
            map.insert(key.into(), value);
        }
    }

    /// All saved locals.
    pub fn locals(&self) -> &Value {
        &self.locals
    }

    /// Suspends at the point following the current one.
    pub fn suspend(&self, payload: Value) -> StepOutcome {
        self.suspend_at(self.resume_point + 1, payload)
    }

    /// Suspends at an explicit point.
    ///
    /// Re-suspending at the current point is allowed (the body is still
    /// waiting on the same input); going back to an earlier point is not.
    pub fn suspend_at(&self, point: u32, payload: Value) -> StepOutcome {
        StepOutcome::Suspend(SuspendToken {
            point,
            payload,
            locals: self.locals.clone(),
        })
    }

    /// Rejects tokens that would move the body backwards.
    pub(crate) fn check(&self, token: &SuspendToken) -> Result<(), String> {
        let lowest = self.resume_point.max(1);
        if token.point < lowest {
            return Err(format!(
                "suspension point {} is behind the current point {}",
                token.point, lowest
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(outcome: StepOutcome) -> SuspendToken {
        match outcome {
            StepOutcome::Suspend(token) => token,
            other => panic!("Expected suspend, got {:?}", other),
        }
    }

    #[test]
    fn test_fresh_controller() {
        let controller = SuspendController::fresh();
        assert_eq!(controller.resume_point(), 0);
        assert!(!controller.is_resuming());
        assert!(controller.locals().is_null());
    }

    #[test]
    fn test_suspend_advances_point() {
        let controller = SuspendController::fresh();
        let token = token(controller.suspend(json!({"ask": 1})));
        assert_eq!(token.point, 1);
        assert_eq!(token.payload, json!({"ask": 1}));
        assert!(controller.check(&token).is_ok());
    }

    #[test]
    fn test_resuming_controller() {
        let continuation = Continuation {
            point: 2,
            locals: json!({"seen": 3}),
            input: json!({}),
        };
        let controller = SuspendController::resuming(&continuation);

        assert_eq!(controller.resume_point(), 2);
        assert!(controller.is_resuming());
        assert_eq!(controller.local("seen"), Some(&json!(3)));
        assert_eq!(token(controller.suspend(Value::Null)).point, 3);
    }

    #[test]
    fn test_locals_travel_with_token() {
        let mut controller = SuspendController::fresh();
        controller.set_local("count", json!(7));

        let token = token(controller.suspend(Value::Null));
        assert_eq!(token.locals, json!({"count": 7}));
    }

    #[test]
    fn test_check_rejects_backwards_point() {
        let continuation = Continuation {
            point: 2,
            locals: Value::Null,
            input: Value::Null,
        };
        let controller = SuspendController::resuming(&continuation);

        assert!(controller.check(&token(controller.suspend_at(2, Value::Null))).is_ok());
        assert!(controller.check(&token(controller.suspend_at(1, Value::Null))).is_err());
    }

    #[test]
    fn test_check_rejects_point_zero() {
        let controller = SuspendController::fresh();
        assert!(controller.check(&token(controller.suspend_at(0, Value::Null))).is_err());
    }
}
