//! Workflow Execution Module
//!
//! Runs step graphs to a fixed point, suspends and resumes individual
//! steps, and reports transitions to watchers.
//!
//! # Architecture
//!
//! - [`handle`]: Runtime (process-level orchestrator) and RunHandle
//! - [`engine`]: Batch scheduler driving a run to its next fixed point
//! - [`step`]: Step bodies, their context, and single-step invocation
//! - [`suspend`]: Suspension points and continuations
//! - [`watch`]: Ordered delivery of transition events
//! - [`lock`]: Per-run exclusivity
//! - [`error`]: Caller-facing errors

pub mod engine;
pub mod error;
pub mod handle;
pub mod lock;
pub mod step;
pub mod suspend;
pub mod watch;

pub use engine::{ExecutionEngine, ResumeRequest};
pub use error::RunError;
pub use handle::{RunHandle, Runtime};
pub use lock::ConcurrencyPolicy;
pub use step::{StepBody, StepContext, StepError, StepOutcome};
pub use suspend::{Continuation, SuspendController, SuspendToken};
pub use watch::{EventStatus, Subscription, WatchEvent, Watcher};
