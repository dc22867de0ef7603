//! Durastep - Durable Step-Graph Execution
//!
//! Runs workflows made of named steps arranged in a dependency graph.
//! Steps may pause themselves waiting on outside input; the engine then
//! persists a snapshot of the run and returns, and a later `resume`
//! (possibly from another process) continues the step where it left off.
//!
//! # Architecture
//!
//! The library is organized into four modules:
//!
//! - [`workflow`]: Step and workflow definitions, the step graph, contracts
//!   and per-run state
//! - [`execution`]: The engine, suspend/resume, watchers and the runtime
//! - [`snapshot`]: Versioned snapshots and the stores that persist them
//! - [`config`]: Runtime settings loaded from YAML
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use durastep::execution::{Runtime, StepOutcome};
//! use durastep::snapshot::InMemorySnapshotStore;
//! use durastep::workflow::{RunStatus, StepDefinition, WorkflowDefinition, WorkflowRegistry};
//! use serde_json::json;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workflow = WorkflowDefinition::builder("review")
//!         .then(StepDefinition::from_fn("draft", |_| {
//!             Ok(StepOutcome::Complete(json!({"text": "hello"})))
//!         }))
//!         .then(StepDefinition::from_fn("approve", |ctx| match ctx.resume_point() {
//!             0 => Ok(ctx.suspend(json!({"ask": "approve draft?"}))),
//!             _ => Ok(StepOutcome::Complete(json!({"approved": ctx.input()["ok"]}))),
//!         }))
//!         .commit()?;
//!
//!     let mut registry = WorkflowRegistry::new();
//!     registry.register(workflow)?;
//!
//!     let runtime = Runtime::new(registry, Arc::new(InMemorySnapshotStore::new()));
//!     let mut run = runtime.create_run("review")?;
//!
//!     run.start(json!({}))?;
//!     assert_eq!(run.status(), Some(RunStatus::Suspended));
//!
//!     run.resume("approve", json!({"ok": true}))?;
//!     assert_eq!(run.status(), Some(RunStatus::Completed));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod execution;
pub mod snapshot;
pub mod workflow;

// Re-export commonly used types
pub use config::EngineConfig;
pub use execution::{RunError, RunHandle, Runtime};
pub use workflow::model::{StepDefinition, WorkflowDefinition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Durastep";
