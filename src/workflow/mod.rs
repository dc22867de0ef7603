//! Workflow Definition Module
//!
//! Data structures for defining, validating, and recording the state of
//! step-graph workflows.
//!
//! # Structure
//!
//! - [`model`]: Step and workflow definitions, builder
//! - [`graph`]: Dependency graph, commit-time validation, topological batches
//! - [`contract`]: Structural validation of trigger data and step I/O
//! - [`registry`]: Name → workflow lookup
//! - [`state`]: Per-run state (step results, active paths)

pub mod contract;
pub mod graph;
pub mod model;
pub mod registry;
pub mod state;

pub use contract::{Contract, FieldType, Shape, ValidationError};
pub use graph::{GraphError, StepGraph};
pub use model::{StepDefinition, WorkflowBuilder, WorkflowDefinition};
pub use registry::{RegistryError, WorkflowRegistry};
pub use state::{FailureKind, Run, RunStatus, StepFailure, StepResult, StepStatus};
