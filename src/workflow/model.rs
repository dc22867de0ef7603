//! Workflow Data Model
//!
//! Core data structures describing a workflow: its steps, their bodies and
//! contracts, and the dependency graph between them.
//!
//! # Example
//!
//! ```
//! use durastep::execution::StepOutcome;
//! use durastep::workflow::{StepDefinition, WorkflowDefinition};
//! use serde_json::json;
//!
//! let workflow = WorkflowDefinition::builder("greet")
//!     .then(StepDefinition::from_fn("hello", |_| {
//!         Ok(StepOutcome::Complete(json!({"msg": "hello"})))
//!     }))
//!     .then(StepDefinition::from_fn("shout", |ctx| {
//!         let msg = ctx.input()["msg"].as_str().unwrap_or_default().to_uppercase();
//!         Ok(StepOutcome::Complete(json!({"msg": msg})))
//!     }))
//!     .commit()
//!     .unwrap();
//!
//! assert_eq!(workflow.len(), 2);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::execution::step::{StepBody, StepContext, StepError, StepOutcome};

use super::contract::Contract;
use super::graph::{GraphError, StepGraph};

/// A single named unit of work.
#[derive(Clone)]
pub struct StepDefinition {
    /// Unique identifier within its workflow
    pub id: String,

    /// Human-readable description
    pub description: Option<String>,

    /// IDs of steps that must succeed before this one can start
    pub predecessors: Vec<String>,

    body: Arc<dyn StepBody>,
    input_contract: Option<Arc<dyn Contract>>,
    output_contract: Option<Arc<dyn Contract>>,
}

impl StepDefinition {
    /// Creates a step from any [`StepBody`].
    pub fn new(id: impl Into<String>, body: impl StepBody + 'static) -> Self {
        Self {
            id: id.into().trim().to_string(),
            description: None,
            predecessors: Vec::new(),
            body: Arc::new(body),
            input_contract: None,
            output_contract: None,
        }
    }

    /// Creates a step from a closure.
    pub fn from_fn<F>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut StepContext) -> Result<StepOutcome, StepError> + Send + Sync + 'static,
    {
        Self::new(id, body)
    }

    /// Adds a dependency on another step.
    pub fn after(mut self, step_id: impl Into<String>) -> Self {
        self.predecessors.push(step_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Contract the merged input must satisfy before the body runs.
    pub fn with_input_contract(mut self, contract: impl Contract + 'static) -> Self {
        self.input_contract = Some(Arc::new(contract));
        self
    }

    /// Contract the body's output must satisfy for the step to succeed.
    pub fn with_output_contract(mut self, contract: impl Contract + 'static) -> Self {
        self.output_contract = Some(Arc::new(contract));
        self
    }

    pub fn body(&self) -> &dyn StepBody {
        self.body.as_ref()
    }

    pub fn input_contract(&self) -> Option<&dyn Contract> {
        self.input_contract.as_deref()
    }

    pub fn output_contract(&self) -> Option<&dyn Contract> {
        self.output_contract.as_deref()
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("predecessors", &self.predecessors)
            .field("input_contract", &self.input_contract)
            .field("output_contract", &self.output_contract)
            .finish_non_exhaustive()
    }
}

/// A committed workflow: named, validated, and immutable.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    trigger_contract: Option<Arc<dyn Contract>>,
    steps: HashMap<String, StepDefinition>,
    graph: StepGraph,
}

impl WorkflowDefinition {
    /// Starts building a workflow.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger_contract(&self) -> Option<&dyn Contract> {
        self.trigger_contract.as_deref()
    }

    /// Gets a step by ID.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id)
    }

    /// The committed dependency graph.
    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Step ids in topological order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.graph.ordered_ids()
    }

    /// Returns the number of steps in the workflow.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Collects steps and commits them into a [`WorkflowDefinition`].
///
/// Errors from individual additions are deferred; the first one is
/// returned by [`commit`](Self::commit).
pub struct WorkflowBuilder {
    name: String,
    trigger_contract: Option<Arc<dyn Contract>>,
    steps: Vec<StepDefinition>,
    graph: StepGraph,
    last: Option<String>,
    error: Option<GraphError>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger_contract: None,
            steps: Vec::new(),
            graph: StepGraph::new(),
            last: None,
            error: None,
        }
    }

    /// Contract trigger data must satisfy before a run is created.
    pub fn trigger_contract(mut self, contract: impl Contract + 'static) -> Self {
        self.trigger_contract = Some(Arc::new(contract));
        self
    }

    /// Appends a step to the linear chain: it depends on the previously
    /// added step, in addition to any predecessors it declares itself.
    pub fn then(mut self, mut step: StepDefinition) -> Self {
        if let Some(last) = &self.last {
            if !step.predecessors.contains(last) {
                step.predecessors.insert(0, last.clone());
            }
        }
        self.add(step);
        self
    }

    /// Adds a step using only its declared predecessors (DAG form).
    pub fn step(mut self, step: StepDefinition) -> Self {
        self.add(step);
        self
    }

    /// Validates the graph and freezes the workflow.
    pub fn commit(mut self) -> Result<WorkflowDefinition, GraphError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        self.graph.commit()?;
        debug!(
            "Workflow '{}' committed with {} steps",
            self.name,
            self.steps.len()
        );

        Ok(WorkflowDefinition {
            name: self.name,
            trigger_contract: self.trigger_contract,
            steps: self
                .steps
                .into_iter()
                .map(|step| (step.id.clone(), step))
                .collect(),
            graph: self.graph,
        })
    }

    fn add(&mut self, step: StepDefinition) {
        if self.error.is_some() {
            return;
        }
        match self.graph.add_step(step.id.clone(), step.predecessors.iter().cloned()) {
            Ok(()) => {
                self.last = Some(step.id.clone());
                self.steps.push(step);
            }
            Err(err) => self.error = Some(err),
        }
    }
}
