//! Workflow Registry
//!
//! An explicitly owned name → workflow map held by the runtime, so a
//! workflow can be looked up by name when a run is resumed.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use thiserror::Error;

use super::model::WorkflowDefinition;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("workflow '{0}' is already registered")]
    Duplicate(String),
}

/// Committed workflows, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a committed workflow under its name.
    pub fn register(&mut self, workflow: WorkflowDefinition) -> Result<(), RegistryError> {
        let name = workflow.name().to_string();
        if self.workflows.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        info!("Registered workflow '{}' ({} steps)", name, workflow.len());
        self.workflows.insert(name, Arc::new(workflow));
        Ok(())
    }

    /// Gets a workflow by name.
    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
