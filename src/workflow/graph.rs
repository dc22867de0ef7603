//! Step Graph
//!
//! Immutable-after-commit description of the steps in a workflow and the
//! dependency relation between them:
//! - Duplicate and empty id detection
//! - Reference integrity checking
//! - Cycle detection
//! - Topological batching (steps within a batch may run concurrently)

use std::collections::{HashMap, VecDeque};

use log::{debug, info};
use thiserror::Error;

/// Errors raised while building or committing a step graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("workflow has no steps")]
    EmptyWorkflow,

    #[error("step has empty or whitespace-only id")]
    EmptyStepId,

    #[error("duplicate step id: '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' references unknown predecessor '{predecessor}'")]
    UnknownPredecessor { step: String, predecessor: String },

    #[error("workflow contains cyclic dependencies between: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("graph is committed; cannot add step '{0}'")]
    Frozen(String),

    #[error("graph has not been committed")]
    NotCommitted,
}

#[derive(Debug, Clone)]
struct GraphNode {
    id: String,
    predecessors: Vec<String>,
}

/// Steps plus their predecessor sets.
///
/// Built with [`add_step`](Self::add_step), validated and frozen with
/// [`commit`](Self::commit). Only a committed graph yields a
/// [`topological_order`](Self::topological_order).
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    batches: Vec<Vec<String>>,
    committed: bool,
}

impl StepGraph {
    /// Creates an empty, uncommitted graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step with its declared predecessors.
    ///
    /// Predecessors may be declared before the steps they name exist; they
    /// are resolved at commit time.
    pub fn add_step<I, S>(&mut self, id: impl Into<String>, predecessors: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();

        if self.committed {
            return Err(GraphError::Frozen(id));
        }
        if id.trim().is_empty() {
            return Err(GraphError::EmptyStepId);
        }
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateStep(id));
        }

        let mut preds: Vec<String> = Vec::new();
        for pred in predecessors {
            let pred = pred.into();
            if !preds.contains(&pred) {
                preds.push(pred);
            }
        }

        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(GraphNode {
            id,
            predecessors: preds,
        });
        Ok(())
    }

    /// Validates the graph and freezes it.
    ///
    /// Checks, in order: the graph is not empty, every predecessor exists,
    /// and there are no cycles. Committing twice is a no-op.
    pub fn commit(&mut self) -> Result<(), GraphError> {
        if self.committed {
            return Ok(());
        }

        if self.nodes.is_empty() {
            return Err(GraphError::EmptyWorkflow);
        }

        for node in &self.nodes {
            for pred in &node.predecessors {
                if !self.index.contains_key(pred) {
                    return Err(GraphError::UnknownPredecessor {
                        step: node.id.clone(),
                        predecessor: pred.clone(),
                    });
                }
            }
        }

        self.batches = self.compute_batches()?;
        self.committed = true;

        info!(
            "Step graph committed: {} steps in {} batches",
            self.nodes.len(),
            self.batches.len()
        );
        Ok(())
    }

    /// Returns true once [`commit`](Self::commit) has succeeded.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Lazily yields batches of step ids in dependency order.
    ///
    /// Every step appears after all of its predecessors; steps in the same
    /// batch have no dependency on each other.
    pub fn topological_order(&self) -> Result<Batches<'_>, GraphError> {
        if !self.committed {
            return Err(GraphError::NotCommitted);
        }
        Ok(Batches {
            inner: self.batches.iter(),
        })
    }

    /// All step ids, in topological order once committed and insertion
    /// order before that.
    pub fn ordered_ids(&self) -> Vec<&str> {
        if self.committed {
            self.batches
                .iter()
                .flat_map(|batch| batch.iter().map(String::as_str))
                .collect()
        } else {
            self.nodes.iter().map(|n| n.id.as_str()).collect()
        }
    }

    /// Declared predecessors of a step (empty for unknown steps).
    pub fn predecessors(&self, id: &str) -> &[String] {
        self.index
            .get(id)
            .map(|&i| self.nodes[i].predecessors.as_slice())
            .unwrap_or(&[])
    }

    /// Steps that declare `id` as a predecessor.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.predecessors.iter().any(|p| p == id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Returns true if the graph contains a step with this id.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no steps.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm, one level at a time.
    fn compute_batches(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.predecessors.len()).collect();

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for pred in &node.predecessors {
                successors[self.index[pred]].push(i);
            }
        }

        let mut current: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next: Vec<usize> = Vec::new();
            let mut batch: Vec<String> = Vec::with_capacity(current.len());

            while let Some(i) = current.pop_front() {
                batch.push(self.nodes[i].id.clone());
                placed += 1;

                for &succ in &successors[i] {
                    in_degree[succ] -= 1;
                    if in_degree[succ] == 0 {
                        next.push(succ);
                    }
                }
            }

            // Keep insertion order within a batch
            next.sort_unstable();
            current.extend(next);
            batches.push(batch);
        }

        if placed != self.nodes.len() {
            let cyclic: Vec<String> = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, n)| n.id.clone())
                .collect();
            return Err(GraphError::Cycle(cyclic));
        }

        debug!("Topological batches: {:?}", batches);
        Ok(batches)
    }
}

/// Lazy iterator over the batches of a committed [`StepGraph`].
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    inner: std::slice::Iter<'a, Vec<String>>,
}

impl<'a> Iterator for Batches<'a> {
    type Item = &'a [String];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Vec::as_slice)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
