//! Runs and the Runtime
//!
//! [`Runtime`] is the top-level orchestrator a process holds: it owns the
//! workflow registry, the engine, the snapshot store and the per-run
//! locks. A [`RunHandle`] is the caller's view of one run; it is the whole
//! caller-facing surface (`start`, `resume`, `watch` and read accessors).
//!
//! Every `start`/`resume` takes the run's exclusivity guard first, so the
//! engine is the only writer of a run while it advances.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::info;
use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::snapshot::{FileSnapshotStore, Snapshot, SnapshotStore};
use crate::workflow::model::WorkflowDefinition;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::state::{Run, RunStatus, StepResult};

use super::engine::{ExecutionEngine, ResumeRequest};
use super::error::RunError;
use super::lock::RunLocks;
use super::watch::{Subscription, WatchEvent, Watcher};

struct Shared {
    registry: WorkflowRegistry,
    engine: ExecutionEngine,
    locks: RunLocks,
}

/// Process-level entry point for creating, resuming and watching runs.
///
/// Cheap to clone; clones share the same engine, store and locks.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Creates a runtime with default settings over the given store.
    pub fn new(registry: WorkflowRegistry, store: Arc<dyn SnapshotStore>) -> Self {
        Self::with_config(registry, store, &EngineConfig::default())
    }

    /// Creates a runtime over the given store.
    ///
    /// `config.snapshot_dir` is ignored; the store is already chosen.
    pub fn with_config(
        registry: WorkflowRegistry,
        store: Arc<dyn SnapshotStore>,
        config: &EngineConfig,
    ) -> Self {
        let engine = ExecutionEngine::new(store, Watcher::new())
            .with_max_parallel(config.max_parallel);

        info!(
            "Runtime ready: {} workflows, max parallel {}, {:?} policy",
            registry.len(),
            engine.max_parallel(),
            config.concurrency
        );

        Self {
            shared: Arc::new(Shared {
                registry,
                engine,
                locks: RunLocks::new(config.concurrency),
            }),
        }
    }

    /// Creates a runtime persisting to `config.snapshot_dir`.
    pub fn from_config(registry: WorkflowRegistry, config: &EngineConfig) -> Self {
        let store = Arc::new(FileSnapshotStore::new(config.snapshot_dir.clone()));
        Self::with_config(registry, store, config)
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.shared.registry
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        self.shared.engine.store()
    }

    pub fn watcher(&self) -> &Arc<Watcher> {
        self.shared.engine.watcher()
    }

    /// Looks up a registered workflow.
    pub fn workflow(&self, name: &str) -> Result<Arc<WorkflowDefinition>, RunError> {
        self.shared
            .registry
            .get(name)
            .ok_or_else(|| RunError::UnknownWorkflow(name.to_string()))
    }

    /// Prepares a new run with a generated id. Nothing is stored until
    /// [`RunHandle::start`].
    pub fn create_run(&self, workflow: &str) -> Result<RunHandle, RunError> {
        self.create_run_with_id(workflow, Uuid::new_v4().to_string())
    }

    /// Prepares a new run with a caller-chosen id.
    pub fn create_run_with_id(
        &self,
        workflow: &str,
        run_id: impl Into<String>,
    ) -> Result<RunHandle, RunError> {
        Ok(RunHandle {
            shared: Arc::clone(&self.shared),
            workflow: self.workflow(workflow)?,
            run_id: run_id.into(),
            view: None,
        })
    }

    /// Rebuilds a handle for a stored run, e.g. in a new process.
    pub fn attach(&self, workflow: &str, run_id: &str) -> Result<RunHandle, RunError> {
        let mut handle = self.create_run_with_id(workflow, run_id)?;
        handle.view = Some(handle.load()?);
        Ok(handle)
    }

    /// Resumes a suspended step of a stored run.
    pub fn resume(
        &self,
        workflow: &str,
        run_id: &str,
        step_id: &str,
        context: Value,
    ) -> Result<Run, RunError> {
        self.create_run_with_id(workflow, run_id)?
            .resume(step_id, context)
    }

    /// Registers a callback for a run's transition events.
    pub fn watch<F>(&self, run_id: &str, callback: F) -> Subscription
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.watcher().subscribe(run_id, callback)
    }

    /// Ids of all stored runs.
    pub fn list_runs(&self) -> Result<Vec<String>, RunError> {
        Ok(self.store().list_runs()?)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workflows", &self.shared.registry.names())
            .field("engine", &self.shared.engine)
            .field("policy", &self.shared.locks.policy())
            .finish()
    }
}

/// The caller's handle on one run.
///
/// Holds the last state this handle saw persisted. After a failed
/// `start`/`resume` the view is the last successfully saved state.
pub struct RunHandle {
    shared: Arc<Shared>,
    workflow: Arc<WorkflowDefinition>,
    run_id: String,
    view: Option<Run>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    /// Creates the run from trigger data and drives it to its first fixed
    /// point.
    ///
    /// The returned state may be partial if a path suspended.
    pub fn start(&mut self, trigger_data: Value) -> Result<Run, RunError> {
        let shared = Arc::clone(&self.shared);
        let _guard = shared.locks.acquire(&self.run_id)?;

        if let Some(contract) = self.workflow.trigger_contract() {
            contract.validate(&trigger_data)?;
        }

        match shared.engine.store().load(&self.run_id) {
            Ok(_) => return Err(RunError::RunExists(self.run_id.clone())),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        let mut run = Run::new(
            self.run_id.as_str(),
            self.workflow.name(),
            trigger_data,
            self.workflow.step_ids(),
        );
        shared
            .engine
            .store()
            .save(&self.run_id, &Snapshot::capture(&run))?;
        self.view = Some(run.clone());

        info!(
            "Starting run '{}' of workflow '{}'",
            self.run_id,
            self.workflow.name()
        );
        let result = shared.engine.execute(&self.workflow, &mut run, None);
        self.settle(run, result)
    }

    /// Resumes a suspended step with an external context.
    ///
    /// Fails with [`RunError::UnknownRun`] if nothing is stored for this
    /// run and [`RunError::NotSuspended`] if the step is not suspended;
    /// in both cases stored state is unchanged.
    pub fn resume(&mut self, step_id: &str, context: Value) -> Result<Run, RunError> {
        let shared = Arc::clone(&self.shared);
        let _guard = shared.locks.acquire(&self.run_id)?;

        let mut run = self.load()?;
        let request = ResumeRequest::new(step_id, context);
        let result = shared.engine.execute(&self.workflow, &mut run, Some(request));
        self.settle(run, result)
    }

    /// Registers a callback for this run's transition events.
    pub fn watch<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.shared.engine.watcher().subscribe(&self.run_id, callback)
    }

    /// Reloads the view from the store.
    pub fn refresh(&mut self) -> Result<&Run, RunError> {
        let run = self.load()?;
        Ok(self.view.insert(run))
    }

    /// The last state this handle saw, if the run has been started or
    /// attached.
    pub fn current(&self) -> Option<&Run> {
        self.view.as_ref()
    }

    pub fn step_results(&self) -> Option<&BTreeMap<String, StepResult>> {
        self.view.as_ref().map(|run| &run.step_results)
    }

    pub fn active_paths(&self) -> Option<&BTreeSet<String>> {
        self.view.as_ref().map(|run| &run.active_paths)
    }

    pub fn status(&self) -> Option<RunStatus> {
        self.view.as_ref().map(Run::status)
    }

    fn load(&self) -> Result<Run, RunError> {
        let run = match self.shared.engine.store().load(&self.run_id) {
            Ok(snapshot) => snapshot.into_run(),
            Err(err) if err.is_not_found() => {
                return Err(RunError::UnknownRun(self.run_id.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        if run.workflow != self.workflow.name() {
            return Err(RunError::WorkflowMismatch {
                run_id: self.run_id.clone(),
                expected: self.workflow.name().to_string(),
                actual: run.workflow,
            });
        }
        Ok(run)
    }

    /// Adopts the engine's run as the new view.
    ///
    /// On error the engine has already rolled `run` back to its last saved
    /// state.
    fn settle(
        &mut self,
        run: Run,
        result: Result<RunStatus, RunError>,
    ) -> Result<Run, RunError> {
        let current = run.clone();
        self.view = Some(run);
        result.map(|_| current)
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("workflow", &self.workflow.name())
            .field("status", &self.status())
            .finish()
    }
}
