//! Workflow Execution Engine
//!
//! Drives a run to a fixed point: every reachable step has succeeded,
//! suspended, or failed, and nothing else can start.
//!
//! - Batch scheduling over the graph's topological order
//! - Parallel execution of ready steps on scoped worker threads
//! - A snapshot after every step transition
//! - Rollback of the in-memory run to the last durable snapshot when a
//!   save fails

use std::collections::BTreeMap;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::snapshot::{Snapshot, SnapshotStore};
use crate::workflow::model::{StepDefinition, WorkflowDefinition};
use crate::workflow::state::{
    FailureKind, Run, RunStatus, StepFailure, StepStatus, TransitionError,
};

use super::error::RunError;
use super::step::{invoke_step, merge_inputs, merge_resume, Invocation, StepContext, StepOutcome};
use super::suspend::{Continuation, SuspendController};
use super::watch::{WatchEvent, Watcher};

/// Targets one suspended step when re-entering a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeRequest {
    pub step_id: String,
    /// Merged over the input the step suspended with
    pub context: Value,
}

impl ResumeRequest {
    pub fn new(step_id: impl Into<String>, context: Value) -> Self {
        Self {
            step_id: step_id.into(),
            context,
        }
    }
}

/// Workflow execution engine.
///
/// The engine holds no per-run state; callers own the [`Run`] and must
/// hold the run's exclusivity guard while calling [`execute`](Self::execute).
pub struct ExecutionEngine {
    store: Arc<dyn SnapshotStore>,
    watcher: Arc<Watcher>,
    max_parallel: usize,
}

impl ExecutionEngine {
    /// Creates an engine that runs up to one step per logical CPU at once.
    pub fn new(store: Arc<dyn SnapshotStore>, watcher: Arc<Watcher>) -> Self {
        Self {
            store,
            watcher,
            max_parallel: num_cpus::get().max(1),
        }
    }

    /// Sets the maximum number of steps executing at once.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    /// Drives a run to its next fixed point.
    ///
    /// With a [`ResumeRequest`], the targeted suspended step is re-entered
    /// first. Returns the run status once nothing more can start.
    ///
    /// On a storage failure `run` is rolled back to the last snapshot that
    /// was saved, watchers get a [`WatchEvent::reverted`] event, and the
    /// error is returned. A rejected resume leaves `run` as it was passed in.
    pub fn execute(
        &self,
        workflow: &WorkflowDefinition,
        run: &mut Run,
        resume: Option<ResumeRequest>,
    ) -> Result<RunStatus, RunError> {
        let mut durable = run.clone();

        for step_id in run.requeue_interrupted() {
            warn!(
                "Step '{}' of run '{}' was interrupted mid-execution; rescheduling",
                step_id, run.run_id
            );
        }

        if let Some(request) = resume {
            if let Err(err) = self.resume_step(workflow, run, &mut durable, request) {
                // Undo the requeue too; a rejected resume leaves the run as stored
                *run = durable;
                return Err(err);
            }
        }

        for batch in workflow.graph().topological_order()? {
            let ready: Vec<&str> = batch
                .iter()
                .map(String::as_str)
                .filter(|id| is_eligible(workflow, run, id))
                .collect();

            if ready.is_empty() {
                continue;
            }
            debug!("Run '{}': ready steps {:?}", run.run_id, ready);

            for chunk in ready.chunks(self.max_parallel) {
                self.run_chunk(workflow, run, &mut durable, chunk)?;
            }
        }

        self.persist(run, &mut durable)?;
        self.watcher.emit(&WatchEvent::settled(run));

        let status = run.status();
        info!("Run '{}' settled: {}", run.run_id, status);
        Ok(status)
    }

    /// Re-enters a suspended step at its stored continuation.
    fn resume_step(
        &self,
        workflow: &WorkflowDefinition,
        run: &mut Run,
        durable: &mut Run,
        request: ResumeRequest,
    ) -> Result<(), RunError> {
        let step_id = request.step_id.as_str();
        let not_suspended = |run: &Run| RunError::NotSuspended {
            run_id: run.run_id.clone(),
            step_id: step_id.to_string(),
            status: run.status_of(step_id),
        };

        let step = workflow.step(step_id).ok_or_else(|| not_suspended(run))?;
        let continuation = match run.step(step_id) {
            Some(result) if result.status == StepStatus::Suspended => result.continuation.clone(),
            _ => None,
        }
        .ok_or_else(|| not_suspended(run))?;

        info!(
            "Resuming step '{}' of run '{}' at point {}",
            step_id, run.run_id, continuation.point
        );

        let input = merge_resume(&continuation.input, request.context);
        if !self.admit(step, run, durable, &input)? {
            return Ok(());
        }

        let ctx = step_context(
            workflow,
            run,
            step,
            input,
            SuspendController::resuming(&continuation),
        );
        let invocation = invoke_step(step, ctx);
        self.record(run, durable, step, invocation)
    }

    /// Starts a group of ready steps and records their outcomes.
    fn run_chunk(
        &self,
        workflow: &WorkflowDefinition,
        run: &mut Run,
        durable: &mut Run,
        chunk: &[&str],
    ) -> Result<(), RunError> {
        let mut jobs: Vec<(&StepDefinition, StepContext)> = Vec::with_capacity(chunk.len());

        for &step_id in chunk {
            let step = workflow
                .step(step_id)
                .ok_or_else(|| TransitionError::UnknownStep(step_id.to_string()))?;

            let input = merge_inputs(
                &run.trigger_data,
                workflow.graph().predecessors(step_id).iter().filter_map(|pred| {
                    let output = run.step(pred)?.output.as_ref()?;
                    Some((pred.as_str(), output))
                }),
            );

            if self.admit(step, run, durable, &input)? {
                let ctx = step_context(workflow, run, step, input, SuspendController::fresh());
                jobs.push((step, ctx));
            }
        }

        if jobs.len() <= 1 {
            for (step, ctx) in jobs {
                let invocation = invoke_step(step, ctx);
                self.record(run, durable, step, invocation)?;
            }
            return Ok(());
        }

        debug!("Running {} steps in parallel", jobs.len());

        thread::scope(|scope| -> Result<(), RunError> {
            let (tx, rx) = channel::<(&StepDefinition, Invocation)>();

            for (step, ctx) in jobs {
                let tx = tx.clone();
                scope.spawn(move || {
                    let invocation = invoke_step(step, ctx);
                    if tx.send((step, invocation)).is_err() {
                        error!("Failed to report completion of step '{}'", step.id);
                    }
                });
            }
            drop(tx);

            // Outcomes are recorded in completion order
            for (step, invocation) in rx {
                self.record(run, durable, step, invocation)?;
            }
            Ok(())
        })
    }

    /// Marks a step running after checking its input contract.
    ///
    /// Returns false if the input was rejected; the step is then already
    /// recorded as failed.
    fn admit(
        &self,
        step: &StepDefinition,
        run: &mut Run,
        durable: &mut Run,
        input: &Value,
    ) -> Result<bool, RunError> {
        run.mark_running(&step.id)?;
        self.watcher
            .emit(&WatchEvent::step(run, &step.id, StepStatus::Running));

        let Some(contract) = step.input_contract() else {
            return Ok(true);
        };
        let Err(err) = contract.validate(input) else {
            return Ok(true);
        };

        warn!("Step '{}' rejected its input: {}", step.id, err);
        run.mark_failed(
            &step.id,
            StepFailure::new(FailureKind::Validation, err.to_string()),
        )?;
        self.persist(run, durable)?;
        self.watcher
            .emit(&WatchEvent::step(run, &step.id, StepStatus::Failed));
        Ok(false)
    }

    /// Applies one invocation's outcome, persists, then notifies watchers.
    fn record(
        &self,
        run: &mut Run,
        durable: &mut Run,
        step: &StepDefinition,
        invocation: Invocation,
    ) -> Result<(), RunError> {
        let step_id = step.id.as_str();

        let status = match invocation.outcome {
            Ok(StepOutcome::Complete(output)) => {
                match step.output_contract().map(|c| c.validate(&output)) {
                    Some(Err(err)) => {
                        warn!("Step '{}' produced a rejected output: {}", step_id, err);
                        run.mark_failed(
                            step_id,
                            StepFailure::new(FailureKind::Validation, err.to_string()),
                        )?;
                        StepStatus::Failed
                    }
                    _ => {
                        info!("Step '{}' completed successfully", step_id);
                        run.mark_success(step_id, output)?;
                        StepStatus::Success
                    }
                }
            }
            Ok(StepOutcome::Suspend(token)) => {
                info!(
                    "Step '{}' suspended at point {}",
                    step_id, token.point
                );
                run.mark_suspended(
                    step_id,
                    token.payload,
                    Continuation {
                        point: token.point,
                        locals: token.locals,
                        input: invocation.input,
                    },
                )?;
                StepStatus::Suspended
            }
            Err(failure) => {
                error!("Step '{}' failed: {}", step_id, failure);
                run.mark_failed(step_id, failure)?;
                StepStatus::Failed
            }
        };

        self.persist(run, durable)?;
        self.watcher.emit(&WatchEvent::step(run, step_id, status));
        Ok(())
    }

    /// Saves a snapshot of the run, or rolls it back if the save fails.
    fn persist(&self, run: &mut Run, durable: &mut Run) -> Result<(), RunError> {
        run.touch();

        match self.store.save(&run.run_id, &Snapshot::capture(run)) {
            Ok(()) => {
                *durable = run.clone();
                Ok(())
            }
            Err(err) => {
                error!(
                    "Failed to persist run '{}', rolling back to last snapshot: {}",
                    run.run_id, err
                );
                *run = durable.clone();
                self.watcher.emit(&WatchEvent::reverted(run));
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("max_parallel", &self.max_parallel)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

/// A step may start once it is pending and every predecessor succeeded.
fn is_eligible(workflow: &WorkflowDefinition, run: &Run, step_id: &str) -> bool {
    run.status_of(step_id) == Some(StepStatus::Pending)
        && workflow
            .graph()
            .predecessors(step_id)
            .iter()
            .all(|pred| run.status_of(pred) == Some(StepStatus::Success))
}

fn step_context(
    workflow: &WorkflowDefinition,
    run: &Run,
    step: &StepDefinition,
    input: Value,
    suspend: SuspendController,
) -> StepContext {
    let outputs: BTreeMap<String, Value> = workflow
        .graph()
        .predecessors(&step.id)
        .iter()
        .filter_map(|pred| {
            let output = run.step(pred)?.output.clone()?;
            Some((pred.clone(), output))
        })
        .collect();

    StepContext::new(
        run.run_id.clone(),
        step.id.clone(),
        input,
        run.trigger_data.clone(),
        outputs,
        suspend,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::watch::EventStatus::{Reverted, Run as RunEvent, Step};
    use crate::snapshot::{InMemorySnapshotStore, StorageError};
    use crate::workflow::contract::{FieldType, Shape};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};

    /// Store that starts failing after a number of successful saves.
    struct FlakyStore {
        inner: InMemorySnapshotStore,
        saves_left: AtomicUsize,
    }

    impl FlakyStore {
        fn failing_after(saves: usize) -> Self {
            Self {
                inner: InMemorySnapshotStore::new(),
                saves_left: AtomicUsize::new(saves),
            }
        }
    }

    impl SnapshotStore for FlakyStore {
        fn save(&self, run_id: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
            let left = self.saves_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            self.saves_left.store(left - 1, Ordering::SeqCst);
            self.inner.save(run_id, snapshot)
        }

        fn load(&self, run_id: &str) -> Result<Snapshot, StorageError> {
            self.inner.load(run_id)
        }

        fn list_runs(&self) -> Result<Vec<String>, StorageError> {
            self.inner.list_runs()
        }
    }

    fn engine(store: Arc<dyn SnapshotStore>) -> ExecutionEngine {
        ExecutionEngine::new(store, Watcher::new()).with_max_parallel(4)
    }

    fn new_run(workflow: &WorkflowDefinition, trigger: Value) -> Run {
        Run::new("run-1", workflow.name(), trigger, workflow.step_ids())
    }

    fn complete(value: Value) -> StepDefinition {
        let id = value["id"].as_str().unwrap_or("step").to_string();
        StepDefinition::from_fn(id, move |_| Ok(StepOutcome::Complete(value.clone())))
    }

    fn gate_workflow() -> WorkflowDefinition {
        WorkflowDefinition::builder("gate")
            .then(StepDefinition::from_fn("step_a", |_| {
                Ok(StepOutcome::Complete(json!({"v": 5})))
            }))
            .then(StepDefinition::from_fn("step_b", |ctx| {
                let v = ctx.input()["v"].as_i64().unwrap_or(0);
                if v < 100 {
                    return Ok(ctx.suspend_at(ctx.resume_point().max(1), json!({"need": "v >= 100"})));
                }
                Ok(StepOutcome::Complete(json!({"accepted": v})))
            }))
            .then(complete(json!({"id": "step_c", "done": true})))
            .commit()
            .unwrap()
    }

    #[test]
    fn test_linear_run_completes() {
        let workflow = WorkflowDefinition::builder("linear")
            .then(StepDefinition::from_fn("first", |_| {
                Ok(StepOutcome::Complete(json!({"n": 2})))
            }))
            .then(StepDefinition::from_fn("second", |ctx| {
                let n = ctx.output_of("first").and_then(|o| o["n"].as_i64()).unwrap_or(0);
                Ok(StepOutcome::Complete(json!({"n": n * 10})))
            }))
            .commit()
            .unwrap();

        let store = Arc::new(InMemorySnapshotStore::new());
        let engine = engine(store.clone());
        let mut run = new_run(&workflow, json!({}));

        let status = engine.execute(&workflow, &mut run, None).unwrap();

        assert_eq!(status, RunStatus::Completed);
        assert_eq!(run.step("second").unwrap().output, Some(json!({"n": 20})));
        assert!(run.active_paths.is_empty());
        assert_eq!(store.load("run-1").unwrap().into_run(), run);
    }

    #[test]
    fn test_suspend_halts_dependents() {
        let workflow = gate_workflow();
        let store = Arc::new(InMemorySnapshotStore::new());
        let engine = engine(store.clone());
        let mut run = new_run(&workflow, json!({}));

        let status = engine.execute(&workflow, &mut run, None).unwrap();

        assert_eq!(status, RunStatus::Suspended);
        assert_eq!(run.status_of("step_b"), Some(StepStatus::Suspended));
        assert_eq!(run.status_of("step_c"), Some(StepStatus::Pending));
        assert!(run.active_paths.contains("step_b"));

        let stored = store.load("run-1").unwrap().into_run();
        let b = stored.step("step_b").unwrap();
        assert_eq!(b.suspend_payload, Some(json!({"need": "v >= 100"})));
        assert_eq!(b.continuation.as_ref().unwrap().input, json!({"v": 5}));
    }

    #[test]
    fn test_resume_continues_downstream() {
        let workflow = gate_workflow();
        let store = Arc::new(InMemorySnapshotStore::new());
        let engine = engine(store.clone());
        let mut run = new_run(&workflow, json!({}));
        engine.execute(&workflow, &mut run, None).unwrap();

        let status = engine
            .execute(
                &workflow,
                &mut run,
                Some(ResumeRequest::new("step_b", json!({"v": 150}))),
            )
            .unwrap();

        assert_eq!(status, RunStatus::Completed);
        let b = run.step("step_b").unwrap();
        assert_eq!(b.output, Some(json!({"accepted": 150})));
        assert_eq!(b.resume_count, 1);
        assert_eq!(run.status_of("step_c"), Some(StepStatus::Success));
    }

    #[test]
    fn test_resume_rejects_non_suspended_step() {
        let workflow = gate_workflow();
        let engine = engine(Arc::new(InMemorySnapshotStore::new()));
        let mut run = new_run(&workflow, json!({}));
        engine.execute(&workflow, &mut run, None).unwrap();

        let err = engine
            .execute(&workflow, &mut run, Some(ResumeRequest::new("step_a", json!({}))))
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::NotSuspended { status: Some(StepStatus::Success), .. }
        ));

        let err = engine
            .execute(&workflow, &mut run, Some(ResumeRequest::new("nope", json!({}))))
            .unwrap_err();
        assert!(matches!(err, RunError::NotSuspended { status: None, .. }));
    }

    #[test]
    fn test_failed_branch_does_not_stop_sibling() {
        let workflow = WorkflowDefinition::builder("fork")
            .step(complete(json!({"id": "root"})))
            .step(
                StepDefinition::from_fn("left", |_| Err("left broke".into())).after("root"),
            )
            .step(complete(json!({"id": "left_tail"})).after("left"))
            .step(complete(json!({"id": "right", "ok": 1})).after("root"))
            .step(complete(json!({"id": "right_tail"})).after("right"))
            .commit()
            .unwrap();

        let engine = engine(Arc::new(InMemorySnapshotStore::new()));
        let mut run = new_run(&workflow, json!({}));
        let status = engine.execute(&workflow, &mut run, None).unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(run.status_of("left"), Some(StepStatus::Failed));
        assert_eq!(run.status_of("left_tail"), Some(StepStatus::Pending));
        assert_eq!(run.status_of("right"), Some(StepStatus::Success));
        assert_eq!(run.status_of("right_tail"), Some(StepStatus::Success));
        assert_eq!(run.blocked_steps(workflow.graph()), vec!["left_tail".to_string()]);
    }

    #[test]
    fn test_panicking_step_fails_alone() {
        let workflow = WorkflowDefinition::builder("panics")
            .step(StepDefinition::from_fn("bad", |_| panic!("step exploded")))
            .step(complete(json!({"id": "good"})))
            .commit()
            .unwrap();

        let engine = engine(Arc::new(InMemorySnapshotStore::new()));
        let mut run = new_run(&workflow, json!({}));
        engine.execute(&workflow, &mut run, None).unwrap();

        let bad = run.step("bad").unwrap();
        assert_eq!(bad.status, StepStatus::Failed);
        assert_eq!(bad.error.as_ref().unwrap().kind, FailureKind::Panic);
        assert_eq!(run.status_of("good"), Some(StepStatus::Success));
    }

    #[test]
    fn test_input_contract_rejects_before_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let workflow = WorkflowDefinition::builder("contracts")
            .then(
                StepDefinition::from_fn("needs_email", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(StepOutcome::Complete(Value::Null))
                })
                .with_input_contract(Shape::object().field("email", FieldType::String)),
            )
            .commit()
            .unwrap();

        let engine = engine(Arc::new(InMemorySnapshotStore::new()));
        let mut run = new_run(&workflow, json!({"email": 42}));
        engine.execute(&workflow, &mut run, None).unwrap();

        let result = run.step("needs_email").unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_ref().unwrap().kind, FailureKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_output_contract_fails_step() {
        let workflow = WorkflowDefinition::builder("contracts")
            .then(
                complete(json!({"id": "emit"}))
                    .with_output_contract(Shape::object().field("count", FieldType::Integer)),
            )
            .then(complete(json!({"id": "after"})))
            .commit()
            .unwrap();

        let engine = engine(Arc::new(InMemorySnapshotStore::new()));
        let mut run = new_run(&workflow, json!({}));
        engine.execute(&workflow, &mut run, None).unwrap();

        let emit = run.step("emit").unwrap();
        assert_eq!(emit.status, StepStatus::Failed);
        assert_eq!(emit.error.as_ref().unwrap().kind, FailureKind::Validation);
        assert!(emit.output.is_none());
        assert_eq!(run.status_of("after"), Some(StepStatus::Pending));
    }

    #[test]
    fn test_storage_failure_rolls_back() {
        let workflow = WorkflowDefinition::builder("linear")
            .then(complete(json!({"id": "a"})))
            .then(complete(json!({"id": "b"})))
            .commit()
            .unwrap();

        // The save after `a` succeeds, the one after `b` fails
        let store = Arc::new(FlakyStore::failing_after(1));
        let engine = engine(store.clone());
        let mut run = new_run(&workflow, json!({}));

        let err = engine.execute(&workflow, &mut run, None).unwrap_err();
        assert!(matches!(err, RunError::Storage(StorageError::Unavailable(_))));

        assert_eq!(run.status_of("a"), Some(StepStatus::Success));
        assert_eq!(run.status_of("b"), Some(StepStatus::Pending));
        assert!(run.active_paths.is_empty());
        assert_eq!(store.load("run-1").unwrap().into_run(), run);
    }

    #[test]
    fn test_storage_failure_tells_watchers() {
        let workflow = WorkflowDefinition::builder("linear")
            .then(complete(json!({"id": "a"})))
            .then(complete(json!({"id": "b"})))
            .commit()
            .unwrap();

        let watcher = Watcher::new();
        let engine = ExecutionEngine::new(Arc::new(FlakyStore::failing_after(1)), Arc::clone(&watcher));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = watcher.subscribe("run-1", move |event| {
            sink.lock()
                .unwrap()
                .push((event.step_id.clone(), event.status, event.active_paths.len()));
        });

        let mut run = new_run(&workflow, json!({}));
        engine.execute(&workflow, &mut run, None).unwrap_err();

        let a = Some("a".to_string());
        let b = Some("b".to_string());
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (a.clone(), Step(StepStatus::Running), 1),
                (a, Step(StepStatus::Success), 0),
                (b, Step(StepStatus::Running), 1),
                // `b` is back to pending, so nothing is active
                (None, Reverted(RunStatus::Running), 0),
            ]
        );
    }

    #[test]
    fn test_ready_steps_run_in_parallel() {
        // Both bodies wait on the same barrier, so this only finishes if
        // they run at the same time.
        let barrier = Arc::new(Barrier::new(2));
        let make = |id: &str| {
            let barrier = Arc::clone(&barrier);
            StepDefinition::from_fn(id, move |_| {
                barrier.wait();
                Ok(StepOutcome::Complete(Value::Null))
            })
        };

        let workflow = WorkflowDefinition::builder("parallel")
            .step(make("left"))
            .step(make("right"))
            .step(complete(json!({"id": "join"})).after("left").after("right"))
            .commit()
            .unwrap();

        let engine = engine(Arc::new(InMemorySnapshotStore::new()));
        let mut run = new_run(&workflow, json!({}));
        let status = engine.execute(&workflow, &mut run, None).unwrap();

        assert_eq!(status, RunStatus::Completed);
    }

    #[test]
    fn test_max_parallel_one_runs_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |id: &'static str| {
            let order = Arc::clone(&order);
            StepDefinition::from_fn(id, move |_| {
                order.lock().unwrap().push(id);
                Ok(StepOutcome::Complete(Value::Null))
            })
        };

        let workflow = WorkflowDefinition::builder("serial")
            .step(make("x"))
            .step(make("y"))
            .step(make("z"))
            .commit()
            .unwrap();

        let engine = ExecutionEngine::new(Arc::new(InMemorySnapshotStore::new()), Watcher::new())
            .with_max_parallel(1);
        let mut run = new_run(&workflow, json!({}));
        engine.execute(&workflow, &mut run, None).unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_events_follow_transitions() {
        let workflow = gate_workflow();
        let watcher = Watcher::new();
        let engine = ExecutionEngine::new(Arc::new(InMemorySnapshotStore::new()), Arc::clone(&watcher));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = watcher.subscribe("run-1", move |event| {
            sink.lock()
                .unwrap()
                .push((event.step_id.clone(), event.status));
        });

        let mut run = new_run(&workflow, json!({}));
        engine.execute(&workflow, &mut run, None).unwrap();

        let a = Some("step_a".to_string());
        let b = Some("step_b".to_string());
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (a.clone(), Step(StepStatus::Running)),
                (a, Step(StepStatus::Success)),
                (b.clone(), Step(StepStatus::Running)),
                (b, Step(StepStatus::Suspended)),
                (None, RunEvent(RunStatus::Suspended)),
            ]
        );
    }

    #[test]
    fn test_interrupted_step_is_rescheduled() {
        let workflow = WorkflowDefinition::builder("linear")
            .then(complete(json!({"id": "a"})))
            .commit()
            .unwrap();

        let engine = engine(Arc::new(InMemorySnapshotStore::new()));
        let mut run = new_run(&workflow, json!({}));
        // Left behind by a crash between start and completion
        run.mark_running("a").unwrap();

        let status = engine.execute(&workflow, &mut run, None).unwrap();
        assert_eq!(status, RunStatus::Completed);
    }

    #[test]
    fn test_rejected_resume_keeps_interrupted_state() {
        let workflow = gate_workflow();
        let store = Arc::new(InMemorySnapshotStore::new());
        let engine = engine(store.clone());
        let mut run = new_run(&workflow, json!({}));
        // Crashed while `step_a` was running
        run.mark_running("step_a").unwrap();
        let stored = run.clone();

        let err = engine
            .execute(&workflow, &mut run, Some(ResumeRequest::new("step_c", json!({}))))
            .unwrap_err();

        assert!(matches!(
            err,
            RunError::NotSuspended { status: Some(StepStatus::Pending), .. }
        ));
        assert_eq!(run, stored);
        assert_eq!(run.status_of("step_a"), Some(StepStatus::Running));
        assert!(store.list_runs().unwrap().is_empty());
    }
}
