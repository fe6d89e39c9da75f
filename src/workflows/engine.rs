// Workflow engine
//
// Workflows are queued on creation and run one at a time by a single worker.
// Steps run in declaration order; a step whose dependencies have not completed
// fails the workflow. Failed attempts are retried immediately until the step's
// attempt limit is reached.

use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::analysis::{analyze_workflow, WorkflowMetrics};
use super::handlers::{HandlerRegistry, StepContext, StepHandler};
use super::types::{StepKind, Workflow, WorkflowRequest, WorkflowStatus, WorkflowSummary};
use crate::agent_lifecycle::AgentStateMachine;
use crate::config::WorkflowConfig;
use crate::events::{EventBus, EventCategory, EventKind, PublishRequest};
use crate::observability::{CoreMetrics, OperationTimer};
use crate::persistence::{PersistenceHook, Snapshot};
use crate::priority::EventPriority;
use crate::shutdown::ShutdownSignal;
use crate::telemetry::{create_workflow_span, generate_correlation_id};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(Uuid),

    #[error("Dependency {dependency} not met for step {step_id}")]
    DependencyNotMet { step_id: Uuid, dependency: Uuid },

    #[error("Step {step_id} failed on attempt {attempt}: {message}")]
    StepExecutionFailed {
        step_id: Uuid,
        attempt: u32,
        message: String,
    },

    #[error("Step {step_id} failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        step_id: Uuid,
        attempts: u32,
        last_error: String,
    },

    #[error("No handler registered for step kind {0}")]
    NoHandler(StepKind),

    #[error("Workflow engine is not running")]
    EngineStopped,

    #[error("Workflow worker already started")]
    AlreadyStarted,
}

/// How a workflow run ended
enum RunOutcome {
    Completed,
    Failed(WorkflowError),
    Cancelled(String),
}

/// Data handed to a step attempt, gathered under the workflow lock
struct PreparedStep {
    handler_kind: StepKind,
    max_retries: u32,
    context: StepContext,
}

pub struct WorkflowEngine {
    config: WorkflowConfig,
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    handlers: RwLock<HandlerRegistry>,
    queue: mpsc::UnboundedSender<Uuid>,
    queue_receiver: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    active: Mutex<Option<Uuid>>,
    cancel_requests: Mutex<HashSet<Uuid>>,
    // Event chain opened for each workflow
    chains: Mutex<HashMap<Uuid, Uuid>>,
    running: AtomicBool,
    // Bumped whenever a workflow reaches a terminal status or the worker exits
    finished: watch::Sender<u64>,
    event_bus: Option<EventBus>,
    state_machine: Option<Arc<AgentStateMachine>>,
    persistence: PersistenceHook,
    metrics: Arc<CoreMetrics>,
}

impl WorkflowEngine {
    pub fn new(config: WorkflowConfig) -> Self {
        let (queue, queue_receiver) = mpsc::unbounded_channel();
        let (finished, _) = watch::channel(0);

        Self {
            config,
            workflows: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HandlerRegistry::new()),
            queue,
            queue_receiver: Mutex::new(Some(queue_receiver)),
            active: Mutex::new(None),
            cancel_requests: Mutex::new(HashSet::new()),
            chains: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            finished,
            event_bus: None,
            state_machine: None,
            persistence: PersistenceHook::disabled(),
            metrics: Arc::new(CoreMetrics::new()),
        }
    }

    /// Publish progress events on this bus
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Read the agent's current state into every step context
    pub fn with_state_machine(mut self, machine: Arc<AgentStateMachine>) -> Self {
        self.state_machine = Some(machine);
        self
    }

    pub fn with_persistence(mut self, hook: PersistenceHook) -> Self {
        self.persistence = hook;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CoreMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_handler(self, kind: StepKind, handler: Arc<dyn StepHandler>) -> Self {
        self.register_handler(kind, handler);
        self
    }

    pub fn register_handler(&self, kind: StepKind, handler: Arc<dyn StepHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(kind, handler);
        debug!(kind = %kind, "Step handler registered");
    }

    /// Spawn the worker that drains the queue
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) -> Result<JoinHandle<()>, WorkflowError> {
        let receiver = lock(&self.queue_receiver)
            .take()
            .ok_or(WorkflowError::AlreadyStarted)?;
        self.running.store(true, Ordering::SeqCst);

        let engine = Arc::clone(self);
        Ok(tokio::spawn(async move {
            engine.run_worker(receiver, shutdown).await;
        }))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Create a workflow and queue it for execution
    pub fn create(&self, request: WorkflowRequest) -> Result<Workflow, WorkflowError> {
        let workflow = Workflow::from_request(request, self.config.default_max_retries);
        let id = workflow.id;

        {
            let mut workflows = lock(&self.workflows);
            if let Some(parent_id) = workflow.parent_id {
                let parent = workflows
                    .get_mut(&parent_id)
                    .ok_or(WorkflowError::NotFound(parent_id))?;
                parent.children.push(id);
            }
            workflows.insert(id, workflow.clone());
            self.persistence.submit(snapshot_of(&workflows));
        }

        if let Some(bus) = &self.event_bus {
            let mut metadata = Map::new();
            metadata.insert("workflow_id".to_string(), json!(id));
            let chain_id = bus.start_chain(EventCategory::Workflow, metadata);
            lock(&self.chains).insert(id, chain_id);
        }

        info!(
            workflow_id = %id,
            name = %workflow.name,
            kind = %workflow.kind,
            steps = workflow.steps.len(),
            "Workflow created"
        );
        self.publish(
            id,
            EventKind::WORKFLOW_CREATED,
            EventPriority::Normal,
            json!({
                "workflow_id": id,
                "name": workflow.name,
                "kind": workflow.kind,
                "steps": workflow.steps.len(),
                "parent_id": workflow.parent_id,
            }),
        );

        if self.queue.send(id).is_err() {
            // Receiver dropped: the worker ran and has exited
            error!(workflow_id = %id, "Workflow queue closed, worker has stopped");
            self.fail_unqueued(id);
            return Err(WorkflowError::EngineStopped);
        }
        Ok(workflow)
    }

    /// Wait for the worker to finish the workflow and return its summary.
    ///
    /// Fails with `EngineStopped` if the worker is not running while the
    /// workflow is still pending or in progress.
    pub async fn execute(&self, workflow_id: Uuid) -> Result<WorkflowSummary, WorkflowError> {
        let mut finished = self.finished.subscribe();
        loop {
            let summary = self.status(workflow_id)?;
            if summary.status.is_terminal() {
                return Ok(summary);
            }
            if !self.is_running() {
                return Err(WorkflowError::EngineStopped);
            }
            if finished.changed().await.is_err() {
                return Err(WorkflowError::EngineStopped);
            }
        }
    }

    pub fn status(&self, workflow_id: Uuid) -> Result<WorkflowSummary, WorkflowError> {
        lock(&self.workflows)
            .get(&workflow_id)
            .map(Workflow::summary)
            .ok_or(WorkflowError::NotFound(workflow_id))
    }

    pub fn get(&self, workflow_id: Uuid) -> Option<Workflow> {
        lock(&self.workflows).get(&workflow_id).cloned()
    }

    /// All workflows, oldest first
    pub fn list(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> =
            lock(&self.workflows).values().map(Workflow::summary).collect();
        summaries.sort_by_key(|summary| summary.created_at);
        summaries
    }

    /// The workflow the worker is running right now
    pub fn active_workflow(&self) -> Option<Uuid> {
        *lock(&self.active)
    }

    /// Cancel a workflow.
    ///
    /// A pending workflow is cancelled at once and skipped by the worker. A
    /// running one stops at its next checkpoint. Returns false when the
    /// workflow had already finished.
    pub fn cancel(&self, workflow_id: Uuid) -> Result<bool, WorkflowError> {
        let status = self.status(workflow_id)?.status;
        if status == WorkflowStatus::Pending {
            let reason = "Cancelled before start".to_string();
            if self.finish(workflow_id, WorkflowStatus::Pending, RunOutcome::Cancelled(reason)) {
                return Ok(true);
            }
        }

        // Not pending any more; the worker may have picked it up meanwhile.
        // The request is recorded while the table is locked so `finish`
        // either sees it or runs after the status check fails.
        let workflows = lock(&self.workflows);
        let workflow = workflows
            .get(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        if workflow.status != WorkflowStatus::InProgress {
            return Ok(false);
        }
        lock(&self.cancel_requests).insert(workflow_id);
        drop(workflows);

        info!(workflow_id = %workflow_id, "Cancellation requested for running workflow");
        Ok(true)
    }

    /// Load workflows read back from a snapshot.
    ///
    /// Finished workflows are kept as they were. Pending ones are queued
    /// again in creation order. Workflows that were in progress when the
    /// snapshot was taken are cancelled, keeping the results of the steps
    /// that completed. Returns the number of workflows queued.
    pub fn restore(&self, records: Vec<Workflow>) -> usize {
        let mut pending = Vec::new();
        let mut interrupted = 0usize;
        {
            let mut workflows = lock(&self.workflows);
            for mut workflow in records {
                match workflow.status {
                    WorkflowStatus::Pending => pending.push((workflow.created_at, workflow.id)),
                    WorkflowStatus::InProgress => {
                        workflow.status = WorkflowStatus::Cancelled;
                        workflow.current_step = None;
                        workflow.last_error = Some("Interrupted by restart".to_string());
                        interrupted += 1;
                        warn!(workflow_id = %workflow.id, "Workflow interrupted by restart");
                    }
                    _ => {}
                }
                workflows.insert(workflow.id, workflow);
            }
            self.persistence.submit(snapshot_of(&workflows));
            info!(
                workflows = workflows.len(),
                pending = pending.len(),
                interrupted,
                "Workflows restored"
            );
        }

        pending.sort();
        let mut queued = 0;
        for (_, id) in pending {
            if let Some(bus) = &self.event_bus {
                let mut metadata = Map::new();
                metadata.insert("workflow_id".to_string(), json!(id));
                metadata.insert("restored".to_string(), json!(true));
                let chain_id = bus.start_chain(EventCategory::Workflow, metadata);
                lock(&self.chains).insert(id, chain_id);
            }
            if self.queue.send(id).is_err() {
                error!(workflow_id = %id, "Workflow queue closed, cannot resume restored workflow");
                self.finish(
                    id,
                    WorkflowStatus::Pending,
                    RunOutcome::Cancelled("Engine shut down".to_string()),
                );
                continue;
            }
            queued += 1;
        }
        queued
    }

    pub fn analyze(&self, workflow_id: Uuid) -> Result<WorkflowMetrics, WorkflowError> {
        let workflows = lock(&self.workflows);
        let workflow = workflows
            .get(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;
        Ok(analyze_workflow(
            workflow,
            &workflows,
            self.config.bottleneck_factor,
        ))
    }

    async fn run_worker(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<Uuid>, mut shutdown: ShutdownSignal) {
        info!("Workflow worker started");
        loop {
            let workflow_id = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };
            self.run_workflow(workflow_id, &shutdown).await;
        }

        self.running.store(false, Ordering::SeqCst);
        self.finished.send_modify(|version| *version += 1);
        info!("Workflow worker stopped");
    }

    async fn run_workflow(&self, workflow_id: Uuid, shutdown: &ShutdownSignal) {
        let kind = {
            let mut workflows = lock(&self.workflows);
            let Some(workflow) = workflows.get_mut(&workflow_id) else {
                warn!(workflow_id = %workflow_id, "Dequeued unknown workflow");
                return;
            };
            if workflow.status != WorkflowStatus::Pending {
                debug!(
                    workflow_id = %workflow_id,
                    status = %workflow.status,
                    "Skipping workflow that is no longer pending"
                );
                return;
            }
            workflow.status = WorkflowStatus::InProgress;
            workflow.started_at = Some(chrono::Utc::now());
            let kind = workflow.kind.clone();
            self.persistence.submit(snapshot_of(&workflows));
            kind
        };
        *lock(&self.active) = Some(workflow_id);

        info!(workflow_id = %workflow_id, "Executing workflow");
        self.publish(
            workflow_id,
            EventKind::WORKFLOW_STARTED,
            EventPriority::Normal,
            json!({ "workflow_id": workflow_id, "kind": kind }),
        );

        let timer = OperationTimer::new("workflow_run");
        let span = create_workflow_span(workflow_id, &kind, &generate_correlation_id());
        let outcome = self
            .run_steps(workflow_id, shutdown)
            .instrument(span)
            .await;
        timer.finish();

        *lock(&self.active) = None;
        self.finish(workflow_id, WorkflowStatus::InProgress, outcome);
    }

    async fn run_steps(&self, workflow_id: Uuid, shutdown: &ShutdownSignal) -> RunOutcome {
        let step_count = match self.get(workflow_id) {
            Some(workflow) => workflow.steps.len(),
            None => return RunOutcome::Failed(WorkflowError::NotFound(workflow_id)),
        };

        for index in 0..step_count {
            if let Some(reason) = self.stop_reason(workflow_id, shutdown) {
                return RunOutcome::Cancelled(reason);
            }

            let prepared = match self.prepare_step(workflow_id, index) {
                Ok(prepared) => prepared,
                Err(e) => return RunOutcome::Failed(e),
            };

            let handler = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(prepared.handler_kind);
            let Some(handler) = handler else {
                let err = WorkflowError::NoHandler(prepared.handler_kind);
                self.record_step_error(workflow_id, index, err.to_string(), true);
                return RunOutcome::Failed(err);
            };

            if let Some(outcome) = self
                .run_attempts(workflow_id, index, prepared, handler, shutdown)
                .await
            {
                return outcome;
            }
        }

        RunOutcome::Completed
    }

    /// Run a step until it succeeds or exhausts its attempts.
    /// Returns `None` when the step completed.
    async fn run_attempts(
        &self,
        workflow_id: Uuid,
        index: usize,
        prepared: PreparedStep,
        handler: Arc<dyn StepHandler>,
        shutdown: &ShutdownSignal,
    ) -> Option<RunOutcome> {
        let step_id = prepared.context.step_id;
        let mut elapsed = Duration::ZERO;
        let mut attempt = 1;

        loop {
            let mut context = prepared.context.clone();
            context.attempt = attempt;
            context.agent_state = self.state_machine.as_ref().map(|machine| machine.current());

            let started = Instant::now();
            let result = handler.handle(&context).await;
            elapsed += started.elapsed();

            match result {
                Ok(value) => {
                    self.complete_step(workflow_id, index, value, elapsed);
                    info!(
                        workflow_id = %workflow_id,
                        step_id = %step_id,
                        kind = %context.kind,
                        attempt,
                        execution_secs = elapsed.as_secs_f64(),
                        "Step completed"
                    );
                    self.publish(
                        workflow_id,
                        EventKind::STEP_COMPLETED,
                        EventPriority::Normal,
                        json!({
                            "workflow_id": workflow_id,
                            "step_id": step_id,
                            "kind": context.kind,
                            "attempt": attempt,
                            "execution_time": elapsed.as_secs_f64(),
                        }),
                    );
                    return None;
                }
                Err(e) => {
                    let message = e.to_string();
                    let failure = WorkflowError::StepExecutionFailed {
                        step_id,
                        attempt,
                        message: message.clone(),
                    };
                    let exhausted = attempt >= prepared.max_retries;
                    self.fail_attempt(workflow_id, index, message.clone(), elapsed, exhausted);
                    warn!(
                        workflow_id = %workflow_id,
                        error = %failure,
                        will_retry = !exhausted,
                        "Step attempt failed"
                    );
                    self.publish(
                        workflow_id,
                        EventKind::STEP_FAILED,
                        EventPriority::High,
                        json!({
                            "workflow_id": workflow_id,
                            "step_id": step_id,
                            "kind": context.kind,
                            "attempt": attempt,
                            "error": message,
                            "will_retry": !exhausted,
                        }),
                    );

                    if exhausted {
                        return Some(RunOutcome::Failed(WorkflowError::MaxRetriesExceeded {
                            step_id,
                            attempts: attempt,
                            last_error: message,
                        }));
                    }

                    self.metrics.record_step_retry();
                    if let Some(reason) = self.stop_reason(workflow_id, shutdown) {
                        return Some(RunOutcome::Cancelled(reason));
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Check dependencies and build the step context
    fn prepare_step(&self, workflow_id: Uuid, index: usize) -> Result<PreparedStep, WorkflowError> {
        let mut workflows = lock(&self.workflows);
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or(WorkflowError::NotFound(workflow_id))?;

        let step = &workflow.steps[index];
        let mut dependency_results = HashMap::new();
        for dependency in &step.dependencies {
            match workflow.steps.iter().find(|candidate| candidate.id == *dependency) {
                Some(done) if done.completed => {
                    dependency_results
                        .insert(*dependency, done.result.clone().unwrap_or(Value::Null));
                }
                _ => {
                    let err = WorkflowError::DependencyNotMet {
                        step_id: step.id,
                        dependency: *dependency,
                    };
                    warn!(workflow_id = %workflow_id, error = %err, "Step dependency not met");
                    return Err(err);
                }
            }
        }

        let context = StepContext {
            workflow_id,
            step_id: step.id,
            kind: step.kind,
            description: step.description.clone(),
            attempt: 1,
            metadata: workflow.metadata.clone(),
            dependency_results,
            agent_state: None,
        };
        let prepared = PreparedStep {
            handler_kind: step.kind,
            max_retries: step.max_retries,
            context,
        };

        workflow.current_step = Some(prepared.context.step_id);
        workflow.steps[index].started_at = Some(chrono::Utc::now());
        self.persistence.submit(snapshot_of(&workflows));
        Ok(prepared)
    }

    fn complete_step(&self, workflow_id: Uuid, index: usize, value: Value, elapsed: Duration) {
        self.update_step(workflow_id, index, |step| {
            step.completed = true;
            step.result = Some(value);
            step.execution_time = elapsed.as_secs_f64();
            step.finished_at = Some(chrono::Utc::now());
        });
    }

    fn fail_attempt(
        &self,
        workflow_id: Uuid,
        index: usize,
        message: String,
        elapsed: Duration,
        exhausted: bool,
    ) {
        self.update_step(workflow_id, index, |step| {
            step.retries += 1;
            step.error = Some(message);
            step.execution_time = elapsed.as_secs_f64();
            if exhausted {
                step.finished_at = Some(chrono::Utc::now());
            }
        });
    }

    fn record_step_error(&self, workflow_id: Uuid, index: usize, message: String, finished: bool) {
        self.update_step(workflow_id, index, |step| {
            step.error = Some(message);
            if finished {
                step.finished_at = Some(chrono::Utc::now());
            }
        });
    }

    fn update_step<F>(&self, workflow_id: Uuid, index: usize, update: F)
    where
        F: FnOnce(&mut super::types::WorkflowStep),
    {
        let mut workflows = lock(&self.workflows);
        if let Some(step) = workflows
            .get_mut(&workflow_id)
            .and_then(|workflow| workflow.steps.get_mut(index))
        {
            update(step);
        }
        self.persistence.submit(snapshot_of(&workflows));
    }

    fn stop_reason(&self, workflow_id: Uuid, shutdown: &ShutdownSignal) -> Option<String> {
        if lock(&self.cancel_requests).remove(&workflow_id) {
            Some("Cancelled while running".to_string())
        } else if shutdown.is_shutdown() {
            Some("Engine shut down".to_string())
        } else {
            None
        }
    }

    /// Move a workflow from `expected` to its terminal status and announce it.
    /// Returns false, changing nothing, when the workflow is not in `expected`.
    fn finish(&self, workflow_id: Uuid, expected: WorkflowStatus, outcome: RunOutcome) -> bool {
        let (event_kind, priority, payload) = {
            let mut workflows = lock(&self.workflows);
            let Some(workflow) = workflows.get_mut(&workflow_id) else {
                return false;
            };
            if workflow.status != expected {
                return false;
            }
            let now = chrono::Utc::now();

            let announcement = match outcome {
                RunOutcome::Completed => {
                    workflow.status = WorkflowStatus::Completed;
                    workflow.completed_at = Some(now);
                    self.metrics.record_workflow_completed();
                    info!(workflow_id = %workflow_id, "Workflow completed");
                    (
                        EventKind::WORKFLOW_COMPLETED,
                        EventPriority::Normal,
                        json!({ "workflow_id": workflow_id, "steps": workflow.steps.len() }),
                    )
                }
                RunOutcome::Failed(err) => {
                    workflow.status = WorkflowStatus::Error;
                    workflow.last_error = Some(err.to_string());
                    self.metrics.record_workflow_failed();
                    error!(workflow_id = %workflow_id, error = %err, "Workflow failed");
                    (
                        EventKind::WORKFLOW_FAILED,
                        EventPriority::High,
                        json!({ "workflow_id": workflow_id, "error": err.to_string() }),
                    )
                }
                RunOutcome::Cancelled(reason) => {
                    workflow.status = WorkflowStatus::Cancelled;
                    info!(workflow_id = %workflow_id, reason = %reason, "Workflow cancelled");
                    let payload = json!({ "workflow_id": workflow_id, "reason": reason });
                    workflow.last_error = Some(reason);
                    (EventKind::WORKFLOW_CANCELLED, EventPriority::Normal, payload)
                }
            };
            self.persistence.submit(snapshot_of(&workflows));
            announcement
        };

        lock(&self.cancel_requests).remove(&workflow_id);
        self.publish(workflow_id, event_kind, priority, payload);
        if let Some(bus) = &self.event_bus {
            if let Some(chain_id) = lock(&self.chains).remove(&workflow_id) {
                if let Err(e) = bus.complete_chain(chain_id) {
                    debug!(workflow_id = %workflow_id, error = %e, "Could not close workflow chain");
                }
            }
        }
        self.finished.send_modify(|version| *version += 1);
        true
    }

    /// Roll back a workflow whose id never reached the queue
    fn fail_unqueued(&self, workflow_id: Uuid) {
        if let Some(chain_id) = lock(&self.chains).remove(&workflow_id) {
            if let Some(bus) = &self.event_bus {
                let _ = bus.complete_chain(chain_id);
            }
        }
        let mut workflows = lock(&self.workflows);
        if let Some(workflow) = workflows.remove(&workflow_id) {
            if let Some(parent) = workflow
                .parent_id
                .and_then(|parent_id| workflows.get_mut(&parent_id))
            {
                parent.children.retain(|child| *child != workflow_id);
            }
        }
        self.persistence.submit(snapshot_of(&workflows));
    }

    fn publish(&self, workflow_id: Uuid, event_kind: &str, priority: EventPriority, payload: Value) {
        let Some(bus) = &self.event_bus else {
            return;
        };
        let mut request = PublishRequest::new(event_kind, payload)
            .with_priority(priority)
            .with_category(EventCategory::Workflow);
        if let Some(chain_id) = lock(&self.chains).get(&workflow_id).copied() {
            request = request.in_chain(chain_id);
        }
        bus.publish(request);
    }
}

/// All workflows in creation order
fn snapshot_of(workflows: &HashMap<Uuid, Workflow>) -> Snapshot {
    let mut records: Vec<Workflow> = workflows.values().cloned().collect();
    records.sort_by_key(|workflow| workflow.created_at);
    Snapshot::Workflows(records)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
