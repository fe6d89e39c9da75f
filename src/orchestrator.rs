use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent_lifecycle::{AgentState, AgentStateMachine, TransitionRecord};
use crate::config::CoreConfig;
use crate::events::EventBus;
use crate::observability::{CoreMetrics, CoreStats};
use crate::persistence::{JsonFileStore, PersistenceHook, Snapshot, SnapshotStore};
use crate::shutdown::ShutdownCoordinator;
use crate::workflows::{Workflow, WorkflowEngine};

/// Event bus, state machine and workflow engine wired together from one
/// configuration, started and stopped as a unit
pub struct OrchestrationCore {
    config: CoreConfig,
    metrics: Arc<CoreMetrics>,
    event_bus: EventBus,
    state_machine: Arc<AgentStateMachine>,
    engine: Arc<WorkflowEngine>,
    persistence: PersistenceHook,
    shutdown: ShutdownCoordinator,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    writer: Option<JoinHandle<()>>,
}

/// Point-in-time view of the whole core
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub agent_state: AgentState,
    pub active_workflow: Option<Uuid>,
    pub workflows: usize,
    pub subscriptions: usize,
    pub active_chains: usize,
    pub history_len: usize,
    pub metrics: CoreStats,
}

impl OrchestrationCore {
    /// Build the core from configuration.
    ///
    /// With persistence enabled snapshots go to a [`JsonFileStore`] in the
    /// configured directory and whatever was saved there before is restored.
    pub async fn new(config: CoreConfig) -> Result<Self> {
        let store: Option<Arc<dyn SnapshotStore>> = if config.persistence.enabled {
            Some(Arc::new(JsonFileStore::new(config.persistence.directory.clone())))
        } else {
            None
        };
        Self::build(config, store).await
    }

    /// Build the core persisting through, and restoring from, a caller
    /// supplied store
    pub async fn with_store(config: CoreConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        Self::build(config, Some(store)).await
    }

    async fn build(config: CoreConfig, store: Option<Arc<dyn SnapshotStore>>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(CoreMetrics::new());

        let (transitions, workflows) = match &store {
            Some(store) => load_snapshots(store.as_ref()).await?,
            None => (Vec::new(), Vec::new()),
        };

        let (persistence, writer) = match store {
            Some(store) => {
                let (hook, handle) = PersistenceHook::spawn(store, metrics.clone());
                (hook, Some(handle))
            }
            None => (PersistenceHook::disabled(), None),
        };

        let event_bus = EventBus::new(config.event_bus.clone(), metrics.clone());
        let state_machine = Arc::new(
            AgentStateMachine::new()
                .with_event_bus(event_bus.clone())
                .with_persistence(persistence.clone())
                .with_metrics(metrics.clone()),
        );
        let engine = Arc::new(
            WorkflowEngine::new(config.workflows.clone())
                .with_event_bus(event_bus.clone())
                .with_state_machine(state_machine.clone())
                .with_persistence(persistence.clone())
                .with_metrics(metrics.clone()),
        );

        if !transitions.is_empty() {
            state_machine.restore_history(transitions);
        }
        let requeued = if workflows.is_empty() {
            0
        } else {
            engine.restore(workflows)
        };

        info!(
            persistence = persistence.is_enabled(),
            max_history = config.event_bus.max_history,
            restored_transitions = state_machine.history(None).len(),
            requeued_workflows = requeued,
            "Orchestration core created"
        );

        Ok(Self {
            config,
            metrics,
            event_bus,
            state_machine,
            engine,
            persistence,
            shutdown: ShutdownCoordinator::new(),
            tasks: Mutex::new(Vec::new()),
            writer,
        })
    }

    /// Spawn the event consumers and the workflow worker
    pub fn start(&self) -> Result<()> {
        let mut handles = self
            .event_bus
            .start(self.shutdown.signal())
            .context("Failed to start event bus")?;
        handles.push(
            self.engine
                .start(self.shutdown.signal())
                .context("Failed to start workflow worker")?,
        );

        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(handles);
        info!("Orchestration core started");
        Ok(())
    }

    /// Signal shutdown, wait for the background tasks and flush pending
    /// snapshots
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.shutdown();

        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.persistence.flush().await;
        if let Some(writer) = self.writer.take() {
            // Components may outlive the core through shared handles; the
            // writer has nothing left to do after the flush
            writer.abort();
        }

        self.metrics.log_stats();
        info!("Orchestration core stopped");
        Ok(())
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn state_machine(&self) -> &Arc<AgentStateMachine> {
        &self.state_machine
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<CoreMetrics> {
        &self.metrics
    }

    pub fn status(&self) -> CoreStatus {
        CoreStatus {
            agent_state: self.state_machine.current(),
            active_workflow: self.engine.active_workflow(),
            workflows: self.engine.list().len(),
            subscriptions: self.event_bus.subscription_count(),
            active_chains: self.event_bus.active_chains().len(),
            history_len: self.event_bus.history_len(),
            metrics: self.metrics.get_stats(),
        }
    }
}

/// Read back the transition log and workflow table saved by an earlier run
async fn load_snapshots(
    store: &dyn SnapshotStore,
) -> Result<(Vec<TransitionRecord>, Vec<Workflow>)> {
    let transitions = match store
        .load("transitions")
        .await
        .context("Failed to load transition snapshot")?
    {
        Some(Snapshot::Transitions(records)) => records,
        _ => Vec::new(),
    };
    let workflows = match store
        .load("workflows")
        .await
        .context("Failed to load workflow snapshot")?
    {
        Some(Snapshot::Workflows(records)) => records,
        _ => Vec::new(),
    };
    Ok((transitions, workflows))
}
