use serde_json::json;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::transitions::TransitionTable;
use super::types::{
    AgentState, NavigationContext, StateMetadata, TransitionMetadata, TransitionRecord,
    TransitionStatistics,
};
use crate::events::{EventBus, EventCategory, EventKind, PublishRequest};
use crate::observability::CoreMetrics;
use crate::persistence::{PersistenceHook, Snapshot};
use crate::priority::EventPriority;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: AgentState, to: AgentState },
}

/// Synchronous callback run after every accepted transition.
///
/// Errors and panics are logged and never reach the caller of `transition`.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, record: &TransitionRecord) -> anyhow::Result<()>;
}

impl<F> TransitionObserver for F
where
    F: Fn(&TransitionRecord) -> anyhow::Result<()> + Send + Sync,
{
    fn on_transition(&self, record: &TransitionRecord) -> anyhow::Result<()> {
        self(record)
    }
}

struct MachineState {
    current: AgentState,
    metadata: StateMetadata,
    log: Vec<TransitionRecord>,
}

/// Validated agent lifecycle.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct AgentStateMachine {
    table: TransitionTable,
    state: Mutex<MachineState>,
    observers: RwLock<Vec<Arc<dyn TransitionObserver>>>,
    event_bus: Option<EventBus>,
    persistence: PersistenceHook,
    metrics: Arc<CoreMetrics>,
}

impl Default for AgentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStateMachine {
    /// A machine in `idle` using the default transition table
    pub fn new() -> Self {
        Self::with_table(TransitionTable::default())
    }

    pub fn with_table(table: TransitionTable) -> Self {
        Self {
            table,
            state: Mutex::new(MachineState {
                current: AgentState::Idle,
                metadata: StateMetadata::default(),
                log: Vec::new(),
            }),
            observers: RwLock::new(Vec::new()),
            event_bus: None,
            persistence: PersistenceHook::disabled(),
            metrics: Arc::new(CoreMetrics::new()),
        }
    }

    /// Publish `state_changed` on this bus after each transition
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
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

    /// Move to `target`.
    ///
    /// On success the record is appended, metadata merged, observers notified
    /// in registration order, `state_changed` published and a snapshot of the
    /// log submitted. On failure nothing changes.
    pub fn transition(
        &self,
        target: AgentState,
        metadata: TransitionMetadata,
        reason: impl Into<String>,
    ) -> Result<TransitionRecord, StateError> {
        let record = {
            let mut state = self.lock_state();
            let from = state.current;

            if !self.table.permits(from, target) {
                self.metrics.record_rejected_transition();
                warn!(from = %from, to = %target, "Rejected invalid state transition");
                return Err(StateError::InvalidTransition { from, to: target });
            }

            let record = TransitionRecord::new(from, target, reason.into(), metadata);
            apply_metadata(&mut state.metadata, &record);
            state.current = target;
            state.log.push(record.clone());

            // Submitted under the lock so snapshots reach the writer in log order
            self.persistence
                .submit(Snapshot::Transitions(state.log.clone()));
            record
        };

        self.metrics.record_transition();
        info!(
            from = %record.from,
            to = %record.to,
            reason = %record.reason,
            "Agent state changed"
        );

        self.notify_observers(&record);
        self.publish_state_changed(&record);
        Ok(record)
    }

    /// Transition with empty metadata and a generic reason
    pub fn transition_to(&self, target: AgentState) -> Result<TransitionRecord, StateError> {
        self.transition(target, TransitionMetadata::default(), "State update requested")
    }

    pub fn current(&self) -> AgentState {
        self.lock_state().current
    }

    /// The transition log in order; only the last `limit` records when set
    pub fn history(&self, limit: Option<usize>) -> Vec<TransitionRecord> {
        let state = self.lock_state();
        let skip = limit.map_or(0, |limit| state.log.len().saturating_sub(limit));
        state.log[skip..].to_vec()
    }

    pub fn allowed(&self, state: AgentState) -> Vec<AgentState> {
        self.table.allowed(state)
    }

    pub fn can_transition(&self, target: AgentState) -> bool {
        self.table.permits(self.current(), target)
    }

    pub fn metadata(&self) -> StateMetadata {
        self.lock_state().metadata.clone()
    }

    pub fn navigation_context(&self) -> NavigationContext {
        self.lock_state().metadata.navigation.clone()
    }

    pub fn navigation_history(&self) -> Vec<String> {
        self.lock_state().metadata.navigation.history.clone()
    }

    pub fn register_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    pub fn statistics(&self) -> TransitionStatistics {
        let state = self.lock_state();
        let log = &state.log;

        let mut state_counts = std::collections::BTreeMap::new();
        let mut pair_counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut errors = 0usize;

        for (index, record) in log.iter().enumerate() {
            *state_counts.entry(record.from).or_insert(0) += 1;
            pair_counts
                .entry(format!("{} -> {}", record.from, record.to))
                .or_insert((0, index))
                .0 += 1;
            if record.to == AgentState::Error {
                errors += 1;
            }
        }

        let mut common: Vec<(String, usize, usize)> = pair_counts
            .into_iter()
            .map(|(pair, (count, first))| (pair, count, first))
            .collect();
        common.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        TransitionStatistics {
            total_transitions: log.len(),
            state_counts,
            error_rate: if log.is_empty() {
                0.0
            } else {
                errors as f64 / log.len() as f64
            },
            common_transitions: common
                .into_iter()
                .take(5)
                .map(|(pair, count, _)| (pair, count))
                .collect(),
        }
    }

    /// Drop the in-memory log and persist the empty log. State is kept.
    pub fn clear_history(&self) {
        let mut state = self.lock_state();
        state.log.clear();
        self.persistence.submit(Snapshot::Transitions(Vec::new()));
        debug!("Transition history cleared");
    }

    /// Replace the log with records read back from a snapshot.
    ///
    /// Metadata is rebuilt from the records. The current state stays where it
    /// is; a restarted agent begins in `idle`.
    pub fn restore_history(&self, records: Vec<TransitionRecord>) {
        let mut state = self.lock_state();
        let mut metadata = StateMetadata::default();
        for record in &records {
            apply_metadata(&mut metadata, record);
        }
        info!(
            records = records.len(),
            error_count = metadata.error_count,
            "Transition history restored"
        );
        state.metadata = metadata;
        state.log = records;
    }

    fn lock_state(&self) -> MutexGuard<'_, MachineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_observers(&self, record: &TransitionRecord) {
        let observers: Vec<Arc<dyn TransitionObserver>> = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for (index, observer) in observers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_transition(record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    observer = index,
                    from = %record.from,
                    to = %record.to,
                    error = %e,
                    "Transition observer failed"
                ),
                Err(_) => error!(
                    observer = index,
                    from = %record.from,
                    to = %record.to,
                    "Transition observer panicked"
                ),
            }
        }
    }

    fn publish_state_changed(&self, record: &TransitionRecord) {
        let Some(bus) = &self.event_bus else {
            return;
        };

        let priority = if record.to == AgentState::Error {
            EventPriority::High
        } else {
            EventPriority::Normal
        };
        bus.publish(
            PublishRequest::new(
                EventKind::STATE_CHANGED,
                json!({
                    "transition_id": record.id,
                    "old_state": record.from,
                    "new_state": record.to,
                    "reason": record.reason,
                    "metadata": record.metadata,
                    "timestamp": record.timestamp,
                }),
            )
            .with_priority(priority)
            .with_category(EventCategory::State),
        );
    }
}

/// Fold a transition into the running metadata
fn apply_metadata(metadata: &mut StateMetadata, record: &TransitionRecord) {
    let context = &record.metadata;

    if let Some(request) = &context.user_request {
        metadata.last_user_request = Some(request.clone());
    }
    if let Some(task) = &context.current_task {
        metadata.current_task = Some(task.clone());
    }
    if record.to == AgentState::Error {
        metadata.error_count += 1;
    }
    metadata.last_updated = record.timestamp;

    if context.is_empty() {
        return;
    }

    let navigation = &mut metadata.navigation;
    if let Some(path) = &context.current_path {
        navigation.current_path = Some(path.clone());
    }
    if let Some(path) = &context.target_path {
        navigation.target_path = Some(path.clone());
    }
    if record.to == AgentState::AnalyzingComponent {
        if let Some(path) = &navigation.current_path {
            navigation.components_analyzed.insert(path.clone());
        }
    }
    if record.to == AgentState::AnalyzingDependencies {
        if let Some(dependencies) = &context.dependencies {
            navigation.dependency_chain = dependencies.clone();
        }
    }
    navigation
        .history
        .push(format!("{}: {}", record.timestamp.to_rfc3339(), record.to));
}
