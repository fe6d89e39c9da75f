use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Counters shared by the components of one orchestration core
#[derive(Debug, Default)]
pub struct CoreMetrics {
    pub events_published: AtomicU64,
    pub events_delivered: AtomicU64,
    pub subscriber_failures: AtomicU64,
    pub transitions: AtomicU64,
    pub rejected_transitions: AtomicU64,
    pub workflows_completed: AtomicU64,
    pub workflows_failed: AtomicU64,
    pub step_retries: AtomicU64,
    pub persistence_failures: AtomicU64,
}

impl CoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_failure(&self) {
        self.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_transition(&self) {
        self.rejected_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workflow_completed(&self) {
        self.workflows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_workflow_failed(&self) {
        self.workflows_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_retry(&self) {
        self.step_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> CoreStats {
        CoreStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            rejected_transitions: self.rejected_transitions.load(Ordering::Relaxed),
            workflows_completed: self.workflows_completed.load(Ordering::Relaxed),
            workflows_failed: self.workflows_failed.load(Ordering::Relaxed),
            step_retries: self.step_retries.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            events_published = stats.events_published,
            events_delivered = stats.events_delivered,
            subscriber_failures = stats.subscriber_failures,
            transitions = stats.transitions,
            rejected_transitions = stats.rejected_transitions,
            workflows_completed = stats.workflows_completed,
            workflows_failed = stats.workflows_failed,
            step_retries = stats.step_retries,
            persistence_failures = stats.persistence_failures,
            "Orchestration core metrics"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub subscriber_failures: u64,
    pub transitions: u64,
    pub rejected_transitions: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub step_retries: u64,
    pub persistence_failures: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}
