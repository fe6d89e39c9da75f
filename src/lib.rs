// cmate core - Agent Lifecycle, Workflow Engine and Priority Event Bus
// This exposes the orchestration components for embedding and integration

pub mod agent_lifecycle;
pub mod config;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod persistence;
pub mod priority;
pub mod shutdown;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use agent_lifecycle::{
    AgentState, AgentStateMachine, StateError, TransitionMetadata, TransitionObserver,
    TransitionRecord, TransitionTable,
};
pub use config::CoreConfig;
pub use events::{
    subscriber_fn, EventBus, EventBusError, EventCategory, EventEnvelope, EventKind,
    EventSubscriber, HistoryQuery, PatternAnalysis, PayloadFilter, PublishRequest,
    SubscriptionOptions,
};
pub use observability::{CoreMetrics, CoreStats, OperationTimer};
pub use orchestrator::{CoreStatus, OrchestrationCore};
pub use persistence::{InMemoryStore, JsonFileStore, PersistenceError, PersistenceHook, Snapshot, SnapshotStore};
pub use priority::EventPriority;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use telemetry::{create_workflow_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflows::{
    handler_fn, StepContext, StepHandler, StepKind, StepSpec, Workflow, WorkflowEngine,
    WorkflowError, WorkflowMetrics, WorkflowRequest, WorkflowStatus, WorkflowSummary,
};
