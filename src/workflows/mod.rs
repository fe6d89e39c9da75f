// Workflow Module - Dependency-ordered step execution with retry
//
// A workflow is an ordered list of typed steps. The engine queues workflows,
// runs them one at a time on a background worker and keeps per-step results,
// retries and timings for later analysis.

pub mod analysis;
pub mod engine;
pub mod handlers;
pub mod types;

pub use analysis::{Bottleneck, TimelineEntry, WorkflowMetrics};
pub use engine::{WorkflowEngine, WorkflowError};
pub use handlers::{handler_fn, FnHandler, HandlerRegistry, StepContext, StepHandler};
pub use types::{
    StepKind, StepSpec, StepStatus, Workflow, WorkflowRequest, WorkflowStatus, WorkflowStep,
    WorkflowSummary,
};
