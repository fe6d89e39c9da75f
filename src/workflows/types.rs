// Workflow data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Error => "error",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, error and cancelled workflows are frozen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Error | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a step performs; selects the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    FileAnalysis,
    Planning,
    Implementation,
    Testing,
    Validation,
    UserInteraction,
}

impl StepKind {
    pub const ALL: [StepKind; 6] = [
        StepKind::FileAnalysis,
        StepKind::Planning,
        StepKind::Implementation,
        StepKind::Testing,
        StepKind::Validation,
        StepKind::UserInteraction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::FileAnalysis => "file_analysis",
            StepKind::Planning => "planning",
            StepKind::Implementation => "implementation",
            StepKind::Testing => "testing",
            StepKind::Validation => "validation",
            StepKind::UserInteraction => "user_interaction",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a single step stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

/// Declarative description of one step, used to build a workflow.
///
/// The id is generated up front so later specs can depend on it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub id: Uuid,
    pub kind: StepKind,
    pub description: String,
    pub depends_on: Vec<Uuid>,
    /// Overrides the engine's default attempt limit
    pub max_retries: Option<u32>,
}

impl StepSpec {
    pub fn new(kind: StepKind, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            description: description.into(),
            depends_on: Vec::new(),
            max_retries: None,
        }
    }

    pub fn depends_on(mut self, step_id: Uuid) -> Self {
        self.depends_on.push(step_id);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Everything needed to create a workflow
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRequest {
    pub kind: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<StepSpec>,
    pub parent_id: Option<Uuid>,
    pub metadata: Map<String, Value>,
}

impl WorkflowRequest {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            parent_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub kind: StepKind,
    pub description: String,
    pub dependencies: Vec<Uuid>,
    pub completed: bool,
    pub result: Option<Value>,
    /// Message of the most recent failed attempt
    pub error: Option<String>,
    pub retries: u32,
    pub max_retries: u32,
    /// Seconds spent in the handler, summed over all attempts
    pub execution_time: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub(crate) fn from_spec(spec: StepSpec, default_max_retries: u32) -> Self {
        Self {
            id: spec.id,
            kind: spec.kind,
            description: spec.description,
            dependencies: spec.depends_on,
            completed: false,
            result: None,
            error: None,
            retries: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries).max(1),
            execution_time: 0.0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> StepStatus {
        if self.completed {
            StepStatus::Completed
        } else if self.finished_at.is_some() {
            StepStatus::Failed
        } else {
            StepStatus::Pending
        }
    }

    /// Whether a handler has been invoked for this step
    pub fn was_executed(&self) -> bool {
        self.started_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step: Option<Uuid>,
    pub last_error: Option<String>,
    pub parent_id: Option<Uuid>,
    pub children: Vec<Uuid>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Workflow {
    pub(crate) fn from_request(request: WorkflowRequest, default_max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: request.kind,
            name: request.name,
            description: request.description,
            steps: request
                .steps
                .into_iter()
                .map(|spec| WorkflowStep::from_spec(spec, default_max_retries))
                .collect(),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            current_step: None,
            last_error: None,
            parent_id: request.parent_id,
            children: Vec::new(),
            metadata: request.metadata,
        }
    }

    pub fn step(&self, step_id: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id,
            kind: self.kind.clone(),
            name: self.name.clone(),
            status: self.status,
            total_steps: self.steps.len(),
            completed_steps: self.steps.iter().filter(|step| step.completed).count(),
            current_step: self.current_step,
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Cheap read-only view returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub current_step: Option<Uuid>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_keeps_declaration_order() {
        let scan = StepSpec::new(StepKind::FileAnalysis, "scan");
        let plan = StepSpec::new(StepKind::Planning, "plan").depends_on(scan.id);
        let request = WorkflowRequest::new("feature", "add parser")
            .with_step(scan.clone())
            .with_step(plan.clone())
            .with_metadata("ticket", json!(42));

        let workflow = Workflow::from_request(request, 3);
        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert_eq!(workflow.steps[0].id, scan.id);
        assert_eq!(workflow.steps[1].dependencies, vec![scan.id]);
        assert_eq!(workflow.steps[1].max_retries, 3);
        assert_eq!(workflow.metadata["ticket"], json!(42));
        assert_eq!(workflow.summary().total_steps, 2);
    }

    #[test]
    fn test_step_retry_override_is_at_least_one() {
        let step = WorkflowStep::from_spec(
            StepSpec::new(StepKind::Testing, "flaky").with_max_retries(0),
            3,
        );
        assert_eq!(step.max_retries, 1);
        assert_eq!(step.status(), StepStatus::Pending);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(
            serde_json::to_value(WorkflowStatus::InProgress).unwrap(),
            json!("in_progress")
        );
        assert_eq!(
            serde_json::to_value(StepKind::UserInteraction).unwrap(),
            json!("user_interaction")
        );
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
    }
}
