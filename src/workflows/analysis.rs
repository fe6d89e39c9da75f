// Workflow metrics, timeline and bottleneck detection

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::types::{StepKind, StepStatus, Workflow, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub step_id: Uuid,
    pub kind: StepKind,
    pub description: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub execution_time: f64,
    pub retries: u32,
}

/// A step slower than the configured multiple of the mean step time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    pub step_id: Uuid,
    pub kind: StepKind,
    pub description: String,
    pub execution_time: f64,
    /// How many times the mean step time this step took
    pub ratio_to_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowMetrics {
    pub workflow_id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    /// Seconds, summed over all steps and attempts
    pub total_execution_time: f64,
    /// Mean over the steps that ran
    pub average_execution_time: f64,
    pub retry_count: u32,
    /// Failed attempts over all attempts
    pub error_rate: f64,
    pub steps_by_kind: BTreeMap<StepKind, usize>,
    pub timeline: Vec<TimelineEntry>,
    /// Slowest first
    pub bottlenecks: Vec<Bottleneck>,
    pub children: Vec<WorkflowMetrics>,
}

pub(crate) fn analyze_workflow(
    workflow: &Workflow,
    all: &HashMap<Uuid, Workflow>,
    bottleneck_factor: f64,
) -> WorkflowMetrics {
    let steps = &workflow.steps;
    let executed: Vec<_> = steps.iter().filter(|step| step.was_executed()).collect();

    let total_execution_time: f64 = steps.iter().map(|step| step.execution_time).sum();
    let average_execution_time = if executed.is_empty() {
        0.0
    } else {
        total_execution_time / executed.len() as f64
    };

    let retry_count: u32 = steps.iter().map(|step| step.retries).sum();
    let completed_steps = steps.iter().filter(|step| step.completed).count();
    let attempts = retry_count as usize + completed_steps;
    let error_rate = if attempts == 0 {
        0.0
    } else {
        retry_count as f64 / attempts as f64
    };

    let mut steps_by_kind = BTreeMap::new();
    for step in steps {
        *steps_by_kind.entry(step.kind).or_insert(0) += 1;
    }

    let timeline = steps
        .iter()
        .map(|step| TimelineEntry {
            step_id: step.id,
            kind: step.kind,
            description: step.description.clone(),
            status: step.status(),
            started_at: step.started_at,
            finished_at: step.finished_at,
            execution_time: step.execution_time,
            retries: step.retries,
        })
        .collect();

    let mut bottlenecks: Vec<Bottleneck> = if average_execution_time > 0.0 {
        let threshold = average_execution_time * bottleneck_factor;
        executed
            .iter()
            .filter(|step| step.execution_time > threshold)
            .map(|step| Bottleneck {
                step_id: step.id,
                kind: step.kind,
                description: step.description.clone(),
                execution_time: step.execution_time,
                ratio_to_mean: step.execution_time / average_execution_time,
            })
            .collect()
    } else {
        Vec::new()
    };
    bottlenecks.sort_by(|a, b| b.execution_time.total_cmp(&a.execution_time));

    let children = workflow
        .children
        .iter()
        .filter_map(|child_id| all.get(child_id))
        .map(|child| analyze_workflow(child, all, bottleneck_factor))
        .collect();

    WorkflowMetrics {
        workflow_id: workflow.id,
        name: workflow.name.clone(),
        status: workflow.status,
        total_steps: steps.len(),
        completed_steps,
        failed_steps: steps
            .iter()
            .filter(|step| step.status() == StepStatus::Failed)
            .count(),
        total_execution_time,
        average_execution_time,
        retry_count,
        error_rate,
        steps_by_kind,
        timeline,
        bottlenecks,
        children,
    }
}
