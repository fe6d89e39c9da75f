//! Snapshot persistence through the assembled orchestration core
//!
//! Verifies the JSON documents written to disk, restoring them into a new
//! core and layered config loading.

use cmate_core::{
    handler_fn, AgentState, CoreConfig, OrchestrationCore, StepContext, StepKind, StepSpec,
    TransitionMetadata, WorkflowRequest, WorkflowStatus,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn read_document(path: &Path) -> Value {
    let raw = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&raw).unwrap()
}

fn persisting_config(dir: &TempDir) -> CoreConfig {
    let mut config = CoreConfig::default();
    config.persistence.enabled = true;
    config.persistence.directory = dir.path().to_path_buf();
    config
}

#[tokio::test]
async fn test_core_writes_transition_and_workflow_documents() {
    let dir = TempDir::new().unwrap();
    let core = OrchestrationCore::new(persisting_config(&dir)).await.unwrap();
    core.start().unwrap();

    core.engine().register_handler(
        StepKind::Implementation,
        Arc::new(handler_fn(|ctx: StepContext| async move {
            if ctx.description == "break" {
                anyhow::bail!("compile error");
            }
            Ok::<_, anyhow::Error>(json!({ "written": ctx.description }))
        })),
    );

    let machine = core.state_machine();
    machine
        .transition(
            AgentState::Planning,
            TransitionMetadata::new().with_user_request("add retry support"),
            "user asked for a feature",
        )
        .unwrap();
    machine.transition_to(AgentState::Implementing).unwrap();
    machine.transition_to(AgentState::Coding).unwrap();
    assert!(machine.transition_to(AgentState::Shutdown).is_err());

    let good = core
        .engine()
        .create(
            WorkflowRequest::new("feature", "retry support")
                .with_step(StepSpec::new(StepKind::Implementation, "retry.rs")),
        )
        .unwrap();
    let bad = core
        .engine()
        .create(
            WorkflowRequest::new("feature", "broken")
                .with_step(StepSpec::new(StepKind::Implementation, "break").with_max_retries(1)),
        )
        .unwrap();
    let pending = core
        .engine()
        .create(WorkflowRequest::new("feature", "never started"))
        .unwrap();
    assert!(core.engine().cancel(pending.id).unwrap());

    core.engine().execute(good.id).await.unwrap();
    core.engine().execute(bad.id).await.unwrap();
    core.shutdown().await.unwrap();

    let transitions = read_document(&dir.path().join("transitions.json"));
    assert_eq!(transitions["store"], "transitions");
    let records = transitions["records"].as_array().unwrap();
    let hops: Vec<(&str, &str)> = records
        .iter()
        .map(|record| {
            (
                record["from"].as_str().unwrap(),
                record["to"].as_str().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        hops,
        vec![
            ("idle", "planning"),
            ("planning", "implementing"),
            ("implementing", "coding"),
        ]
    );
    assert_eq!(records[0]["metadata"]["user_request"], "add retry support");
    assert_eq!(records[0]["reason"], "user asked for a feature");

    let workflows = read_document(&dir.path().join("workflows.json"));
    let stored = workflows["records"].as_array().unwrap();
    assert_eq!(stored.len(), 3);
    let status_of = |id: uuid::Uuid| {
        stored
            .iter()
            .find(|workflow| workflow["id"] == json!(id))
            .map(|workflow| workflow["status"].clone())
            .unwrap()
    };
    assert_eq!(status_of(good.id), "completed");
    assert_eq!(status_of(bad.id), "error");
    assert_eq!(status_of(pending.id), "cancelled");

    let good_record = stored
        .iter()
        .find(|workflow| workflow["id"] == json!(good.id))
        .unwrap();
    assert_eq!(good_record["steps"][0]["kind"], "implementation");
    assert_eq!(good_record["steps"][0]["result"]["written"], "retry.rs");
}

#[tokio::test]
async fn test_restart_restores_history_and_resumes_pending_work() {
    let dir = TempDir::new().unwrap();
    let first = OrchestrationCore::new(persisting_config(&dir)).await.unwrap();
    first
        .state_machine()
        .transition(
            AgentState::Planning,
            TransitionMetadata::new().with_user_request("add caching"),
            "user asked for caching",
        )
        .unwrap();
    first.state_machine().transition_to(AgentState::Implementing).unwrap();

    let done = first.engine().create(WorkflowRequest::new("feature", "done")).unwrap();
    let queued = first
        .engine()
        .create(
            WorkflowRequest::new("feature", "resume me")
                .with_step(StepSpec::new(StepKind::Implementation, "cache.rs")),
        )
        .unwrap();
    let dropped = first.engine().create(WorkflowRequest::new("feature", "dropped")).unwrap();
    assert!(first.engine().cancel(dropped.id).unwrap());
    first.start().unwrap();
    first.engine().execute(done.id).await.unwrap();
    // No handler yet, so the second workflow fails and stays failed after restart
    first.engine().execute(queued.id).await.unwrap();
    first.shutdown().await.unwrap();

    // Hand edit the saved table so one workflow looks interrupted and one waiting
    let path = dir.path().join("workflows.json");
    let mut document = read_document(&path);
    let waiting = uuid::Uuid::new_v4();
    {
        let records = document["records"].as_array_mut().unwrap();
        let mut pending = records
            .iter()
            .find(|workflow| workflow["id"] == json!(queued.id))
            .cloned()
            .unwrap();
        pending["id"] = json!(waiting);
        pending["status"] = json!("pending");
        pending["last_error"] = Value::Null;
        pending["steps"][0]["error"] = Value::Null;
        pending["steps"][0]["retries"] = json!(0);
        pending["steps"][0]["started_at"] = Value::Null;
        pending["steps"][0]["finished_at"] = Value::Null;
        pending["started_at"] = Value::Null;
        records.push(pending);

        let interrupted = records
            .iter_mut()
            .find(|workflow| workflow["id"] == json!(done.id))
            .unwrap();
        interrupted["status"] = json!("in_progress");
    }
    std::fs::write(&path, serde_json::to_vec_pretty(&document).unwrap()).unwrap();

    let second = OrchestrationCore::new(persisting_config(&dir)).await.unwrap();
    let machine = second.state_machine();
    assert_eq!(machine.current(), AgentState::Idle);
    let history = machine.history(None);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].to, AgentState::Implementing);
    assert_eq!(
        machine.metadata().last_user_request.as_deref(),
        Some("add caching")
    );

    let engine = second.engine();
    assert_eq!(engine.list().len(), 4);
    assert_eq!(engine.status(queued.id).unwrap().status, WorkflowStatus::Error);
    assert_eq!(engine.status(dropped.id).unwrap().status, WorkflowStatus::Cancelled);
    let interrupted = engine.status(done.id).unwrap();
    assert_eq!(interrupted.status, WorkflowStatus::Cancelled);
    assert_eq!(interrupted.last_error.as_deref(), Some("Interrupted by restart"));
    assert_eq!(engine.status(waiting).unwrap().status, WorkflowStatus::Pending);

    engine.register_handler(
        StepKind::Implementation,
        Arc::new(handler_fn(|ctx: StepContext| async move {
            Ok::<_, anyhow::Error>(json!({ "written": ctx.description }))
        })),
    );
    second.start().unwrap();
    let resumed = engine.execute(waiting).await.unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Completed);
    assert_eq!(
        engine.get(waiting).unwrap().steps[0].result,
        Some(json!({ "written": "cache.rs" }))
    );
    second.shutdown().await.unwrap();

    let saved = read_document(&path);
    let saved_status = saved["records"]
        .as_array()
        .unwrap()
        .iter()
        .find(|workflow| workflow["id"] == json!(waiting))
        .map(|workflow| workflow["status"].clone())
        .unwrap();
    assert_eq!(saved_status, "completed");
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_core_build() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("transitions.json"), b"not json").unwrap();
    assert!(OrchestrationCore::new(persisting_config(&dir)).await.is_err());
}

#[tokio::test]
async fn test_disabled_persistence_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = CoreConfig::default();
    config.persistence.directory = dir.path().join("state");

    let core = OrchestrationCore::new(config).await.unwrap();
    core.start().unwrap();
    core.state_machine().transition_to(AgentState::Scanning).unwrap();
    core.shutdown().await.unwrap();

    assert!(!dir.path().join("state").exists());
}

#[test]
fn test_environment_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cmate.toml");
    std::fs::write(&path, "[event_bus]\ntop_sequences = 2\nmax_history = 50\n").unwrap();

    std::env::set_var("CMATE__EVENT_BUS__TOP_SEQUENCES", "9");
    let loaded = CoreConfig::load_from(&path);
    std::env::remove_var("CMATE__EVENT_BUS__TOP_SEQUENCES");

    let loaded = loaded.unwrap();
    assert_eq!(loaded.event_bus.top_sequences, 9);
    assert_eq!(loaded.event_bus.max_history, 50);
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cmate.toml");
    std::fs::write(&path, "[workflows]\ndefault_max_retries = 0\n").unwrap();

    assert!(CoreConfig::load_from(&path).is_err());
}
