//! Snapshot persistence for the orchestration core.
//!
//! The core never writes files itself. After every transition and every
//! workflow or step mutation it hands a [`Snapshot`] to a [`PersistenceHook`],
//! which forwards it over a channel to a single writer task. The writer calls
//! the configured [`SnapshotStore`] in submission order and logs failures; the
//! operation that produced the snapshot is never aborted.
//!
//! On startup the orchestration core reads the latest document of each store
//! back through [`SnapshotStore::load`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::agent_lifecycle::TransitionRecord;
use crate::observability::CoreMetrics;
use crate::workflows::Workflow;

/// Errors that can occur while writing a snapshot
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown snapshot store: {0}")]
    UnknownStore(String),
}

/// Full contents of one logical store at a point in time
#[derive(Debug, Clone)]
pub enum Snapshot {
    Transitions(Vec<TransitionRecord>),
    Workflows(Vec<Workflow>),
}

impl Snapshot {
    /// Name of the logical store, also the file stem used by [`JsonFileStore`]
    pub fn store_name(&self) -> &'static str {
        match self {
            Snapshot::Transitions(_) => "transitions",
            Snapshot::Workflows(_) => "workflows",
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            Snapshot::Transitions(records) => records.len(),
            Snapshot::Workflows(workflows) => workflows.len(),
        }
    }

    /// Render as the persisted JSON document
    pub fn to_document(&self) -> Result<serde_json::Value, PersistenceError> {
        let written_at = Utc::now();
        let document = match self {
            Snapshot::Transitions(records) => serde_json::to_value(SnapshotDocument {
                store: self.store_name(),
                written_at,
                records,
            })?,
            Snapshot::Workflows(records) => serde_json::to_value(SnapshotDocument {
                store: self.store_name(),
                written_at,
                records,
            })?,
        };
        Ok(document)
    }

    /// Parse a persisted document back into the snapshot of `store_name`
    pub fn from_document(
        store_name: &str,
        document: serde_json::Value,
    ) -> Result<Self, PersistenceError> {
        match store_name {
            "transitions" => Ok(Snapshot::Transitions(records_of(document)?)),
            "workflows" => Ok(Snapshot::Workflows(records_of(document)?)),
            other => Err(PersistenceError::UnknownStore(other.to_string())),
        }
    }
}

#[derive(Serialize)]
struct SnapshotDocument<'a, T: Serialize> {
    store: &'static str,
    written_at: DateTime<Utc>,
    records: &'a [T],
}

#[derive(Deserialize)]
struct StoredDocument<T> {
    records: Vec<T>,
}

fn records_of<T: DeserializeOwned>(document: serde_json::Value) -> Result<Vec<T>, PersistenceError> {
    let stored: StoredDocument<T> = serde_json::from_value(document)?;
    Ok(stored.records)
}

/// Storage contract supplied by the embedding application
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn persist(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;

    /// Latest snapshot written for `store_name`, `None` when nothing was
    /// ever persisted
    async fn load(&self, store_name: &str) -> Result<Option<Snapshot>, PersistenceError>;
}

/// One pretty-printed JSON document per store inside a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the document for a store name
    pub fn document_path(&self, store_name: &str) -> PathBuf {
        self.directory.join(format!("{}.json", store_name))
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn persist(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.directory).await?;

        let document = snapshot.to_document()?;
        let content = serde_json::to_vec_pretty(&document)?;

        // Write then rename so readers never observe a half written file
        let target = self.document_path(snapshot.store_name());
        let staging = self
            .directory
            .join(format!(".{}.json.tmp", snapshot.store_name()));
        fs::write(&staging, content).await?;
        fs::rename(&staging, &target).await?;

        debug!(
            store = snapshot.store_name(),
            records = snapshot.record_count(),
            path = %target.display(),
            "Snapshot persisted"
        );
        Ok(())
    }

    async fn load(&self, store_name: &str) -> Result<Option<Snapshot>, PersistenceError> {
        let path = self.document_path(store_name);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(store = store_name, path = %path.display(), "No snapshot on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let document: serde_json::Value = serde_json::from_slice(&content)?;
        let snapshot = Snapshot::from_document(store_name, document)?;
        info!(
            store = store_name,
            records = snapshot.record_count(),
            path = %path.display(),
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }
}

/// Keeps the latest document per store in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: Mutex<HashMap<String, serde_json::Value>>,
    writes: Mutex<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, store_name: &str) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(store_name)
            .cloned()
    }

    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn persist(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let document = snapshot.to_document()?;
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(snapshot.store_name().to_string(), document);
        *self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        Ok(())
    }

    async fn load(&self, store_name: &str) -> Result<Option<Snapshot>, PersistenceError> {
        self.latest(store_name)
            .map(|document| Snapshot::from_document(store_name, document))
            .transpose()
    }
}

enum WriterMessage {
    Write(Snapshot),
    Flush(oneshot::Sender<()>),
}

/// Cheap handle used by components to submit snapshots
#[derive(Clone, Default)]
pub struct PersistenceHook {
    sender: Option<mpsc::UnboundedSender<WriterMessage>>,
}

impl std::fmt::Debug for PersistenceHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceHook")
            .field("enabled", &self.sender.is_some())
            .finish()
    }
}

impl PersistenceHook {
    /// A hook that drops every snapshot
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Spawn the writer task for `store`. Must be called inside a tokio runtime.
    ///
    /// The task ends once every clone of the returned hook has been dropped.
    pub fn spawn(
        store: Arc<dyn SnapshotStore>,
        metrics: Arc<CoreMetrics>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<WriterMessage>();

        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    WriterMessage::Write(snapshot) => {
                        if let Err(e) = store.persist(&snapshot).await {
                            metrics.record_persistence_failure();
                            error!(
                                store = snapshot.store_name(),
                                error = %e,
                                "Snapshot persistence failed"
                            );
                        }
                    }
                    WriterMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            info!("Snapshot writer stopped");
        });

        (
            Self {
                sender: Some(sender),
            },
            handle,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue a snapshot for writing. Never blocks and never fails the caller.
    pub fn submit(&self, snapshot: Snapshot) {
        if let Some(sender) = &self.sender {
            if sender.send(WriterMessage::Write(snapshot)).is_err() {
                debug!("Snapshot writer gone, dropping snapshot");
            }
        }
    }

    /// Wait until every snapshot submitted before this call has been handled
    pub async fn flush(&self) {
        if let Some(sender) = &self.sender {
            let (done, wait) = oneshot::channel();
            if sender.send(WriterMessage::Flush(done)).is_ok() {
                let _ = wait.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_lifecycle::{AgentState, TransitionMetadata};
    use tempfile::TempDir;

    fn sample_records() -> Vec<TransitionRecord> {
        vec![
            TransitionRecord::new(
                AgentState::Idle,
                AgentState::Scanning,
                "scan requested".to_string(),
                TransitionMetadata::default(),
            ),
            TransitionRecord::new(
                AgentState::Scanning,
                AgentState::Analyzing,
                "scan finished".to_string(),
                TransitionMetadata::default(),
            ),
        ]
    }

    #[tokio::test]
    async fn test_json_file_store_writes_one_document_per_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state"));

        store
            .persist(&Snapshot::Transitions(sample_records()))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(store.document_path("transitions")).unwrap();
        let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(document["store"], "transitions");
        let records = document["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["from"], "idle");
        assert_eq!(records[1]["to"], "analyzing");
        // RFC 3339 timestamps parse back
        let ts = records[0]["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn test_hook_writes_in_submission_order() {
        let store = Arc::new(InMemoryStore::new());
        let (hook, _handle) = PersistenceHook::spawn(store.clone(), Arc::new(CoreMetrics::new()));

        let records = sample_records();
        hook.submit(Snapshot::Transitions(records[..1].to_vec()));
        hook.submit(Snapshot::Transitions(records.clone()));
        hook.flush().await;

        assert_eq!(store.write_count(), 2);
        let latest = store.latest("transitions").unwrap();
        assert_eq!(latest["records"].as_array().unwrap().len(), 2);
    }

    struct BrokenStore;

    #[async_trait]
    impl SnapshotStore for BrokenStore {
        async fn persist(&self, _snapshot: &Snapshot) -> Result<(), PersistenceError> {
            Err(PersistenceError::IoError(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        async fn load(&self, _store_name: &str) -> Result<Option<Snapshot>, PersistenceError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_counted_not_raised() {
        let metrics = Arc::new(CoreMetrics::new());
        let (hook, _handle) = PersistenceHook::spawn(Arc::new(BrokenStore), metrics.clone());

        hook.submit(Snapshot::Workflows(Vec::new()));
        hook.flush().await;

        assert_eq!(metrics.get_stats().persistence_failures, 1);
    }

    #[tokio::test]
    async fn test_json_file_store_loads_what_it_wrote() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("transitions").await.unwrap().is_none());

        let records = sample_records();
        store
            .persist(&Snapshot::Transitions(records.clone()))
            .await
            .unwrap();

        match store.load("transitions").await.unwrap() {
            Some(Snapshot::Transitions(loaded)) => assert_eq!(loaded, records),
            other => panic!("unexpected snapshot: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_and_unknown_documents() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.document_path("workflows"), b"{ not json").unwrap();

        assert!(matches!(
            store.load("workflows").await,
            Err(PersistenceError::SerializationError(_))
        ));
        assert!(matches!(
            Snapshot::from_document("metrics", serde_json::json!({ "records": [] })),
            Err(PersistenceError::UnknownStore(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_store_loads_latest_document() {
        let store = InMemoryStore::new();
        assert!(store.load("workflows").await.unwrap().is_none());

        store.persist(&Snapshot::Workflows(Vec::new())).await.unwrap();
        let loaded = store.load("workflows").await.unwrap().unwrap();
        assert_eq!(loaded.store_name(), "workflows");
        assert_eq!(loaded.record_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_hook_is_a_no_op() {
        let hook = PersistenceHook::disabled();
        assert!(!hook.is_enabled());
        hook.submit(Snapshot::Workflows(Vec::new()));
        hook.flush().await;
    }
}
