// Core types for the priority event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::priority::EventPriority;

/// Event type names published by the core itself
pub struct EventKind;

impl EventKind {
    // Agent lifecycle
    pub const STATE_CHANGED: &'static str = "state_changed";

    // Workflow lifecycle
    pub const WORKFLOW_CREATED: &'static str = "workflow_created";
    pub const WORKFLOW_STARTED: &'static str = "workflow_started";
    pub const WORKFLOW_COMPLETED: &'static str = "workflow_completed";
    pub const WORKFLOW_FAILED: &'static str = "workflow_failed";
    pub const WORKFLOW_CANCELLED: &'static str = "workflow_cancelled";

    // Workflow steps
    pub const STEP_COMPLETED: &'static str = "workflow_step_completed";
    pub const STEP_FAILED: &'static str = "workflow_step_failed";
}

/// Coarse grouping of events, used for chains, filtering and analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Navigation,
    Implementation,
    State,
    Workflow,
    Error,
    System,
    User,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::Navigation => "navigation",
            EventCategory::Implementation => "implementation",
            EventCategory::State => "state",
            EventCategory::Workflow => "workflow",
            EventCategory::Error => "error",
            EventCategory::System => "system",
            EventCategory::User => "user",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published occurrence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub priority: EventPriority,
    pub category: Option<EventCategory>,
    pub chain_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Everything a publisher supplies; the bus fills in id and timestamp
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub event_type: String,
    pub payload: Value,
    pub priority: EventPriority,
    pub category: Option<EventCategory>,
    pub chain_id: Option<Uuid>,
    pub metadata: Map<String, Value>,
}

impl PublishRequest {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            priority: EventPriority::Normal,
            category: None,
            chain_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn in_chain(mut self, chain_id: Uuid) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub(crate) fn into_envelope(self) -> EventEnvelope {
        EventEnvelope {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            payload: self.payload,
            priority: self.priority,
            category: self.category,
            chain_id: self.chain_id,
            metadata: self.metadata,
            timestamp: Utc::now(),
        }
    }
}

type PayloadPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Decides whether a subscription wants a payload.
///
/// Field constraints require the payload to be a JSON object carrying each key
/// with an equal value. A predicate, when set, must also accept the payload.
#[derive(Clone, Default)]
pub struct PayloadFilter {
    fields: Map<String, Value>,
    predicate: Option<PayloadPredicate>,
}

impl fmt::Debug for PayloadFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadFilter")
            .field("fields", &self.fields)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl PayloadFilter {
    /// Accepts every payload
    pub fn any() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, payload: &Value) -> bool {
        if !self.fields.is_empty() {
            let Some(object) = payload.as_object() else {
                return false;
            };
            let fields_match = self
                .fields
                .iter()
                .all(|(key, expected)| object.get(key) == Some(expected));
            if !fields_match {
                return false;
            }
        }
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(payload))
    }
}

/// Optional settings for a subscription
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Label reported through [`SubscriptionInfo`]. It does not filter or
    /// reorder delivery; envelopes are dispatched by their own priority.
    pub priority: EventPriority,
    pub category: Option<EventCategory>,
    pub filter: PayloadFilter,
}

impl SubscriptionOptions {
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Only receive envelopes published under this category
    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_filter(mut self, filter: PayloadFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Read-only view of a subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub event_type: String,
    pub priority: EventPriority,
    pub category: Option<EventCategory>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Explicitly opened group of correlated envelopes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventChain {
    pub id: Uuid,
    pub category: EventCategory,
    pub events: Vec<EventEnvelope>,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filter_accepts_anything() {
        let filter = PayloadFilter::any();
        assert!(filter.matches(&json!({"a": 1})));
        assert!(filter.matches(&json!("plain string")));
        assert!(filter.matches(&Value::Null));
    }

    #[test]
    fn test_field_filter_requires_equal_values() {
        let filter = PayloadFilter::any().field("path", json!("src/lib.rs"));
        assert!(filter.matches(&json!({"path": "src/lib.rs", "extra": true})));
        assert!(!filter.matches(&json!({"path": "src/main.rs"})));
        assert!(!filter.matches(&json!({"other": "src/lib.rs"})));
        assert!(!filter.matches(&json!(["src/lib.rs"])));
    }

    #[test]
    fn test_predicate_and_fields_combine() {
        let filter = PayloadFilter::any()
            .field("kind", json!("step"))
            .predicate(|payload| payload["attempt"].as_u64().unwrap_or(0) > 1);
        assert!(filter.matches(&json!({"kind": "step", "attempt": 2})));
        assert!(!filter.matches(&json!({"kind": "step", "attempt": 1})));
        assert!(!filter.matches(&json!({"kind": "workflow", "attempt": 3})));
    }

    #[test]
    fn test_publish_request_builds_envelope() {
        let chain = Uuid::new_v4();
        let envelope = PublishRequest::new("file_opened", json!({"path": "a.rs"}))
            .with_priority(EventPriority::High)
            .with_category(EventCategory::Navigation)
            .in_chain(chain)
            .with_metadata("source", json!("test"))
            .into_envelope();

        assert_eq!(envelope.event_type, "file_opened");
        assert_eq!(envelope.priority, EventPriority::High);
        assert_eq!(envelope.category, Some(EventCategory::Navigation));
        assert_eq!(envelope.chain_id, Some(chain));
        assert_eq!(envelope.metadata["source"], json!("test"));

        let serialized = serde_json::to_value(&envelope).unwrap();
        assert_eq!(serialized["type"], "file_opened");
        assert_eq!(serialized["category"], "navigation");
        assert_eq!(serialized["priority"], "high");
    }
}
