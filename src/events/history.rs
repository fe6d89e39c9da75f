// Bounded event history and the queries run against it

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

use super::types::{EventCategory, EventEnvelope};

/// Criteria for [`crate::events::EventBus::history`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    pub event_type: Option<String>,
    pub category: Option<EventCategory>,
    pub chain_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn chain(mut self, chain_id: Uuid) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, envelope: &EventEnvelope) -> bool {
        if let Some(event_type) = &self.event_type {
            if &envelope.event_type != event_type {
                return false;
            }
        }
        if self.category.is_some() && envelope.category != self.category {
            return false;
        }
        if self.chain_id.is_some() && envelope.chain_id != self.chain_id {
            return false;
        }
        if let Some(since) = self.since {
            if envelope.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if envelope.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Ring buffer of published envelopes, oldest evicted first
#[derive(Debug)]
pub(crate) struct EventHistory {
    capacity: usize,
    entries: VecDeque<Arc<EventEnvelope>>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.clamp(1, 4096)),
        }
    }

    pub fn record(&mut self, envelope: Arc<EventEnvelope>) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn query(&self, query: &HistoryQuery) -> Vec<EventEnvelope> {
        let mut matched: Vec<EventEnvelope> = self
            .entries
            .iter()
            .filter(|envelope| query.matches(envelope))
            .map(|envelope| envelope.as_ref().clone())
            .collect();

        if let Some(limit) = query.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        matched
    }

    /// Envelopes at or after `since`, in publish order
    pub fn since(&self, since: DateTime<Utc>) -> Vec<Arc<EventEnvelope>> {
        self.entries
            .iter()
            .filter(|envelope| envelope.timestamp >= since)
            .cloned()
            .collect()
    }
}
