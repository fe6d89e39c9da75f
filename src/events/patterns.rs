// Pattern analysis over a window of event history

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::types::EventEnvelope;
use crate::priority::EventPriority;

/// One recurring run of consecutive event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSequence {
    pub event_types: Vec<String>,
    pub occurrences: usize,
}

/// Summary of the envelopes inside an analysis window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternAnalysis {
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub events_by_priority: BTreeMap<EventPriority, usize>,
    /// Mean number of windowed envelopes per chain, 0.0 when none are chained
    pub average_chain_length: f64,
    /// Most frequent sequences, ties broken by first occurrence
    pub common_sequences: Vec<EventSequence>,
}

pub(crate) fn analyze<'a, I>(events: I, sequence_length: usize, top: usize) -> PatternAnalysis
where
    I: IntoIterator<Item = &'a EventEnvelope>,
{
    let events: Vec<&EventEnvelope> = events.into_iter().collect();

    let mut events_by_type = BTreeMap::new();
    let mut events_by_priority = BTreeMap::new();
    let mut chain_lengths: HashMap<Uuid, usize> = HashMap::new();

    for event in &events {
        *events_by_type.entry(event.event_type.clone()).or_insert(0) += 1;
        *events_by_priority.entry(event.priority).or_insert(0) += 1;
        if let Some(chain_id) = event.chain_id {
            *chain_lengths.entry(chain_id).or_insert(0) += 1;
        }
    }

    let average_chain_length = if chain_lengths.is_empty() {
        0.0
    } else {
        chain_lengths.values().sum::<usize>() as f64 / chain_lengths.len() as f64
    };

    PatternAnalysis {
        total_events: events.len(),
        events_by_type,
        events_by_priority,
        average_chain_length,
        common_sequences: common_sequences(&events, sequence_length, top),
    }
}

fn common_sequences(events: &[&EventEnvelope], length: usize, top: usize) -> Vec<EventSequence> {
    if length == 0 || events.len() < length {
        return Vec::new();
    }

    // sequence -> (occurrences, first window index)
    let mut counts: HashMap<Vec<&str>, (usize, usize)> = HashMap::new();
    for (index, window) in events.windows(length).enumerate() {
        let key: Vec<&str> = window.iter().map(|e| e.event_type.as_str()).collect();
        counts.entry(key).or_insert((0, index)).0 += 1;
    }

    let mut ranked: Vec<(Vec<&str>, usize, usize)> = counts
        .into_iter()
        .map(|(key, (occurrences, first))| (key, occurrences, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(top)
        .map(|(key, occurrences, _)| EventSequence {
            event_types: key.into_iter().map(str::to_string).collect(),
            occurrences,
        })
        .collect()
}
