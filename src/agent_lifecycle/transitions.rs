// Transition table for the agent lifecycle

use std::collections::{BTreeMap, BTreeSet};

use super::types::AgentState;

/// Allowed next states per state. Fixed once handed to a state machine.
///
/// `recovery` is an override: while the current state is `recovery` every
/// target except `error` and `shutdown` is accepted, whatever the table
/// lists for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    edges: BTreeMap<AgentState, BTreeSet<AgentState>>,
}

impl Default for TransitionTable {
    fn default() -> Self {
        use AgentState::*;

        Self::empty()
            .with_edges(Idle, &[Scanning, Analyzing, Navigating, Planning, WaitingUser, Shutdown])
            .with_edges(Scanning, &[Analyzing, AnalyzingComponent, Error])
            .with_edges(Analyzing, &[Planning, Idle, Error])
            .with_edges(Planning, &[Implementing, Idle, Error])
            // Navigation
            .with_edges(Navigating, &[Scanning, AnalyzingComponent, PathTransitioning, Error])
            .with_edges(AnalyzingComponent, &[AnalyzingDependencies, Implementing, Error])
            .with_edges(AnalyzingDependencies, &[PathTransitioning, Implementing, Error])
            .with_edges(PathTransitioning, &[AnalyzingComponent, Implementing, Error])
            // Implementation
            .with_edges(Implementing, &[Coding, WritingTests, Error])
            .with_edges(Coding, &[Testing, WritingTests, Error])
            .with_edges(WritingTests, &[Testing, Error])
            .with_edges(Testing, &[Validating, Coding, Error])
            .with_edges(Validating, &[Idle, Implementing, Error])
            .with_edges(Embedding, &[Idle, Error])
            // User interaction
            .with_edges(WaitingUser, &[Idle, ContextSwitching, Shutdown, Error])
            .with_edges(ContextSwitching, &[Idle, Analyzing, Planning, Error])
            // Failure handling
            .with_edges(Error, &[Recovery, Idle, Shutdown])
    }
}

impl TransitionTable {
    /// A table with no edges. Only the recovery override applies.
    pub fn empty() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    /// Add allowed targets for `from`
    pub fn with_edges(mut self, from: AgentState, targets: &[AgentState]) -> Self {
        self.edges
            .entry(from)
            .or_default()
            .extend(targets.iter().copied());
        self
    }

    /// Whether `from -> to` is accepted
    pub fn permits(&self, from: AgentState, to: AgentState) -> bool {
        if from == AgentState::Recovery {
            return recovery_accepts(to);
        }
        self.edges
            .get(&from)
            .map_or(false, |targets| targets.contains(&to))
    }

    /// Targets reachable from `from`, in declaration order of [`AgentState`]
    pub fn allowed(&self, from: AgentState) -> Vec<AgentState> {
        if from == AgentState::Recovery {
            return AgentState::ALL
                .into_iter()
                .filter(|state| recovery_accepts(*state))
                .collect();
        }
        self.edges
            .get(&from)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Recovery may restart anywhere except back into failure or out of the
/// lifecycle altogether
fn recovery_accepts(to: AgentState) -> bool {
    !to.is_terminal() && to != AgentState::Error
}
