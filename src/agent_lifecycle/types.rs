// Core types for the agent lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Agent states in the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Waiting for a request
    Idle,
    /// Something went wrong; only recovery, idle or shutdown may follow
    Error,
    /// Blocked on input from the user
    WaitingUser,
    /// Switching between user requests
    ContextSwitching,
    /// Terminal state
    Shutdown,
    Analyzing,
    Planning,
    Navigating,
    /// Scanning the workspace
    Scanning,
    AnalyzingComponent,
    AnalyzingDependencies,
    PathTransitioning,
    Implementing,
    Coding,
    WritingTests,
    Testing,
    Validating,
    /// Building the code embedding index
    Embedding,
    /// Override state: any target is accepted while here
    Recovery,
}

impl AgentState {
    pub const ALL: [AgentState; 19] = [
        AgentState::Idle,
        AgentState::Error,
        AgentState::WaitingUser,
        AgentState::ContextSwitching,
        AgentState::Shutdown,
        AgentState::Analyzing,
        AgentState::Planning,
        AgentState::Navigating,
        AgentState::Scanning,
        AgentState::AnalyzingComponent,
        AgentState::AnalyzingDependencies,
        AgentState::PathTransitioning,
        AgentState::Implementing,
        AgentState::Coding,
        AgentState::WritingTests,
        AgentState::Testing,
        AgentState::Validating,
        AgentState::Embedding,
        AgentState::Recovery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Error => "error",
            AgentState::WaitingUser => "waiting_user",
            AgentState::ContextSwitching => "context_switching",
            AgentState::Shutdown => "shutdown",
            AgentState::Analyzing => "analyzing",
            AgentState::Planning => "planning",
            AgentState::Navigating => "navigating",
            AgentState::Scanning => "scanning",
            AgentState::AnalyzingComponent => "analyzing_component",
            AgentState::AnalyzingDependencies => "analyzing_dependencies",
            AgentState::PathTransitioning => "path_transitioning",
            AgentState::Implementing => "implementing",
            AgentState::Coding => "coding",
            AgentState::WritingTests => "writing_tests",
            AgentState::Testing => "testing",
            AgentState::Validating => "validating",
            AgentState::Embedding => "embedding",
            AgentState::Recovery => "recovery",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Shutdown)
    }

    /// States that walk the code base
    pub fn is_navigation(self) -> bool {
        matches!(
            self,
            AgentState::Navigating
                | AgentState::AnalyzingComponent
                | AgentState::AnalyzingDependencies
                | AgentState::PathTransitioning
        )
    }

    /// States that produce or check code
    pub fn is_implementation(self) -> bool {
        matches!(
            self,
            AgentState::Implementing
                | AgentState::Coding
                | AgentState::WritingTests
                | AgentState::Testing
                | AgentState::Validating
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Unknown agent state: {}", s))
    }
}

/// Context handed to a transition.
///
/// The named fields are the reserved keys understood by the state machine;
/// anything else goes into `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl TransitionMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_request(mut self, request: impl Into<String>) -> Self {
        self.user_request = Some(request.into());
        self
    }

    pub fn with_current_task(mut self, task: impl Into<String>) -> Self {
        self.current_task = Some(task.into());
        self
    }

    pub fn with_current_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_path = Some(path.into());
        self
    }

    pub fn with_target_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<PathBuf>) -> Self {
        self.dependencies = Some(dependencies);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One accepted state change. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub from: AgentState,
    pub to: AgentState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub metadata: TransitionMetadata,
}

impl TransitionRecord {
    pub fn new(
        from: AgentState,
        to: AgentState,
        reason: String,
        metadata: TransitionMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            timestamp: Utc::now(),
            reason,
            metadata,
        }
    }
}

/// Where the agent is while walking the code base
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationContext {
    pub current_path: Option<PathBuf>,
    pub target_path: Option<PathBuf>,
    pub components_analyzed: BTreeSet<PathBuf>,
    pub dependency_chain: Vec<PathBuf>,
    /// Timestamped `"<rfc3339>: <state>"` entries
    pub history: Vec<String>,
}

/// Running bookkeeping kept next to the current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub last_user_request: Option<String>,
    pub current_task: Option<String>,
    /// Number of transitions into `error`
    pub error_count: u32,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub navigation: NavigationContext,
}

impl Default for StateMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            last_user_request: None,
            current_task: None,
            error_count: 0,
            start_time: now,
            last_updated: now,
            navigation: NavigationContext::default(),
        }
    }
}

/// Aggregates over the transition log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionStatistics {
    pub total_transitions: usize,
    /// Transitions leaving each state
    pub state_counts: BTreeMap<AgentState, usize>,
    /// Fraction of transitions into `error`
    pub error_rate: f64,
    /// Five most common `from -> to` pairs, most frequent first
    pub common_transitions: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_states_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(AgentState::AnalyzingDependencies).unwrap(),
            json!("analyzing_dependencies")
        );
        for state in AgentState::ALL {
            let value = serde_json::to_value(state).unwrap();
            assert_eq!(value, json!(state.as_str()));
            assert_eq!(state.as_str().parse::<AgentState>(), Ok(state));
        }
        assert!("sleeping".parse::<AgentState>().is_err());
    }

    #[test]
    fn test_metadata_omits_unset_keys() {
        let metadata = TransitionMetadata::new()
            .with_current_path("src/lib.rs")
            .with_extra("attempt", json!(2));

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value, json!({"current_path": "src/lib.rs", "extra": {"attempt": 2}}));
        assert!(!metadata.is_empty());
        assert!(TransitionMetadata::new().is_empty());
    }

    #[test]
    fn test_state_groups() {
        assert!(AgentState::Shutdown.is_terminal());
        assert!(!AgentState::Error.is_terminal());
        assert!(AgentState::PathTransitioning.is_navigation());
        assert!(AgentState::WritingTests.is_implementation());
        assert!(!AgentState::Idle.is_implementation());
    }
}
