// Agent Lifecycle Module - Validated State Machine
//
// Tracks the single current state of the agent, rejects transitions the table
// does not allow and records every accepted one in an append-only log.

pub mod state_machine;
pub mod transitions;
pub mod types;

pub use state_machine::{AgentStateMachine, StateError, TransitionObserver};
pub use transitions::TransitionTable;
pub use types::{
    AgentState, NavigationContext, StateMetadata, TransitionMetadata, TransitionRecord,
    TransitionStatistics,
};
