use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use super::types::StepKind;
use crate::agent_lifecycle::AgentState;

/// What a handler knows about the step it is running
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    pub workflow_id: Uuid,
    pub step_id: Uuid,
    pub kind: StepKind,
    pub description: String,
    /// 1 on the first try
    pub attempt: u32,
    pub metadata: Map<String, Value>,
    /// Results of the steps this one depends on
    pub dependency_results: HashMap<Uuid, Value>,
    /// Agent state at the start of the attempt, when a state machine is attached
    pub agent_state: Option<AgentState>,
}

/// Performs the work for one step kind.
///
/// An `Err` counts as a failed attempt and is retried up to the step's limit.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, context: &StepContext) -> anyhow::Result<Value>;
}

pub struct FnHandler<F, Fut> {
    callback: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a [`StepHandler`]
pub fn handler_fn<F, Fut>(callback: F) -> FnHandler<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnHandler {
        callback,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, context: &StepContext) -> anyhow::Result<Value> {
        (self.callback)(context.clone()).await
    }
}

/// One handler per step kind
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<StepKind, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the kind
    pub fn register(&mut self, kind: StepKind, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        let mut kinds: Vec<StepKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
