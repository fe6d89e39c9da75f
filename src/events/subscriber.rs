use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

use super::types::EventEnvelope;

/// Receives envelopes delivered by the event bus.
///
/// Errors are logged by the bus and never reach the publisher or other
/// subscribers.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn on_event(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

/// Subscriber backed by an async closure that takes the envelope by value
pub struct FnSubscriber<F, Fut> {
    callback: F,
    _future: PhantomData<fn() -> Fut>,
}

/// Wrap a closure as an [`EventSubscriber`]
pub fn subscriber_fn<F, Fut>(callback: F) -> FnSubscriber<F, Fut>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnSubscriber {
        callback,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> EventSubscriber for FnSubscriber<F, Fut>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        (self.callback)(event.clone()).await
    }
}
