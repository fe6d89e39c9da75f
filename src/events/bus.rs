// Priority-tiered event bus
//
// Publishing is synchronous: the envelope is recorded in history, appended to
// its chain and queued on the channel of its priority tier. One consumer task
// per tier drains its channel in FIFO order and fans each envelope out to the
// matching subscribers concurrently.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::history::{EventHistory, HistoryQuery};
use super::patterns::{self, PatternAnalysis};
use super::subscriber::EventSubscriber;
use super::types::{
    EventCategory, EventChain, EventEnvelope, PayloadFilter, PublishRequest, SubscriptionInfo,
    SubscriptionOptions,
};
use crate::config::EventBusConfig;
use crate::observability::CoreMetrics;
use crate::priority::EventPriority;
use crate::shutdown::ShutdownSignal;
use crate::telemetry::create_delivery_span;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Event chain not found: {0}")]
    ChainNotFound(Uuid),

    #[error("Event chain already closed: {0}")]
    ChainAlreadyClosed(Uuid),

    #[error("Event bus consumers already started")]
    AlreadyStarted,
}

struct SubscriptionEntry {
    info: SubscriptionInfo,
    filter: PayloadFilter,
    subscriber: Arc<dyn EventSubscriber>,
}

impl SubscriptionEntry {
    fn wants(&self, envelope: &EventEnvelope) -> bool {
        self.info.active
            && self.info.event_type == envelope.event_type
            && self
                .info
                .category
                .map_or(true, |category| envelope.category == Some(category))
            && self.filter.matches(&envelope.payload)
    }
}

type Queue = mpsc::UnboundedSender<Arc<EventEnvelope>>;
type QueueReceiver = mpsc::UnboundedReceiver<Arc<EventEnvelope>>;

struct BusInner {
    config: EventBusConfig,
    metrics: Arc<CoreMetrics>,
    subscriptions: RwLock<Vec<SubscriptionEntry>>,
    history: Mutex<EventHistory>,
    chains: Mutex<HashMap<Uuid, EventChain>>,
    // Indexed by EventPriority::tier_index
    queues: Vec<Queue>,
    receivers: Mutex<Vec<QueueReceiver>>,
}

/// Publish/subscribe hub shared by the orchestration components.
///
/// Cloning is cheap; all clones share the same subscriptions, history and
/// queues.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default(), Arc::new(CoreMetrics::new()))
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("max_history", &self.inner.config.max_history)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig, metrics: Arc<CoreMetrics>) -> Self {
        let mut queues = Vec::with_capacity(EventPriority::ALL.len());
        let mut receivers = Vec::with_capacity(EventPriority::ALL.len());
        for _ in EventPriority::ALL {
            let (sender, receiver) = mpsc::unbounded_channel();
            queues.push(sender);
            receivers.push(receiver);
        }

        Self {
            inner: Arc::new(BusInner {
                history: Mutex::new(EventHistory::new(config.max_history)),
                config,
                metrics,
                subscriptions: RwLock::new(Vec::new()),
                chains: Mutex::new(HashMap::new()),
                queues,
                receivers: Mutex::new(receivers),
            }),
        }
    }

    /// Spawn one consumer task per priority tier.
    ///
    /// Envelopes published before `start` stay queued and are delivered once
    /// the consumers run. The consumers exit when `shutdown` fires.
    pub fn start(&self, shutdown: ShutdownSignal) -> Result<Vec<JoinHandle<()>>, EventBusError> {
        let receivers = std::mem::take(&mut *lock(&self.inner.receivers));
        if receivers.is_empty() {
            return Err(EventBusError::AlreadyStarted);
        }

        let handles = EventPriority::ALL
            .into_iter()
            .zip(receivers)
            .map(|(tier, receiver)| {
                tokio::spawn(consume(
                    self.inner.clone(),
                    tier,
                    receiver,
                    shutdown.clone(),
                ))
            })
            .collect();

        info!("Event bus consumers started");
        Ok(handles)
    }

    /// Publish an envelope and return its id.
    ///
    /// A chain id that is unknown or already closed is logged and ignored for
    /// the chain; the envelope is still recorded and delivered.
    pub fn publish(&self, request: PublishRequest) -> Uuid {
        let envelope = Arc::new(request.into_envelope());
        let id = envelope.id;

        lock(&self.inner.history).record(envelope.clone());

        if let Some(chain_id) = envelope.chain_id {
            let mut chains = lock(&self.inner.chains);
            match chains.get_mut(&chain_id) {
                Some(chain) if !chain.completed => chain.events.push(envelope.as_ref().clone()),
                Some(_) => warn!(
                    chain_id = %chain_id,
                    event_type = %envelope.event_type,
                    "Publish references a closed chain, not appending"
                ),
                None => warn!(
                    chain_id = %chain_id,
                    event_type = %envelope.event_type,
                    "Publish references an unknown chain, not appending"
                ),
            }
        }

        let tier = envelope.priority;
        debug!(
            event_id = %id,
            event_type = %envelope.event_type,
            priority = %tier,
            "Event published"
        );
        if self.inner.queues[tier.tier_index()].send(envelope).is_err() {
            warn!(event_id = %id, "Event consumer for tier {} has stopped", tier);
        }
        self.inner.metrics.record_event_published();
        id
    }

    /// Register a subscriber for one event type
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        subscriber: Arc<dyn EventSubscriber>,
        options: SubscriptionOptions,
    ) -> Uuid {
        let info = SubscriptionInfo {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            priority: options.priority,
            category: options.category,
            active: true,
            created_at: Utc::now(),
        };
        let id = info.id;
        debug!(subscription_id = %id, event_type = %info.event_type, "Subscription added");

        write(&self.inner.subscriptions).push(SubscriptionEntry {
            info,
            filter: options.filter,
            subscriber,
        });
        id
    }

    /// Deactivate a subscription. Returns false for an unknown id.
    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        let mut subscriptions = write(&self.inner.subscriptions);
        match subscriptions
            .iter_mut()
            .find(|entry| entry.info.id == subscription_id)
        {
            Some(entry) => {
                entry.info.active = false;
                debug!(subscription_id = %subscription_id, "Subscription deactivated");
                true
            }
            None => {
                debug!(subscription_id = %subscription_id, "Unsubscribe of unknown subscription");
                false
            }
        }
    }

    /// Drop a subscription entirely, active or not
    pub fn remove_subscription(&self, subscription_id: Uuid) -> Result<(), EventBusError> {
        let mut subscriptions = write(&self.inner.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|entry| entry.info.id != subscription_id);
        if subscriptions.len() == before {
            return Err(EventBusError::SubscriptionNotFound(subscription_id));
        }
        Ok(())
    }

    pub fn subscription(&self, subscription_id: Uuid) -> Option<SubscriptionInfo> {
        read(&self.inner.subscriptions)
            .iter()
            .find(|entry| entry.info.id == subscription_id)
            .map(|entry| entry.info.clone())
    }

    /// Number of subscriptions, inactive ones included
    pub fn subscription_count(&self) -> usize {
        read(&self.inner.subscriptions).len()
    }

    pub fn start_chain(&self, category: EventCategory, metadata: Map<String, Value>) -> Uuid {
        let chain = EventChain {
            id: Uuid::new_v4(),
            category,
            events: Vec::new(),
            created_at: Utc::now(),
            completed: false,
            metadata,
        };
        let id = chain.id;
        lock(&self.inner.chains).insert(id, chain);
        debug!(chain_id = %id, category = %category, "Event chain started");
        id
    }

    pub fn complete_chain(&self, chain_id: Uuid) -> Result<(), EventBusError> {
        let mut chains = lock(&self.inner.chains);
        let chain = chains
            .get_mut(&chain_id)
            .ok_or(EventBusError::ChainNotFound(chain_id))?;
        if chain.completed {
            return Err(EventBusError::ChainAlreadyClosed(chain_id));
        }
        chain.completed = true;
        debug!(chain_id = %chain_id, events = chain.events.len(), "Event chain completed");
        Ok(())
    }

    pub fn chain(&self, chain_id: Uuid) -> Option<EventChain> {
        lock(&self.inner.chains).get(&chain_id).cloned()
    }

    pub fn chain_events(&self, chain_id: Uuid) -> Option<Vec<EventEnvelope>> {
        lock(&self.inner.chains)
            .get(&chain_id)
            .map(|chain| chain.events.clone())
    }

    /// Open chains, oldest first
    pub fn active_chains(&self) -> Vec<EventChain> {
        let mut active: Vec<EventChain> = lock(&self.inner.chains)
            .values()
            .filter(|chain| !chain.completed)
            .cloned()
            .collect();
        active.sort_by_key(|chain| chain.created_at);
        active
    }

    pub fn history(&self, query: &HistoryQuery) -> Vec<EventEnvelope> {
        lock(&self.inner.history).query(query)
    }

    pub fn history_len(&self) -> usize {
        lock(&self.inner.history).len()
    }

    /// Analyze envelopes published within `window` (the configured default
    /// when `None`), optionally restricted to one category
    pub fn analyze_patterns(
        &self,
        category: Option<EventCategory>,
        window: Option<Duration>,
    ) -> PatternAnalysis {
        let window = window
            .unwrap_or_else(|| {
                Duration::try_minutes(self.inner.config.pattern_window_minutes)
                    .unwrap_or(Duration::MAX)
            })
            .max(Duration::zero());
        // A window reaching past the representable range covers all history
        let since = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = lock(&self.inner.history).since(since);

        patterns::analyze(
            recent
                .iter()
                .map(|envelope| envelope.as_ref())
                .filter(|envelope| category.is_none() || envelope.category == category),
            self.inner.config.sequence_length,
            self.inner.config.top_sequences,
        )
    }
}

async fn consume(
    inner: Arc<BusInner>,
    tier: EventPriority,
    mut receiver: QueueReceiver,
    mut shutdown: ShutdownSignal,
) {
    debug!(tier = %tier, "Event consumer running");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let span = create_delivery_span(envelope.id, &envelope.event_type, tier.as_label());
        dispatch(&inner, envelope).instrument(span).await;
    }
    debug!(tier = %tier, "Event consumer stopped");
}

async fn dispatch(inner: &BusInner, envelope: Arc<EventEnvelope>) {
    let targets: Vec<(Uuid, Arc<dyn EventSubscriber>)> = read(&inner.subscriptions)
        .iter()
        .filter(|entry| entry.wants(&envelope))
        .map(|entry| (entry.info.id, entry.subscriber.clone()))
        .collect();

    if targets.is_empty() {
        debug!(event_type = %envelope.event_type, "No subscribers for event");
        return;
    }

    let mut deliveries = JoinSet::new();
    for (subscription_id, subscriber) in targets {
        let envelope = envelope.clone();
        deliveries.spawn(async move {
            let result = subscriber.on_event(&envelope).await;
            (subscription_id, result)
        });
    }

    while let Some(joined) = deliveries.join_next().await {
        match joined {
            Ok((_, Ok(()))) => inner.metrics.record_event_delivered(),
            Ok((subscription_id, Err(e))) => {
                inner.metrics.record_subscriber_failure();
                error!(
                    subscription_id = %subscription_id,
                    event_type = %envelope.event_type,
                    error = %e,
                    "Subscriber failed to handle event"
                );
            }
            Err(e) => {
                inner.metrics.record_subscriber_failure();
                error!(
                    event_type = %envelope.event_type,
                    error = %e,
                    "Subscriber task panicked"
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::subscriber_fn;
    use crate::shutdown::ShutdownCoordinator;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn small_bus(max_history: usize) -> EventBus {
        EventBus::new(
            EventBusConfig {
                max_history,
                ..EventBusConfig::default()
            },
            Arc::new(CoreMetrics::new()),
        )
    }

    fn forwarding(tx: mpsc::UnboundedSender<EventEnvelope>) -> Arc<dyn EventSubscriber> {
        Arc::new(subscriber_fn(move |event: EventEnvelope| {
            let tx = tx.clone();
            async move {
                tx.send(event)?;
                Ok::<(), anyhow::Error>(())
            }
        }))
    }

    #[test]
    fn test_chain_lifecycle() {
        let bus = small_bus(10);
        let chain = bus.start_chain(EventCategory::Navigation, Map::new());
        assert_eq!(bus.active_chains().len(), 1);

        bus.publish(PublishRequest::new("open", json!({})).in_chain(chain));
        assert!(bus.complete_chain(chain).is_ok());
        assert_eq!(
            bus.complete_chain(chain),
            Err(EventBusError::ChainAlreadyClosed(chain))
        );

        // closed chain ignores further publishes but history still records them
        bus.publish(PublishRequest::new("close", json!({})).in_chain(chain));
        assert_eq!(bus.chain_events(chain).unwrap().len(), 1);
        assert_eq!(bus.history_len(), 2);
        assert!(bus.active_chains().is_empty());
    }

    #[test]
    fn test_unknown_chain_is_reported() {
        let bus = small_bus(10);
        let missing = Uuid::new_v4();
        assert_eq!(
            bus.complete_chain(missing),
            Err(EventBusError::ChainNotFound(missing))
        );
        bus.publish(PublishRequest::new("orphan", json!({})).in_chain(missing));
        assert_eq!(bus.history_len(), 1);
    }

    #[test]
    fn test_unsubscribe_keeps_subscription_addressable() {
        let bus = small_bus(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = bus.subscribe("open", forwarding(tx), SubscriptionOptions::default());

        assert!(bus.unsubscribe(id));
        let info = bus.subscription(id).unwrap();
        assert!(!info.active);
        assert!(!bus.unsubscribe(Uuid::new_v4()));

        assert!(bus.remove_subscription(id).is_ok());
        assert_eq!(
            bus.remove_subscription(id),
            Err(EventBusError::SubscriptionNotFound(id))
        );
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_pattern_window_extremes_do_not_overflow() {
        let bus = EventBus::new(
            EventBusConfig {
                pattern_window_minutes: i64::MAX,
                ..EventBusConfig::default()
            },
            Arc::new(CoreMetrics::new()),
        );
        for event_type in ["a", "b", "c"] {
            bus.publish(PublishRequest::new(event_type, json!({})));
        }

        assert_eq!(bus.analyze_patterns(None, None).total_events, 3);
        assert_eq!(bus.analyze_patterns(None, Some(Duration::MAX)).total_events, 3);
        assert_eq!(bus.analyze_patterns(None, Some(Duration::MIN)).total_events, 0);
        assert_eq!(
            bus.analyze_patterns(None, Some(Duration::minutes(5))).total_events,
            3
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let bus = small_bus(10);
        let shutdown = ShutdownCoordinator::new();
        let handles = bus.start(shutdown.signal()).unwrap();
        assert_eq!(handles.len(), 4);
        assert!(matches!(
            bus.start(shutdown.signal()),
            Err(EventBusError::AlreadyStarted)
        ));

        shutdown.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_category_filter_on_subscription() {
        let bus = small_bus(10);
        let shutdown = ShutdownCoordinator::new();
        bus.start(shutdown.signal()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            "moved",
            forwarding(tx),
            SubscriptionOptions::default().with_category(EventCategory::Navigation),
        );

        bus.publish(PublishRequest::new("moved", json!({"n": 1})).with_category(EventCategory::User));
        bus.publish(PublishRequest::new("moved", json!({"n": 2})));
        bus.publish(
            PublishRequest::new("moved", json!({"n": 3})).with_category(EventCategory::Navigation),
        );

        let delivered = tokio::time::timeout(StdDuration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.payload["n"], 3);
        assert!(rx.try_recv().is_err());

        shutdown.shutdown();
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let metrics = Arc::new(CoreMetrics::new());
        let bus = EventBus::new(EventBusConfig::default(), metrics.clone());
        let shutdown = ShutdownCoordinator::new();
        bus.start(shutdown.signal()).unwrap();

        bus.subscribe(
            "tick",
            Arc::new(subscriber_fn(|_event: EventEnvelope| async move {
                Err::<(), _>(anyhow::anyhow!("subscriber exploded"))
            })),
            SubscriptionOptions::default(),
        );
        bus.subscribe(
            "tick",
            Arc::new(subscriber_fn(|event: EventEnvelope| async move {
                if event.event_type == "tick" {
                    panic!("subscriber panicked");
                }
                Ok::<(), anyhow::Error>(())
            })),
            SubscriptionOptions::default(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("tick", forwarding(tx), SubscriptionOptions::default());

        bus.publish(PublishRequest::new("tick", json!({})));
        let delivered = tokio::time::timeout(StdDuration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert!(delivered.is_some());

        // failures are counted once the fan-out for the envelope finishes
        let (marker_tx, mut marker) = mpsc::unbounded_channel();
        bus.subscribe("marker", forwarding(marker_tx), SubscriptionOptions::default());
        bus.publish(PublishRequest::new("marker", json!({})));
        tokio::time::timeout(StdDuration::from_secs(5), marker.recv())
            .await
            .unwrap();
        assert_eq!(metrics.get_stats().subscriber_failures, 2);

        shutdown.shutdown();
    }
}
