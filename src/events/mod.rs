// Event Bus Module - Priority-tiered publish/subscribe with history and chains
//
// Publishers enqueue envelopes on one of four priority tiers. Each tier is
// drained by its own consumer, so a critical event never waits behind a
// backlog of low priority ones.

pub mod bus;
pub mod history;
pub mod patterns;
pub mod subscriber;
pub mod types;

pub use bus::{EventBus, EventBusError};
pub use history::HistoryQuery;
pub use patterns::{EventSequence, PatternAnalysis};
pub use subscriber::{subscriber_fn, EventSubscriber, FnSubscriber};
pub use types::{
    EventCategory, EventChain, EventEnvelope, EventKind, PayloadFilter, PublishRequest,
    SubscriptionInfo, SubscriptionOptions,
};
