//! Application ports (hexagonal architecture boundaries)
//!
//! The store contract lives with the aggregate in `domain::user`.
//! Broker, cache and metrics ports live here.

pub mod metrics;
pub mod outbound;

pub use metrics::{MetricsSink, SharedMetrics};
pub use outbound::{
    BrokerError, Cache, CacheError, ChannelSubscription, Delivery, Message, MessageBroker,
    Subscription,
};
