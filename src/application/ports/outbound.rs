//! Outbound ports: interfaces to the message broker and the key-value cache
//!
//! Both are external collaborators. The crate ships in-process
//! implementations in `infrastructure::{broker, cache}`; a networked
//! adapter only has to satisfy these traits.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::Headers;

// ── Broker ─────────────────────────────────────────────────────

/// A record published to (or read from) a broker topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    /// Identifies the operation (`create`, `update`, ...).
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// A message handed to a consumer, with its position in the topic log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: Message,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("topic {0} is not subscribed")]
    UnknownTopic(String),

    #[error("broker transport error: {0}")]
    Transport(String),
}

/// Producer/consumer-group broker.
///
/// Delivery is at-least-once: a message is handed out again to the same
/// group until its offset is committed.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), BrokerError>;

    /// Join `group` on `topics`. Reading resumes at the group's committed
    /// offsets.
    async fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next uncommitted message, waiting for one to be published if needed.
    ///
    /// Until [`commit`](Self::commit) is called, the same message is
    /// returned again.
    async fn recv(&mut self) -> Result<Delivery, BrokerError>;

    /// Mark `delivery` processed for this group.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}

// ── Cache ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("timed out waiting on channel {0}")]
    Timeout(String),

    #[error("channel {0} closed")]
    ChannelClosed(String),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Subscription to one pub/sub channel.
///
/// Created before the publisher may send, so nothing published after
/// `subscribe` returns can be missed.
pub struct ChannelSubscription {
    channel: String,
    receiver: broadcast::Receiver<Vec<u8>>,
}

impl ChannelSubscription {
    pub fn new(channel: impl Into<String>, receiver: broadcast::Receiver<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for one message, or fail with [`CacheError::Timeout`].
    pub async fn recv(&mut self, timeout: Duration) -> Result<Vec<u8>, CacheError> {
        let deadline = crate::support::deadline::instant_after(timeout);
        loop {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Ok(payload)) => return Ok(payload),
                Ok(Err(broadcast::error::RecvError::Lagged(count))) => {
                    tracing::warn!(channel = %self.channel, count, "Subscriber lagged");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(CacheError::ChannelClosed(self.channel.clone()))
                }
                Err(_) => return Err(CacheError::Timeout(self.channel.clone())),
            }
        }
    }
}

/// Key-value cache with TTL plus a minimal publish/subscribe primitive.
///
/// Entries are advisory: a missing key never means missing data.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether the key was present.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Publish on `channel`, returning how many subscribers received it.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, CacheError>;

    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, CacheError>;
}
