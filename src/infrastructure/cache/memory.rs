//! In-process cache: TTL key-value entries plus broadcast pub/sub channels

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use crate::application::ports::{Cache, CacheError, ChannelSubscription};
use crate::support::deadline::instant_after;

/// Default per-channel buffer
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
    channel_capacity: usize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
            channel_capacity: capacity.max(1),
        }
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries and channels nobody listens on.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
        before.saturating_sub(self.entries.len())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: instant_after(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, CacheError> {
        let delivered = match self.channels.get(channel) {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            self.channels.remove_if(channel, |_, tx| tx.receiver_count() == 0);
        }
        debug!(channel, receivers = delivered, "Published to channel");
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, CacheError> {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe();
        Ok(ChannelSubscription::new(channel, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn unbounded_ttl_is_stored() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::MAX).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn purge_drops_expired_entries_only() {
        let cache = InMemoryCache::new();
        cache.set("short", vec![1], Duration::from_millis(10)).await.unwrap();
        cache.set("long", vec![2], Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_made_before_it() {
        let cache = InMemoryCache::new();
        let mut sub = cache.subscribe("abc").await.unwrap();
        assert_eq!(cache.publish("abc", b"hi".to_vec()).await.unwrap(), 1);
        let got = sub.recv(Duration::from_millis(100)).await.unwrap();
        assert_eq!(got, b"hi".to_vec());
    }

    #[tokio::test]
    async fn publish_without_subscribers_reports_zero() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.publish("nobody", b"x".to_vec()).await.unwrap(), 0);

        let sub = cache.subscribe("gone").await.unwrap();
        drop(sub);
        assert_eq!(cache.publish("gone", b"x".to_vec()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recv_times_out() {
        let cache = InMemoryCache::new();
        let mut sub = cache.subscribe("quiet").await.unwrap();
        let err = sub.recv(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, CacheError::Timeout("quiet".into()));
    }
}
