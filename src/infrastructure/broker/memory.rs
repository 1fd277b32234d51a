//! In-process message broker with consumer-group offsets
//!
//! Each topic is an append-only log. A consumer group remembers, per topic,
//! the offset of the next message it has not committed. `recv` keeps handing
//! out that message until it is committed, which gives at-least-once
//! delivery across handler failures and re-subscriptions.
//!
//! Once every group that ever subscribed to a topic has committed past a
//! record, the record is dropped. Offsets keep counting from where they
//! were, so a group that subscribes later starts at the oldest retained
//! record. Topics nobody subscribed to are kept whole.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::application::ports::{BrokerError, Delivery, Message, MessageBroker, Subscription};

struct Record {
    /// Broker-wide publish order, used to interleave topics fairly.
    seq: u64,
    message: Message,
}

/// Retained tail of one topic. `base` is the offset of `records[0]`.
#[derive(Default)]
struct TopicLog {
    base: u64,
    records: VecDeque<Record>,
}

impl TopicLog {
    /// Offset the next published record will get.
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&Record> {
        let index = usize::try_from(offset.checked_sub(self.base)?).ok()?;
        self.records.get(index)
    }

    /// Drop every record below `offset`.
    fn trim_to(&mut self, offset: u64) -> usize {
        let mut dropped = 0;
        while self.base < offset && self.records.pop_front().is_some() {
            self.base += 1;
            dropped += 1;
        }
        dropped
    }
}

#[derive(Default)]
struct State {
    logs: HashMap<String, TopicLog>,
    committed: HashMap<(String, String), u64>,
    /// Groups that have subscribed to each topic.
    groups: HashMap<String, HashSet<String>>,
    next_seq: u64,
    closed: bool,
}

impl State {
    fn base(&self, topic: &str) -> u64 {
        self.logs.get(topic).map_or(0, |log| log.base)
    }

    /// Next offset `group` will be handed on `topic`.
    fn committed(&self, group: &str, topic: &str) -> u64 {
        self.committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
            .max(self.base(topic))
    }

    /// Drop records of `topic` that every subscribed group has committed.
    fn compact(&mut self, topic: &str) {
        let Some(groups) = self.groups.get(topic) else {
            return;
        };
        let Some(floor) = groups.iter().map(|group| self.committed(group, topic)).min() else {
            return;
        };
        if let Some(log) = self.logs.get_mut(topic) {
            let dropped = log.trim_to(floor);
            if dropped > 0 {
                debug!(topic, dropped, base = log.base, "Topic log compacted");
            }
        }
    }

    /// Oldest uncommitted message for `group` across `topics`.
    fn next_for(&self, group: &str, topics: &[String]) -> Option<Delivery> {
        topics
            .iter()
            .filter_map(|topic| {
                let offset = self.committed(group, topic);
                self.logs
                    .get(topic)?
                    .get(offset)
                    .map(|record| (record.seq, offset, record))
            })
            .min_by_key(|(seq, _, _)| *seq)
            .map(|(_, offset, record)| Delivery {
                message: record.message.clone(),
                offset,
            })
    }
}

struct Inner {
    state: Mutex<State>,
    published: Notify,
}

/// Broker living in process memory. Cheap to clone; clones share the logs.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                published: Notify::new(),
            }),
        }
    }

    /// Messages currently retained on `topic`.
    pub async fn topic_len(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .logs
            .get(topic)
            .map_or(0, |log| log.records.len())
    }

    /// Number of messages ever published to `topic`.
    pub async fn published(&self, topic: &str) -> u64 {
        self.inner
            .state
            .lock()
            .await
            .logs
            .get(topic)
            .map_or(0, TopicLog::end)
    }

    /// Messages on `topic` not yet committed by `group`.
    pub async fn lag(&self, group: &str, topic: &str) -> u64 {
        let state = self.inner.state.lock().await;
        let end = state.logs.get(topic).map_or(0, TopicLog::end);
        end.saturating_sub(state.committed(group, topic))
    }

    /// Messages retained on `topic`, oldest first.
    pub async fn messages(&self, topic: &str) -> Vec<Message> {
        self.inner
            .state
            .lock()
            .await
            .logs
            .get(topic)
            .map(|log| log.records.iter().map(|r| r.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Reject further publishes and wake every waiting consumer with
    /// [`BrokerError::Closed`].
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.published.notify_waiters();
        info!("In-memory broker closed");
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: Message) -> Result<(), BrokerError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(BrokerError::Closed);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            debug!(topic = %message.topic, key = %message.key, seq, "Message published");
            state
                .logs
                .entry(message.topic.clone())
                .or_default()
                .records
                .push_back(Record { seq, message });
        }
        self.inner.published.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::Transport(
                "subscription needs at least one topic".into(),
            ));
        }
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(BrokerError::Closed);
            }
            for topic in topics {
                state
                    .groups
                    .entry(topic.to_string())
                    .or_default()
                    .insert(group.to_string());
            }
        }
        Ok(Box::new(InMemorySubscription {
            inner: self.inner.clone(),
            group: group.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }))
    }
}

struct InMemorySubscription {
    inner: Arc<Inner>,
    group: String,
    topics: Vec<String>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn recv(&mut self) -> Result<Delivery, BrokerError> {
        loop {
            // Register for wake-up before looking, so a publish between the
            // check and the await is not lost.
            let published = self.inner.published.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            {
                let state = self.inner.state.lock().await;
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                if let Some(delivery) = state.next_for(&self.group, &self.topics) {
                    return Ok(delivery);
                }
            }

            published.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let topic = &delivery.message.topic;
        if !self.topics.iter().any(|t| t == topic) {
            return Err(BrokerError::UnknownTopic(topic.clone()));
        }
        let mut state = self.inner.state.lock().await;
        let slot = state
            .committed
            .entry((self.group.clone(), topic.clone()))
            .or_insert(0);
        *slot = (*slot).max(delivery.offset + 1);
        state.compact(topic);
        Ok(())
    }
}
