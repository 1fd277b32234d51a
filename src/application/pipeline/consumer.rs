//! Consumer loop shared by the validator, data and mailing stages

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use super::error::PipelineError;
use crate::application::ports::{Delivery, Message, MessageBroker};
use crate::domain::{Envelope, HEADER_CORRELATION_ID};
use crate::support::{trace::stage_span, ShutdownSignal, TraceContext};

/// One pipeline stage: the topics it reads and what it does per message.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn group(&self) -> &'static str;

    fn topics(&self) -> &'static [&'static str];

    /// `Ok` commits the message; `Err` leaves it for redelivery.
    async fn handle(&self, message: &Message) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Pause after a failed handler or broker error.
    pub backoff: Duration,
    /// Failed attempts after which a message is committed and dropped.
    pub max_delivery_attempts: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            max_delivery_attempts: 5,
        }
    }
}

/// Failed attempts on the message currently at the head of the group.
#[derive(Debug, Default)]
struct Attempts {
    key: Option<(String, u64)>,
    count: u32,
}

impl Attempts {
    fn record_failure(&mut self, delivery: &Delivery) -> u32 {
        let key = (delivery.message.topic.clone(), delivery.offset);
        if self.key.as_ref() != Some(&key) {
            self.key = Some(key);
            self.count = 0;
        }
        self.count += 1;
        self.count
    }

    fn reset(&mut self) {
        self.key = None;
        self.count = 0;
    }
}

/// Spawn the consumer task for `handler`.
pub fn spawn_stage(
    handler: Arc<dyn StageHandler>,
    broker: Arc<dyn MessageBroker>,
    settings: ConsumerSettings,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stage = handler.name();
        info!(stage, group = handler.group(), topics = ?handler.topics(), "▶️ Stage started");
        run(handler, broker, settings, shutdown.clone()).await;
        if shutdown.is_triggered() {
            info!(stage, "⏹️ Stage stopped");
        } else {
            error!(stage, "Stage stopped before shutdown");
        }
    })
}

async fn run(
    handler: Arc<dyn StageHandler>,
    broker: Arc<dyn MessageBroker>,
    settings: ConsumerSettings,
    shutdown: ShutdownSignal,
) {
    let stage = handler.name();
    let mut attempts = Attempts::default();

    'subscribe: loop {
        let subscribed = tokio::select! {
            result = broker.subscribe(handler.group(), handler.topics()) => result,
            _ = shutdown.notified().wait() => return,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(stage, error = %e, "Subscribe failed, retrying");
                if pause(settings.backoff, &shutdown).await {
                    return;
                }
                continue 'subscribe;
            }
        };

        loop {
            let received = tokio::select! {
                result = subscription.recv() => result,
                _ = shutdown.notified().wait() => return,
            };
            let delivery = match received {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(stage, error = %e, "Broker receive failed, re-subscribing");
                    if pause(settings.backoff, &shutdown).await {
                        return;
                    }
                    continue 'subscribe;
                }
            };

            let span = message_span(stage, &delivery.message);
            let outcome = AssertUnwindSafe(handler.handle(&delivery.message))
                .catch_unwind()
                .instrument(span.clone())
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(panic))));

            let commit = match outcome {
                Ok(()) => true,
                Err(e) => {
                    let failures = attempts.record_failure(&delivery);
                    if failures >= settings.max_delivery_attempts {
                        span.in_scope(|| {
                            error!(
                                stage,
                                error = %e,
                                attempts = failures,
                                topic = %delivery.message.topic,
                                offset = delivery.offset,
                                "Giving up on message, dropping it"
                            )
                        });
                        true
                    } else {
                        span.in_scope(|| {
                            warn!(stage, error = %e, attempt = failures, "Handler failed, will retry")
                        });
                        false
                    }
                }
            };

            if !commit {
                if pause(settings.backoff, &shutdown).await {
                    return;
                }
                continue;
            }

            if let Err(e) = subscription.commit(&delivery).await {
                warn!(stage, error = %e, "Commit failed, re-subscribing");
                if pause(settings.backoff, &shutdown).await {
                    return;
                }
                continue 'subscribe;
            }
            attempts.reset();
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Sleep for `backoff`. Returns `true` if shutdown arrived first.
async fn pause(backoff: Duration, shutdown: &ShutdownSignal) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => false,
        _ = shutdown.notified().wait() => true,
    }
}

fn message_span(stage: &'static str, message: &Message) -> tracing::Span {
    match Envelope::extract(&message.headers) {
        Ok(envelope) => stage_span(
            stage,
            envelope.correlation_id.as_str(),
            &envelope.trace_context,
        ),
        Err(_) => {
            let correlation_id = message
                .headers
                .get(HEADER_CORRELATION_ID)
                .map(|raw| String::from_utf8_lossy(raw).into_owned())
                .unwrap_or_else(|| "unknown".to_string());
            stage_span(stage, &correlation_id, &TraceContext::from_bytes(Vec::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::domain::DomainError;
    use crate::infrastructure::InMemoryBroker;

    /// Fails the first `failures` attempts, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StageHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn group(&self) -> &'static str {
            "group_flaky"
        }
        fn topics(&self) -> &'static [&'static str] {
            &["work"]
        }
        async fn handle(&self, _: &Message) -> Result<(), PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(DomainError::Unavailable("flaky".into()).into())
            } else {
                Ok(())
            }
        }
    }

    fn fast(max_delivery_attempts: u32) -> ConsumerSettings {
        ConsumerSettings {
            backoff: Duration::from_millis(5),
            max_delivery_attempts,
        }
    }

    async fn wait_for_lag_zero(broker: &InMemoryBroker) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.lag("group_flaky", "work").await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message was never committed");
    }

    #[tokio::test]
    async fn failed_message_is_retried_until_handled() {
        let broker = InMemoryBroker::new();
        broker.publish(Message::new("work", "k", b"x".to_vec())).await.unwrap();
        let handler = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let shutdown = ShutdownSignal::new();
        let task = spawn_stage(handler.clone(), Arc::new(broker.clone()), fast(10), shutdown.clone());

        wait_for_lag_zero(&broker).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn message_is_dropped_after_max_attempts() {
        let broker = InMemoryBroker::new();
        broker.publish(Message::new("work", "k", b"x".to_vec())).await.unwrap();
        let handler = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let shutdown = ShutdownSignal::new();
        let task = spawn_stage(handler.clone(), Arc::new(broker.clone()), fast(3), shutdown.clone());

        wait_for_lag_zero(&broker).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        task.await.unwrap();
    }

    /// Panics on its first call, succeeds afterwards.
    struct PanicsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl StageHandler for PanicsOnce {
        fn name(&self) -> &'static str {
            "panics_once"
        }
        fn group(&self) -> &'static str {
            "group_flaky"
        }
        fn topics(&self) -> &'static [&'static str] {
            &["work"]
        }
        async fn handle(&self, _: &Message) -> Result<(), PipelineError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("poison message");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_panic_counts_as_failed_attempt() {
        let broker = InMemoryBroker::new();
        broker.publish(Message::new("work", "k", b"x".to_vec())).await.unwrap();
        broker.publish(Message::new("work", "k", b"y".to_vec())).await.unwrap();
        let handler = Arc::new(PanicsOnce {
            calls: AtomicU32::new(0),
        });
        let shutdown = ShutdownSignal::new();
        let task = spawn_stage(handler.clone(), Arc::new(broker.clone()), fast(3), shutdown.clone());

        wait_for_lag_zero(&broker).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(!task.is_finished());

        shutdown.trigger();
        task.await.unwrap();
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }

    #[tokio::test]
    async fn idle_stage_stops_on_shutdown() {
        let broker = InMemoryBroker::new();
        let handler = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let shutdown = ShutdownSignal::new();
        let task = spawn_stage(handler, Arc::new(broker), fast(3), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stage did not stop")
            .unwrap();
    }
}
