//! Mailing stage
//!
//! Turns data-stage results and failures into an [`Outcome`] and hands it to
//! the requesting caller. A wait-for-push caller is reached on the pub/sub
//! channel named by its correlation id; a poll-later caller finds the result
//! cached under `result:{id}`. Whichever primitive comes first, the other one
//! is the fallback. Only when both fail is the message left uncommitted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use super::consumer::StageHandler;
use super::error::PipelineError;
use super::topics::{ERROR, GROUP_MAILING, MAILING};
use crate::application::dto::Outcome;
use crate::application::ports::metrics::{ERRORS_TOTAL, RESPONSES_TOTAL, SUCCESS_TOTAL};
use crate::application::ports::{Cache, CacheError, Message, SharedMetrics};
use crate::application::services::cache_keys::result_key;
use crate::domain::{CorrelationId, DeliveryMode, Envelope};

/// Randomly fails the primary delivery primitive so the fallback path runs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultInjection {
    delivery_failure_rate: f64,
}

impl FaultInjection {
    /// `rate` is clamped to `[0, 1]`.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self {
            delivery_failure_rate: rate,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn rate(&self) -> f64 {
        self.delivery_failure_rate
    }

    fn should_fail(&self) -> bool {
        self.delivery_failure_rate > 0.0
            && rand::thread_rng().gen_bool(self.delivery_failure_rate)
    }
}

pub struct MailingStage {
    cache: Arc<dyn Cache>,
    metrics: SharedMetrics,
    result_ttl: Duration,
    faults: FaultInjection,
}

impl MailingStage {
    pub fn new(
        cache: Arc<dyn Cache>,
        metrics: SharedMetrics,
        result_ttl: Duration,
        faults: FaultInjection,
    ) -> Self {
        Self {
            cache,
            metrics,
            result_ttl,
            faults,
        }
    }

    async fn push(&self, id: &CorrelationId, payload: Vec<u8>, primary: bool) -> Result<(), CacheError> {
        if primary && self.faults.should_fail() {
            return Err(CacheError::Unavailable("injected push failure".into()));
        }
        match self.cache.publish(id.as_str(), payload).await? {
            0 => Err(CacheError::Unavailable(format!("no subscriber on {}", id))),
            receivers => {
                debug!(receivers, "Result pushed");
                Ok(())
            }
        }
    }

    async fn store(&self, id: &CorrelationId, payload: Vec<u8>, primary: bool) -> Result<(), CacheError> {
        if primary && self.faults.should_fail() {
            return Err(CacheError::Unavailable("injected cache failure".into()));
        }
        self.cache
            .set(&result_key(id), payload, self.result_ttl)
            .await?;
        debug!("Result cached");
        Ok(())
    }

    async fn deliver(&self, envelope: &Envelope, payload: Vec<u8>) -> Result<(), PipelineError> {
        let id = &envelope.correlation_id;
        let delivered = match envelope.delivery_mode {
            DeliveryMode::WaitForPush => match self.push(id, payload.clone(), true).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "Push failed, caching result instead");
                    self.store(id, payload, false).await
                }
            },
            DeliveryMode::PollLater => match self.store(id, payload.clone(), true).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "Caching failed, pushing result instead");
                    self.push(id, payload, false).await
                }
            },
        };

        delivered.map_err(|e| {
            warn!(error = %e, "Fallback delivery failed too");
            PipelineError::Undeliverable(id.clone())
        })
    }
}

#[async_trait]
impl StageHandler for MailingStage {
    fn name(&self) -> &'static str {
        "mailing"
    }

    fn group(&self) -> &'static str {
        GROUP_MAILING
    }

    fn topics(&self) -> &'static [&'static str] {
        &[MAILING, ERROR]
    }

    async fn handle(&self, message: &Message) -> Result<(), PipelineError> {
        let envelope = Envelope::extract(&message.headers)?;
        let outcome = if message.topic == ERROR {
            Outcome::failure(message.key.as_str(), &message.payload)
        } else {
            Outcome::success(message.key.as_str(), &message.payload)
        };

        self.deliver(&envelope, outcome.encode()?).await?;

        self.metrics.increment(RESPONSES_TOTAL, &message.key);
        if outcome.is_success() {
            self.metrics.increment(SUCCESS_TOTAL, &message.key);
        } else {
            self.metrics.increment(ERRORS_TOTAL, &message.key);
        }
        info!(
            operation = %message.key,
            mode = %envelope.delivery_mode,
            success = outcome.is_success(),
            "Result delivered"
        );
        Ok(())
    }
}
