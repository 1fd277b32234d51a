//! Validator stage
//!
//! Checks field rules on every request before it reaches the data stage.
//! Valid payloads are forwarded to `data` byte-for-byte; rejected ones
//! become a failure description on `error`. Headers travel unchanged.
//! Undecodable messages are left uncommitted for redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::consumer::StageHandler;
use super::data::decode_request;
use super::error::PipelineError;
use super::topics::{DATA, ERROR, GROUP_VALIDATE, VALIDATE};
use crate::application::ports::{Message, MessageBroker};
use crate::domain::DomainError;

pub struct ValidatorStage {
    broker: Arc<dyn MessageBroker>,
}

impl ValidatorStage {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }

    /// Why `message` must not reach the data stage, if anything.
    fn check(message: &Message) -> Result<Result<(), String>, PipelineError> {
        let request = decode_request(message)?;
        Ok(request
            .validate()
            .map_err(|e| DomainError::from(e).to_string()))
    }
}

#[async_trait]
impl StageHandler for ValidatorStage {
    fn name(&self) -> &'static str {
        "validator"
    }

    fn group(&self) -> &'static str {
        GROUP_VALIDATE
    }

    fn topics(&self) -> &'static [&'static str] {
        &[VALIDATE]
    }

    async fn handle(&self, message: &Message) -> Result<(), PipelineError> {
        let verdict = Self::check(message).inspect_err(|e| {
            warn!(operation = %message.key, error = %e, "Undecodable request left uncommitted");
        })?;
        let forward = match verdict {
            Ok(()) => {
                debug!(operation = %message.key, "Request valid");
                Message::new(DATA, message.key.clone(), message.payload.clone())
            }
            Err(reason) => {
                info!(operation = %message.key, reason = %reason, "Request rejected");
                Message::new(ERROR, message.key.clone(), reason.into_bytes())
            }
        };
        self.broker
            .publish(forward.with_headers(message.headers.clone()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryMode, Envelope};
    use crate::infrastructure::InMemoryBroker;

    fn incoming(key: &str, payload: &str) -> Message {
        Message::new(VALIDATE, key, payload.as_bytes().to_vec())
            .with_headers(Envelope::new(DeliveryMode::PollLater).to_headers())
    }

    async fn run(message: Message) -> (Vec<Message>, Vec<Message>) {
        let broker = InMemoryBroker::new();
        let stage = ValidatorStage::new(Arc::new(broker.clone()));
        stage.handle(&message).await.unwrap();
        (broker.messages(DATA).await, broker.messages(ERROR).await)
    }

    #[tokio::test]
    async fn valid_create_is_forwarded_unchanged() {
        let body = r#"{"name":"Ivan","password":"123","email":"ivan@x.com","full_name":"Ivan I"}"#;
        let message = incoming("create", body);
        let (data, errors) = run(message.clone()).await;

        assert!(errors.is_empty());
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].payload, message.payload);
        assert_eq!(data[0].headers, message.headers);
        assert_eq!(data[0].key, "create");
    }

    #[tokio::test]
    async fn bad_email_goes_to_error_with_headers() {
        let body = r#"{"name":"Ivan","password":"123","email":"nope","full_name":"Ivan I"}"#;
        let message = incoming("create", body);
        let (data, errors) = run(message.clone()).await;

        assert!(data.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].headers, message.headers);
        let reason = String::from_utf8(errors[0].payload.clone()).unwrap();
        assert!(reason.contains("email"), "{reason}");
    }

    #[tokio::test]
    async fn update_needs_only_name() {
        let (data, _) = run(incoming("update", r#"{"name":"Ivan"}"#)).await;
        assert_eq!(data.len(), 1);

        let (_, errors) = run(incoming("update", r#"{"name":"Ivan","full_name":""}"#)).await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_name_and_zero_limit_are_rejected() {
        let (_, errors) = run(incoming("get", r#"{"name":""}"#)).await;
        assert_eq!(errors.len(), 1);
        let (_, errors) = run(incoming("delete", r#"{"name":""}"#)).await;
        assert_eq!(errors.len(), 1);
        let (_, errors) = run(incoming("list", r#"{"limit":0}"#)).await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn oversized_limit_is_rejected() {
        let (data, errors) = run(incoming("list", r#"{"limit":18446744073709551615}"#)).await;
        assert!(data.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn unknown_key_and_garbage_are_left_for_redelivery() {
        let broker = InMemoryBroker::new();
        let stage = ValidatorStage::new(Arc::new(broker.clone()));

        let err = stage.handle(&incoming("upsert", "{}")).await.unwrap_err();
        assert_eq!(err.to_string(), "unknown operation: upsert");

        let err = stage.handle(&incoming("get", "not json")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }), "{err:?}");

        assert!(broker.messages(DATA).await.is_empty());
        assert!(broker.messages(ERROR).await.is_empty());
    }
}
