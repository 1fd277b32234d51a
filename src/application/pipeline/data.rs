//! Data stage
//!
//! Executes validated requests against the business core and routes the
//! result: a body on `mailing`, a terminal error on `error`, anything else
//! back to the consumer loop for another attempt. A message whose key or
//! payload cannot be decoded is never answered; it stays uncommitted until
//! the consumer gives up on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use super::consumer::StageHandler;
use super::error::PipelineError;
use super::topics::{DATA, ERROR, GROUP_DATA, MAILING};
use crate::application::dto::{Operation, UserRequest};
use crate::application::ports::{Message, MessageBroker};
use crate::application::services::UserService;
use crate::domain::{DomainError, DomainResult};
use crate::support::Deadline;

pub struct DataStage {
    broker: Arc<dyn MessageBroker>,
    service: Arc<UserService>,
    operation_timeout: Duration,
}

/// Parse the operation key and payload of a pipeline message.
pub(super) fn decode_request(message: &Message) -> Result<UserRequest, PipelineError> {
    let operation = message.key.parse::<Operation>()?;
    UserRequest::decode(operation, &message.payload).map_err(|source| PipelineError::Decode {
        operation: operation.to_string(),
        source,
    })
}

fn to_body<T: Serialize>(value: &T) -> DomainResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| DomainError::Unexpected(e.to_string()))
}

impl DataStage {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        service: Arc<UserService>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            service,
            operation_timeout,
        }
    }

    /// Run the request. Success yields the mailing payload.
    async fn execute(&self, request: UserRequest) -> DomainResult<Vec<u8>> {
        let deadline = Deadline::after(self.operation_timeout);
        match request {
            UserRequest::Create(dto) => self.service.create(dto, deadline).await.map(|_| Vec::new()),
            UserRequest::Update(dto) => self.service.update(dto, deadline).await.map(|_| Vec::new()),
            UserRequest::Delete(dto) => self.service.delete(dto, deadline).await.map(|_| Vec::new()),
            UserRequest::Get(dto) => to_body(&self.service.get(dto, deadline).await?),
            UserRequest::List(dto) => to_body(&self.service.list(dto, deadline).await?),
        }
    }

    async fn reply(&self, topic: &str, message: &Message, payload: Vec<u8>) -> Result<(), PipelineError> {
        let reply = Message::new(topic, message.key.clone(), payload)
            .with_headers(message.headers.clone());
        self.broker.publish(reply).await?;
        Ok(())
    }
}

#[async_trait]
impl StageHandler for DataStage {
    fn name(&self) -> &'static str {
        "data"
    }

    fn group(&self) -> &'static str {
        GROUP_DATA
    }

    fn topics(&self) -> &'static [&'static str] {
        &[DATA]
    }

    async fn handle(&self, message: &Message) -> Result<(), PipelineError> {
        let request = decode_request(message).inspect_err(|e| {
            warn!(operation = %message.key, error = %e, "Undecodable request left uncommitted");
        })?;

        match self.execute(request).await {
            Ok(body) => {
                info!(operation = %message.key, "Request processed");
                self.reply(MAILING, message, body).await
            }
            Err(e) if e.is_terminal() => {
                info!(operation = %message.key, error = %e, "Request failed");
                self.reply(ERROR, message, e.to_string().into_bytes()).await
            }
            Err(e) => {
                warn!(operation = %message.key, error = %e, kind = e.kind(), "Request will be retried");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryMode, Envelope, User};
    use crate::infrastructure::{BoundedMemoryStore, InMemoryBroker, InMemoryCache, InMemoryMetrics};

    struct Fixture {
        broker: InMemoryBroker,
        stage: DataStage,
    }

    fn fixture() -> Fixture {
        let broker = InMemoryBroker::new();
        let service = Arc::new(UserService::new(
            Arc::new(BoundedMemoryStore::new(2)),
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryMetrics::new()),
            Duration::from_secs(60),
        ));
        let stage = DataStage::new(Arc::new(broker.clone()), service, Duration::from_secs(1));
        Fixture { broker, stage }
    }

    fn incoming(key: &str, payload: &str) -> Message {
        Message::new(DATA, key, payload.as_bytes().to_vec())
            .with_headers(Envelope::new(DeliveryMode::WaitForPush).to_headers())
    }

    const IVAN: &str = r#"{"name":"Ivan","password":"123","email":"ivan@x.com","full_name":"Ivan I"}"#;

    #[tokio::test]
    async fn write_publishes_empty_mailing_payload() {
        let f = fixture();
        let message = incoming("create", IVAN);
        f.stage.handle(&message).await.unwrap();

        let mailing = f.broker.messages(MAILING).await;
        assert_eq!(mailing.len(), 1);
        assert!(mailing[0].payload.is_empty());
        assert_eq!(mailing[0].headers, message.headers);
    }

    #[tokio::test]
    async fn get_publishes_user_json() {
        let f = fixture();
        f.stage.handle(&incoming("create", IVAN)).await.unwrap();
        f.stage.handle(&incoming("get", r#"{"name":"Ivan"}"#)).await.unwrap();

        let mailing = f.broker.messages(MAILING).await;
        let user: User = serde_json::from_slice(&mailing[1].payload).unwrap();
        assert_eq!(user.email, "ivan@x.com");
    }

    #[tokio::test]
    async fn list_publishes_user_array() {
        let f = fixture();
        f.stage.handle(&incoming("create", IVAN)).await.unwrap();
        f.stage.handle(&incoming("list", r#"{"limit":10}"#)).await.unwrap();

        let mailing = f.broker.messages(MAILING).await;
        let users: Vec<User> = serde_json::from_slice(&mailing[1].payload).unwrap();
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn terminal_errors_go_to_error_topic() {
        let f = fixture();
        f.stage.handle(&incoming("create", IVAN)).await.unwrap();
        f.stage.handle(&incoming("create", IVAN)).await.unwrap();
        f.stage.handle(&incoming("get", r#"{"name":"Nobody"}"#)).await.unwrap();

        let errors = f.broker.messages(ERROR).await;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].key, "create");
        let reason = String::from_utf8(errors[1].payload.clone()).unwrap();
        assert_eq!(reason, "Not found: User with name=Nobody");
    }

    #[tokio::test]
    async fn undecodable_requests_are_not_answered() {
        let f = fixture();

        let err = f.stage.handle(&incoming("upsert", "{}")).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownOperation(_)), "{err:?}");

        let err = f.stage.handle(&incoming("get", "not json")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode { ref operation, .. } if operation == "get"), "{err:?}");

        assert!(f.broker.messages(MAILING).await.is_empty());
        assert!(f.broker.messages(ERROR).await.is_empty());
    }

    #[tokio::test]
    async fn undecodable_request_stays_uncommitted_until_dropped() {
        use crate::application::pipeline::consumer::{spawn_stage, ConsumerSettings};
        use crate::support::ShutdownSignal;

        let f = fixture();
        let shutdown = ShutdownSignal::new();
        let settings = ConsumerSettings {
            backoff: Duration::from_millis(50),
            max_delivery_attempts: 3,
        };
        let broker: Arc<dyn MessageBroker> = Arc::new(f.broker.clone());
        let task = spawn_stage(Arc::new(f.stage), broker.clone(), settings, shutdown.clone());

        broker.publish(incoming("get", "not json")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(f.broker.lag(GROUP_DATA, DATA).await, 1);

        let waited = tokio::time::Instant::now();
        while f.broker.lag(GROUP_DATA, DATA).await > 0 {
            assert!(waited.elapsed() < Duration::from_secs(5), "message never dropped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.broker.messages(ERROR).await.is_empty());

        shutdown.trigger();
        task.await.unwrap();
    }
}
