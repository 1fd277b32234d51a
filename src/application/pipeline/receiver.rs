//! Receiver: the synchronous entry point of the pipeline
//!
//! Each call gets a fresh correlation envelope, publishes the request to
//! `validate` and returns the correlation id without waiting for the
//! outcome.
//!
//! The `user_*` calls return only after publishing, so in wait-for-push mode
//! the reply may already be gone by the time the caller subscribes. Callers
//! that want the push use [`Receiver::submit_subscribed`] or
//! [`Receiver::submit_and_wait`], which subscribe first.

use std::sync::Arc;
use std::time::Duration;

use futures_util::Stream;
use tracing::{debug, info};

use super::error::ReceiverError;
use super::topics::VALIDATE;
use crate::application::dto::{Outcome, UserRequest};
use crate::application::ports::metrics::REQUESTS_TOTAL;
use crate::application::ports::{
    Cache, CacheError, ChannelSubscription, Message, MessageBroker, SharedMetrics,
};
use crate::application::services::cache_keys::result_key;
use crate::application::services::UserService;
use crate::domain::{
    CorrelationId, CreateUserDto, DeliveryMode, DomainResult, Envelope, ListUsersDto,
    UpdateUserDto, User, UserNameDto,
};

#[derive(Debug, Clone, Copy)]
pub struct ReceiverSettings {
    /// Deadline for synchronous cache and store calls.
    pub operation_timeout: Duration,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Receiver {
    broker: Arc<dyn MessageBroker>,
    cache: Arc<dyn Cache>,
    service: Arc<UserService>,
    metrics: SharedMetrics,
    settings: ReceiverSettings,
}

impl Receiver {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        cache: Arc<dyn Cache>,
        service: Arc<UserService>,
        metrics: SharedMetrics,
        settings: ReceiverSettings,
    ) -> Self {
        Self {
            broker,
            cache,
            service,
            metrics,
            settings,
        }
    }

    pub async fn user_create(
        &self,
        dto: CreateUserDto,
        mode: DeliveryMode,
    ) -> Result<CorrelationId, ReceiverError> {
        self.submit(UserRequest::Create(dto), mode).await
    }

    pub async fn user_update(
        &self,
        dto: UpdateUserDto,
        mode: DeliveryMode,
    ) -> Result<CorrelationId, ReceiverError> {
        self.submit(UserRequest::Update(dto), mode).await
    }

    pub async fn user_delete(
        &self,
        dto: UserNameDto,
        mode: DeliveryMode,
    ) -> Result<CorrelationId, ReceiverError> {
        self.submit(UserRequest::Delete(dto), mode).await
    }

    pub async fn user_get(
        &self,
        dto: UserNameDto,
        mode: DeliveryMode,
    ) -> Result<CorrelationId, ReceiverError> {
        self.submit(UserRequest::Get(dto), mode).await
    }

    pub async fn user_list(
        &self,
        dto: ListUsersDto,
        mode: DeliveryMode,
    ) -> Result<CorrelationId, ReceiverError> {
        self.submit(UserRequest::List(dto), mode).await
    }

    /// Stream every user, `page_size` at a time, straight from the business
    /// core. Does not go through the pipeline.
    pub fn user_all_list(
        &self,
        order: bool,
        page_size: u64,
    ) -> impl Stream<Item = DomainResult<Vec<User>>> + Send + '_ {
        self.service
            .list_all(order, page_size, self.settings.operation_timeout)
    }

    /// Publish `request` and return its correlation id.
    pub async fn submit(
        &self,
        request: UserRequest,
        mode: DeliveryMode,
    ) -> Result<CorrelationId, ReceiverError> {
        let envelope = Envelope::new(mode);
        self.publish(&request, &envelope).await?;
        Ok(envelope.correlation_id)
    }

    /// Publish `request` in wait-for-push mode, returning its id together
    /// with a subscription to the reply channel.
    ///
    /// The channel is subscribed before publishing, so the reply cannot be
    /// missed. Pass both to [`Receiver::wait`].
    pub async fn submit_subscribed(
        &self,
        request: UserRequest,
    ) -> Result<(CorrelationId, ChannelSubscription), ReceiverError> {
        let envelope = Envelope::new(DeliveryMode::WaitForPush);
        let subscription = self.cache.subscribe(envelope.correlation_id.as_str()).await?;
        self.publish(&request, &envelope).await?;
        Ok((envelope.correlation_id, subscription))
    }

    /// Block until the pushed outcome for `id` arrives or `timeout` passes.
    pub async fn wait(
        &self,
        id: CorrelationId,
        mut subscription: ChannelSubscription,
        timeout: Duration,
    ) -> Result<Outcome, ReceiverError> {
        let bytes = match subscription.recv(timeout).await {
            Ok(bytes) => bytes,
            Err(CacheError::Timeout(_)) => return Err(ReceiverError::Timeout(id)),
            Err(e) => return Err(e.into()),
        };
        Outcome::decode(&bytes).map_err(ReceiverError::Decode)
    }

    /// Publish `request` in wait-for-push mode and block until its outcome
    /// arrives or `timeout` passes.
    pub async fn submit_and_wait(
        &self,
        request: UserRequest,
        timeout: Duration,
    ) -> Result<Outcome, ReceiverError> {
        let (id, subscription) = self.submit_subscribed(request).await?;
        self.wait(id, subscription, timeout).await
    }

    /// Fetch a poll-later result. Repeatable until the entry expires.
    pub async fn data(&self, id: &CorrelationId) -> Result<Outcome, ReceiverError> {
        let key = result_key(id);
        let cached = tokio::time::timeout(self.settings.operation_timeout, self.cache.get(&key))
            .await
            .map_err(|_| ReceiverError::Timeout(id.clone()))??;

        match cached {
            Some(bytes) => Outcome::decode(&bytes).map_err(ReceiverError::Decode),
            None => {
                debug!(correlation_id = %id, "Result not ready");
                Err(ReceiverError::NotReady(id.clone()))
            }
        }
    }

    async fn publish(&self, request: &UserRequest, envelope: &Envelope) -> Result<(), ReceiverError> {
        let operation = request.operation();
        let payload = request.encode().map_err(ReceiverError::Encode)?;
        let message = Message::new(VALIDATE, operation.as_str(), payload)
            .with_headers(envelope.to_headers());

        self.metrics.increment(REQUESTS_TOTAL, operation.as_str());
        self.broker.publish(message).await?;
        info!(
            correlation_id = %envelope.correlation_id,
            operation = %operation,
            mode = %envelope.delivery_mode,
            "Request accepted"
        );
        Ok(())
    }
}
