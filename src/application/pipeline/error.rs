use thiserror::Error;

use crate::application::dto::UnknownOperation;
use crate::application::ports::{BrokerError, CacheError};
use crate::domain::{CorrelationId, DomainError, EnvelopeError};

/// Failure while handling one pipeline message.
///
/// Returned from a stage handler, it leaves the message uncommitted so the
/// broker delivers it again.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot decode {operation} payload: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    UnknownOperation(#[from] UnknownOperation),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("result for {0} could not be delivered")]
    Undeliverable(CorrelationId),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Failure of a synchronous receiver call.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("result for {0} is not ready")]
    NotReady(CorrelationId),

    #[error("timed out waiting for result of {0}")]
    Timeout(CorrelationId),

    #[error("cannot encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("cannot decode result: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("cache: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}
