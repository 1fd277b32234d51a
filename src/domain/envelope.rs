//! Correlation envelope
//!
//! In-flight request state that travels with every pipeline message as
//! headers. Created by the receiver, consumed by the mailing stage.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::support::TraceContext;

pub const HEADER_CORRELATION_ID: &str = "correlation_id";
pub const HEADER_DELIVERY_MODE: &str = "delivery_mode";
pub const HEADER_TRACE_CONTEXT: &str = "trace_context";

/// Opaque token identifying one logical request across the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the caller expects to receive its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Caller blocks on the pub/sub channel named by the correlation id.
    WaitForPush,
    /// Caller fetches the cached result by correlation id later.
    PollLater,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitForPush => "wait_for_push",
            Self::PollLater => "poll_later",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wait_for_push" => Ok(Self::WaitForPush),
            "poll_later" => Ok(Self::PollLater),
            other => Err(EnvelopeError::InvalidDeliveryMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    #[error("header {0} is not valid UTF-8")]
    InvalidEncoding(&'static str),

    #[error("invalid delivery mode: {0}")]
    InvalidDeliveryMode(String),
}

/// Message headers: ordered string keys to opaque byte values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, Vec<u8>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    fn get_str(&self, key: &'static str) -> Result<&str, EnvelopeError> {
        let raw = self.get(key).ok_or(EnvelopeError::MissingHeader(key))?;
        std::str::from_utf8(raw).map_err(|_| EnvelopeError::InvalidEncoding(key))
    }
}

/// Correlation envelope carried by every pipeline message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub correlation_id: CorrelationId,
    pub delivery_mode: DeliveryMode,
    pub trace_context: TraceContext,
}

impl Envelope {
    /// Fresh envelope for a newly received request.
    pub fn new(delivery_mode: DeliveryMode) -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            delivery_mode,
            trace_context: TraceContext::root(),
        }
    }

    pub fn inject(&self, headers: &mut Headers) {
        headers.insert(HEADER_CORRELATION_ID, self.correlation_id.as_str());
        headers.insert(HEADER_DELIVERY_MODE, self.delivery_mode.as_str());
        headers.insert(HEADER_TRACE_CONTEXT, self.trace_context.as_bytes());
    }

    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::new();
        self.inject(&mut headers);
        headers
    }

    /// Rebuild the envelope from message headers.
    ///
    /// A missing trace context is tolerated (an empty one is used); the
    /// correlation id and delivery mode are required.
    pub fn extract(headers: &Headers) -> Result<Self, EnvelopeError> {
        let correlation_id = CorrelationId::from(headers.get_str(HEADER_CORRELATION_ID)?);
        let delivery_mode = headers.get_str(HEADER_DELIVERY_MODE)?.parse()?;
        let trace_context = headers
            .get(HEADER_TRACE_CONTEXT)
            .map(TraceContext::from_bytes)
            .unwrap_or_else(|| TraceContext::from_bytes(Vec::new()));

        Ok(Self {
            correlation_id,
            delivery_mode,
            trace_context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_reads_back_injected_envelope() {
        let envelope = Envelope::new(DeliveryMode::PollLater);
        let mut headers = Headers::new();
        headers.insert("unrelated", "x");
        envelope.inject(&mut headers);

        assert_eq!(Envelope::extract(&headers), Ok(envelope));
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn extract_requires_correlation_id() {
        let mut headers = Headers::new();
        headers.insert(HEADER_DELIVERY_MODE, "poll_later");
        assert_eq!(
            Envelope::extract(&headers),
            Err(EnvelopeError::MissingHeader(HEADER_CORRELATION_ID))
        );
    }

    #[test]
    fn extract_rejects_unknown_delivery_mode() {
        let mut headers = Headers::new();
        headers.insert(HEADER_CORRELATION_ID, "abc");
        headers.insert(HEADER_DELIVERY_MODE, "carrier_pigeon");
        assert!(matches!(
            Envelope::extract(&headers),
            Err(EnvelopeError::InvalidDeliveryMode(_))
        ));
    }

    #[test]
    fn missing_trace_context_is_tolerated() {
        let mut headers = Headers::new();
        headers.insert(HEADER_CORRELATION_ID, "abc");
        headers.insert(HEADER_DELIVERY_MODE, "wait_for_push");
        let envelope = Envelope::extract(&headers).unwrap();
        assert!(envelope.trace_context.is_empty());
        assert_eq!(envelope.delivery_mode, DeliveryMode::WaitForPush);
    }
}
