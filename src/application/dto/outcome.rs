//! Terminal result delivered back to the caller

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the mailing stage pushes or caches for a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        operation: String,
        #[serde(default)]
        body: Value,
    },
    Failure {
        operation: String,
        reason: String,
    },
}

impl Outcome {
    /// Wrap a data-stage payload. Empty means the write had no body;
    /// anything that is not JSON is kept as text.
    pub fn success(operation: impl Into<String>, payload: &[u8]) -> Self {
        let body = if payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(payload)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
        };
        Self::Success {
            operation: operation.into(),
            body,
        }
    }

    pub fn failure(operation: impl Into<String>, payload: &[u8]) -> Self {
        Self::Failure {
            operation: operation.into(),
            reason: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn operation(&self) -> &str {
        match self {
            Self::Success { operation, .. } | Self::Failure { operation, .. } => operation,
        }
    }

    /// Decode the success body, or hand back the failure reason.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, String> {
        match self {
            Self::Success { body, .. } => {
                T::deserialize(body).map_err(|e| format!("unexpected body: {}", e))
            }
            Self::Failure { reason, .. } => Err(reason.clone()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
