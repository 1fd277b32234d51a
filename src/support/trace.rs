//! Trace-context propagation
//!
//! The trace context is opaque bytes carried end-to-end in message headers.
//! Stages never interpret it beyond rendering an id for their log spans.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext(Vec<u8>);

impl TraceContext {
    /// Start a new trace at the edge of the system.
    pub fn root() -> Self {
        Self(Uuid::new_v4().simple().to_string().into_bytes())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Printable id for log spans.
    pub fn trace_id(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

/// Open the span a pipeline stage handles one message in.
pub fn stage_span(stage: &'static str, correlation_id: &str, trace: &TraceContext) -> tracing::Span {
    tracing::info_span!(
        "stage",
        stage,
        correlation_id = %correlation_id,
        trace_id = %trace.trace_id()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_are_unique_and_printable() {
        let a = TraceContext::root();
        let b = TraceContext::root();
        assert_ne!(a, b);
        assert_eq!(a.trace_id().len(), 32);
        assert!(!a.is_empty());
    }

    #[test]
    fn bytes_are_carried_verbatim() {
        let ctx = TraceContext::from_bytes(vec![0xff, b'a']);
        assert_eq!(ctx.as_bytes(), &[0xff, b'a']);
    }
}
