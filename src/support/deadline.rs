//! Operation deadlines
//!
//! Every synchronous-path call (business core, store, cache) carries a
//! [`Deadline`]. Exceeding it yields [`DomainError::Timeout`], never a hang.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::errors::{DomainError, DomainResult};

/// Roughly 30 years; what an unrepresentable instant is clamped to.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, clamped instead of overflowing for huge timeouts.
pub fn instant_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Absolute point in time after which an operation is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: instant_after(timeout),
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Drive `fut` to completion unless the deadline passes first.
    ///
    /// `operation` names what timed out in the resulting error.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout(operation.to_string())),
        }
    }
}
