use async_trait::async_trait;

use super::{ListParams, User};
use crate::support::{Deadline, DomainResult};

/// Persistence of `User` rows, keyed by `name`.
///
/// Implementations must honour the deadline on every call and report
/// `DomainError::Timeout` instead of blocking past it.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new row. `AlreadyExists` if the name is taken.
    async fn create(&self, user: User, deadline: Deadline) -> DomainResult<()>;

    /// Overwrite password, email and full name of an existing row.
    /// The stored `created_at` is kept. `NotFound` if absent.
    async fn update(&self, user: User, deadline: Deadline) -> DomainResult<()>;

    async fn delete(&self, name: &str, deadline: Deadline) -> DomainResult<()>;

    async fn get(&self, name: &str, deadline: Deadline) -> DomainResult<User>;

    /// Never fails on an empty window; returns an empty vector instead.
    async fn list(&self, params: ListParams, deadline: Deadline) -> DomainResult<Vec<User>>;
}
