//! In-memory user store with bounded admission

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};
use tracing::debug;

use crate::domain::{DomainError, DomainResult, ListParams, User, UserStore};
use crate::support::Deadline;

/// Default number of operations admitted at once.
pub const DEFAULT_WORKERS: usize = 10;

/// In-memory store for development and testing.
///
/// Rows live in a name-ordered map. Every operation must first take one of
/// `workers` admission permits; a caller that cannot get one before its
/// deadline gets `DomainError::Timeout`.
pub struct BoundedMemoryStore {
    users: RwLock<BTreeMap<String, User>>,
    permits: Semaphore,
    workers: usize,
}

impl BoundedMemoryStore {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            users: RwLock::new(BTreeMap::new()),
            permits: Semaphore::new(workers),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Take one admission slot, waiting no longer than `deadline`.
    pub(crate) async fn reserve(&self, deadline: Deadline) -> DomainResult<SemaphorePermit<'_>> {
        match tokio::time::timeout_at(deadline.instant(), self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(DomainError::Unavailable("memory store is closed".into())),
            Err(_) => {
                debug!(workers = self.workers, "Memory store admission timed out");
                Err(DomainError::Timeout("memory store admission".into()))
            }
        }
    }

    fn email_taken(users: &BTreeMap<String, User>, email: &str, except: &str) -> bool {
        users
            .values()
            .any(|u| u.email == email && u.name != except)
    }
}

impl Default for BoundedMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

fn window_bounds(params: &ListParams) -> (usize, usize) {
    let start = usize::try_from(params.start()).unwrap_or(usize::MAX);
    let limit = usize::try_from(params.limit).unwrap_or(usize::MAX);
    (start, limit)
}

#[async_trait]
impl UserStore for BoundedMemoryStore {
    async fn create(&self, user: User, deadline: Deadline) -> DomainResult<()> {
        let _permit = self.reserve(deadline).await?;
        deadline
            .run("memory store create", async {
                let mut users = self.users.write().await;
                if users.contains_key(&user.name) {
                    return Err(DomainError::AlreadyExists(format!("user {}", user.name)));
                }
                if Self::email_taken(&users, &user.email, &user.name) {
                    return Err(DomainError::AlreadyExists(format!("email {}", user.email)));
                }
                users.insert(user.name.clone(), user);
                Ok(())
            })
            .await
    }

    async fn update(&self, user: User, deadline: Deadline) -> DomainResult<()> {
        let _permit = self.reserve(deadline).await?;
        deadline
            .run("memory store update", async {
                let mut users = self.users.write().await;
                if !users.contains_key(&user.name) {
                    return Err(DomainError::user_not_found(&user.name));
                }
                if Self::email_taken(&users, &user.email, &user.name) {
                    return Err(DomainError::AlreadyExists(format!("email {}", user.email)));
                }
                let stored = users
                    .get_mut(&user.name)
                    .ok_or_else(|| DomainError::user_not_found(&user.name))?;
                stored.password = user.password;
                stored.email = user.email;
                stored.full_name = user.full_name;
                Ok(())
            })
            .await
    }

    async fn delete(&self, name: &str, deadline: Deadline) -> DomainResult<()> {
        let _permit = self.reserve(deadline).await?;
        deadline
            .run("memory store delete", async {
                self.users
                    .write()
                    .await
                    .remove(name)
                    .map(|_| ())
                    .ok_or_else(|| DomainError::user_not_found(name))
            })
            .await
    }

    async fn get(&self, name: &str, deadline: Deadline) -> DomainResult<User> {
        let _permit = self.reserve(deadline).await?;
        deadline
            .run("memory store get", async {
                self.users
                    .read()
                    .await
                    .get(name)
                    .cloned()
                    .ok_or_else(|| DomainError::user_not_found(name))
            })
            .await
    }

    async fn list(&self, params: ListParams, deadline: Deadline) -> DomainResult<Vec<User>> {
        let _permit = self.reserve(deadline).await?;
        let (start, limit) = window_bounds(&params);
        deadline
            .run("memory store list", async {
                let users = self.users.read().await;
                let page = if params.order {
                    users.values().rev().skip(start).take(limit).cloned().collect()
                } else {
                    users.values().skip(start).take(limit).cloned().collect()
                };
                Ok(page)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn user(name: &str) -> User {
        User {
            name: name.into(),
            password: "pw".into(),
            email: format!("{}@x.com", name.to_lowercase()),
            full_name: format!("{name} Full"),
            created_at: 100,
        }
    }

    fn soon() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    async fn seeded(names: &[&str]) -> BoundedMemoryStore {
        let store = BoundedMemoryStore::new(4);
        for name in names {
            store.create(user(name), soon()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn create_then_get_returns_same_row() {
        let store = seeded(&["Ivan"]).await;
        assert_eq!(store.get("Ivan", soon()).await.unwrap(), user("Ivan"));
    }

    #[tokio::test]
    async fn duplicate_name_and_email_are_rejected() {
        let store = seeded(&["Ivan"]).await;
        let err = store.create(user("Ivan"), soon()).await.unwrap_err();
        assert!(matches!(err, DomainError::AlreadyExists(_)));

        let mut other = user("Oleg");
        other.email = "ivan@x.com".into();
        let err = store.create(other, soon()).await.unwrap_err();
        assert!(matches!(err, DomainError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = BoundedMemoryStore::default();
        let expected = DomainError::user_not_found("ghost");
        assert_eq!(store.get("ghost", soon()).await.unwrap_err(), expected);
        assert_eq!(store.delete("ghost", soon()).await.unwrap_err(), expected);
        assert_eq!(store.update(user("ghost"), soon()).await.unwrap_err(), expected);
    }

    #[tokio::test]
    async fn update_keeps_created_at() {
        let store = seeded(&["Ivan"]).await;
        let mut patched = user("Ivan");
        patched.full_name = "Ivan Petrov".into();
        patched.created_at = 999;
        store.update(patched, soon()).await.unwrap();

        let stored = store.get("Ivan", soon()).await.unwrap();
        assert_eq!(stored.full_name, "Ivan Petrov");
        assert_eq!(stored.created_at, 100);
    }

    #[tokio::test]
    async fn list_orders_and_pages_by_name() {
        let store = seeded(&["Carl", "Anna", "Eve", "Bob", "Dan"]).await;
        let names = |users: Vec<User>| users.into_iter().map(|u| u.name).collect::<Vec<_>>();

        let asc = names(store.list(ListParams::new(false, 5, 0), soon()).await.unwrap());
        let mut desc = names(store.list(ListParams::new(true, 5, 0), soon()).await.unwrap());
        assert_eq!(asc, ["Anna", "Bob", "Carl", "Dan", "Eve"]);
        desc.reverse();
        assert_eq!(asc, desc);

        let first = names(store.list(ListParams::new(false, 2, 0), soon()).await.unwrap());
        let second = names(store.list(ListParams::new(false, 2, 1), soon()).await.unwrap());
        assert_eq!(first, ["Anna", "Bob"]);
        assert_eq!(second, ["Carl", "Dan"]);

        let past_end = store.list(ListParams::new(false, 2, 10), soon()).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn operation_beyond_admission_pool_times_out() {
        const WORKERS: usize = 3;
        let store = Arc::new(BoundedMemoryStore::new(WORKERS));
        store.create(user("Ivan"), soon()).await.unwrap();

        // Stall every admitted operation on the row lock.
        let gate = store.users.write().await;
        let busy: Vec<_> = (0..WORKERS)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get("Ivan", soon()).await })
            })
            .collect();
        while store.available() > 0 {
            tokio::task::yield_now().await;
        }

        let started = tokio::time::Instant::now();
        let err = store
            .get("Ivan", Deadline::after(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Timeout(ref m) if m.contains("admission")), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(gate);
        for task in busy {
            assert_eq!(task.await.unwrap().unwrap().name, "Ivan");
        }
        assert_eq!(store.available(), WORKERS);
    }

    #[tokio::test]
    async fn pages_cover_every_row_once() {
        let names = ["Gina", "Carl", "Anna", "Emil", "Bob", "Dora", "Finn"];
        let store = seeded(&names).await;
        let mut expected: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        expected.sort();

        for limit in 1..=8 {
            let mut seen = Vec::new();
            for offset in 0.. {
                let page = store.list(ListParams::new(false, limit, offset), soon()).await.unwrap();
                if page.is_empty() {
                    break;
                }
                assert!(page.len() as u64 <= limit);
                seen.extend(page.into_iter().map(|u| u.name));
            }
            assert_eq!(seen, expected, "limit {limit}");
        }
    }

    #[tokio::test]
    async fn released_permit_admits_waiter() {
        let store = BoundedMemoryStore::new(1);
        let held = store.reserve(soon()).await.unwrap();
        drop(held);
        assert!(store.list(ListParams::new(false, 1, 0), soon()).await.unwrap().is_empty());
        assert_eq!(store.available(), 1);
    }
}
