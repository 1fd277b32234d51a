//! User business core
//!
//! Validates requests, drives the store, and keeps the cache-aside entries
//! coherent with writes. Cache trouble never fails a request: it is logged
//! and the store is consulted instead.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::cache_keys::{list_key, user_key, LIST_GENERATION_KEY};
use crate::application::ports::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use crate::application::ports::{Cache, SharedMetrics};
use crate::domain::{
    CreateUserDto, DomainResult, ListParams, ListUsersDto, UpdateUserDto, User, UserNameDto,
    UserStore,
};
use crate::support::Deadline;

pub struct UserService {
    store: Arc<dyn UserStore>,
    cache: Arc<dyn Cache>,
    metrics: SharedMetrics,
    ttl: Duration,
    /// Serializes the read-patch-write of `update`.
    updates: Mutex<()>,
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: Arc<dyn Cache>,
        metrics: SharedMetrics,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            metrics,
            ttl,
            updates: Mutex::new(()),
        }
    }

    pub async fn create(&self, dto: CreateUserDto, deadline: Deadline) -> DomainResult<User> {
        dto.validate()?;
        let user = dto.into_user(chrono::Utc::now().timestamp());
        self.store.create(user.clone(), deadline).await?;
        self.rotate_list_generation(deadline).await;
        info!(user = %user, "User created");
        Ok(user)
    }

    /// Patch an existing user. The point cache entry is refreshed with the
    /// stored result.
    ///
    /// Concurrent updates through one service are applied one at a time, so
    /// patches to different fields all survive. Writers sharing the store
    /// through another service instance are not covered.
    pub async fn update(&self, dto: UpdateUserDto, deadline: Deadline) -> DomainResult<User> {
        dto.validate()?;
        let user = {
            let _guard = deadline
                .run("user update lock", async { Ok(self.updates.lock().await) })
                .await?;
            let mut user = self.store.get(&dto.name, deadline).await?;
            user.apply(&dto);
            self.store.update(user.clone(), deadline).await?;
            self.cache_put(&user_key(&user.name), &user, deadline).await;
            user
        };

        self.rotate_list_generation(deadline).await;
        info!(user = %user, "User updated");
        Ok(user)
    }

    pub async fn delete(&self, dto: UserNameDto, deadline: Deadline) -> DomainResult<()> {
        dto.validate()?;
        self.store.delete(&dto.name, deadline).await?;

        let key = user_key(&dto.name);
        match tokio::time::timeout_at(deadline.instant(), self.cache.delete(&key)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to evict cache entry"),
            Err(_) => warn!(key = %key, "Cache eviction timed out"),
        }
        self.rotate_list_generation(deadline).await;
        info!(name = %dto.name, "User deleted");
        Ok(())
    }

    pub async fn get(&self, dto: UserNameDto, deadline: Deadline) -> DomainResult<User> {
        dto.validate()?;
        let key = user_key(&dto.name);

        if let Some(user) = self.cache_fetch::<User>(&key, deadline).await {
            self.metrics.increment(CACHE_HITS_TOTAL, "get");
            return Ok(user);
        }
        self.metrics.increment(CACHE_MISSES_TOTAL, "get");

        let user = self.store.get(&dto.name, deadline).await?;
        self.cache_put(&key, &user, deadline).await;
        Ok(user)
    }

    pub async fn list(&self, dto: ListUsersDto, deadline: Deadline) -> DomainResult<Vec<User>> {
        dto.validate()?;
        let params = ListParams::from(dto);
        let key = self
            .list_generation(deadline)
            .await
            .map(|generation| list_key(&generation, &params));

        if let Some(ref key) = key {
            if let Some(users) = self.cache_fetch::<Vec<User>>(key, deadline).await {
                self.metrics.increment(CACHE_HITS_TOTAL, "list");
                return Ok(users);
            }
        }
        self.metrics.increment(CACHE_MISSES_TOTAL, "list");

        let users = self.store.list(params, deadline).await?;
        if let Some(ref key) = key {
            self.cache_put(key, &users, deadline).await;
        }
        Ok(users)
    }

    /// Every page of the listing, walking offsets until an empty page.
    ///
    /// Each page gets its own deadline of `page_timeout`. The stream ends
    /// after the first error.
    pub fn list_all(
        &self,
        order: bool,
        page_size: u64,
        page_timeout: Duration,
    ) -> impl Stream<Item = DomainResult<Vec<User>>> + Send + '_ {
        stream::unfold(Some(0u64), move |offset| async move {
            let offset = offset?;
            let dto = ListUsersDto {
                order,
                limit: page_size,
                offset,
            };
            match self.list(dto, Deadline::after(page_timeout)).await {
                Ok(page) if page.is_empty() => None,
                Ok(page) => Some((Ok(page), Some(offset + 1))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    // ── Cache helpers ────────────────────────────────────────────

    async fn cache_fetch<T: DeserializeOwned>(&self, key: &str, deadline: Deadline) -> Option<T> {
        let bytes = match tokio::time::timeout_at(deadline.instant(), self.cache.get(key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(key, error = %e, "Cache read failed, using store");
                return None;
            }
            Err(_) => {
                warn!(key, "Cache read timed out, using store");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Undecodable cache entry, using store");
                None
            }
        }
    }

    async fn cache_put<T: Serialize + ?Sized>(&self, key: &str, value: &T, deadline: Deadline) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        match tokio::time::timeout_at(deadline.instant(), self.cache.set(key, bytes, self.ttl)).await
        {
            Ok(Ok(())) => debug!(key, "Cache filled"),
            Ok(Err(e)) => warn!(key, error = %e, "Cache write failed"),
            Err(_) => warn!(key, "Cache write timed out"),
        }
    }

    /// Current list generation, creating one if none is cached.
    /// `None` means list caching is skipped for this call.
    async fn list_generation(&self, deadline: Deadline) -> Option<String> {
        match tokio::time::timeout_at(deadline.instant(), self.cache.get(LIST_GENERATION_KEY)).await
        {
            Ok(Ok(Some(bytes))) => match String::from_utf8(bytes) {
                Ok(generation) => return Some(generation),
                Err(_) => warn!("Garbled list generation, starting a new one"),
            },
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Cannot read list generation, bypassing list cache");
                return None;
            }
            Err(_) => return None,
        }
        self.rotate_list_generation(deadline).await
    }

    /// Make every cached list page unreachable.
    async fn rotate_list_generation(&self, deadline: Deadline) -> Option<String> {
        let generation = Uuid::new_v4().simple().to_string();
        let set = self
            .cache
            .set(LIST_GENERATION_KEY, generation.clone().into_bytes(), self.ttl);
        match tokio::time::timeout_at(deadline.instant(), set).await {
            Ok(Ok(())) => Some(generation),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to rotate list generation");
                None
            }
            Err(_) => {
                warn!("List generation rotation timed out");
                None
            }
        }
    }
}
