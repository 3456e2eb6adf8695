//! Cache Service - Unified Two-Tier Cache
//!
//! Writes go to both the fast and the durable tier; reads try the fast tier
//! first. Storage failures never reach callers of `get`/`set`/`delete`: they
//! are logged and treated as misses or failed writes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::keys;
use crate::domain::events::{CacheEvent, CacheObserver};
use crate::domain::ports::{CacheKind, FailurePolicy, StoreBackend};
use crate::error::{Error, Result};

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one (0 = never expires)
    pub default_ttl_secs: u64,
    /// Group used when a caller does not pass one
    pub default_group: String,
    /// Deadline for every individual backend call
    pub backend_timeout_ms: u64,
    /// Whether `remember` hides backend errors (open) or returns them (closed)
    pub failure_policy: FailurePolicy,
    /// Prefix for generated keys
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            default_group: "pulse".to_string(),
            backend_timeout_ms: 250,
            failure_policy: FailurePolicy::FailOpen,
            key_prefix: "pulse".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

/// Two-tier cache with observer notifications.
pub struct CacheService {
    config: CacheConfig,
    fast: Arc<dyn StoreBackend>,
    durable: Arc<dyn StoreBackend>,
    observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
    /// Per-key locks for coalesced `remember`
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl CacheService {
    /// Create a cache over a fast and a durable tier
    pub fn new(
        config: CacheConfig,
        fast: Arc<dyn StoreBackend>,
        durable: Arc<dyn StoreBackend>,
    ) -> Self {
        Self {
            config,
            fast,
            durable,
            observers: RwLock::new(Vec::new()),
            in_flight: DashMap::new(),
        }
    }

    /// Register an observer for hit/miss/set/delete events
    pub fn subscribe(&self, observer: Arc<dyn CacheObserver>) {
        self.observers.write().push(observer);
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // =========================================================================
    // Key helpers
    // =========================================================================

    /// Key for a per-user cache kind
    pub fn user_key(&self, user_id: &str, kind: CacheKind) -> String {
        keys::user_key(&self.config.key_prefix, user_id, kind)
    }

    /// Key for a resource
    pub fn resource_key(&self, resource_id: &str, kind: &str) -> String {
        keys::resource_key(&self.config.key_prefix, resource_id, kind)
    }

    // =========================================================================
    // Raw operations
    // =========================================================================

    /// Read raw bytes from the default group
    pub async fn get_raw(&self, key: &str) -> Option<Bytes> {
        self.get_raw_in(&self.config.default_group, key).await
    }

    /// Read raw bytes: fast tier first, then durable tier.
    pub async fn get_raw_in(&self, group: &str, key: &str) -> Option<Bytes> {
        self.lookup(group, key, true).await.unwrap_or(None)
    }

    /// Write raw bytes to the default group with the default TTL
    pub async fn set_raw(&self, key: &str, value: Bytes) -> bool {
        let group = self.config.default_group.clone();
        self.set_raw_in(&group, key, value, None).await
    }

    /// Write raw bytes to both tiers. True only if both writes succeeded.
    #[instrument(skip(self, value), fields(size = value.len()))]
    pub async fn set_raw_in(
        &self,
        group: &str,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> bool {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let size_bytes = value.len() as u64;

        // No rollback of the succeeding tier on partial failure
        let (fast, durable) = tokio::join!(
            self.guarded(self.fast.name(), "set", self.fast.set(group, key, value.clone(), ttl)),
            self.guarded(self.durable.name(), "set", self.durable.set(group, key, value, ttl)),
        );

        let ok = self.settle("set", key, fast) & self.settle("set", key, durable);

        self.emit(CacheEvent::Set {
            key: key.to_string(),
            size_bytes,
            memory_bytes: self.fast.memory_usage(),
        });
        ok
    }

    // =========================================================================
    // Typed operations
    // =========================================================================

    /// Read and decode a value from the default group
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_in(&self.config.default_group, key).await
    }

    /// Read and decode a value. Undecodable entries read as absent.
    pub async fn get_in<T: DeserializeOwned>(&self, group: &str, key: &str) -> Option<T> {
        let raw = self.get_raw_in(group, key).await?;
        decode(key, &raw)
    }

    /// Encode and write a value to the default group with the default TTL
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.set_in(&self.config.default_group, key, value, None)
            .await
    }

    /// Encode and write a value to both tiers
    pub async fn set_in<T: Serialize + ?Sized>(
        &self,
        group: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_vec(value) {
            Ok(raw) => self.set_raw_in(group, key, Bytes::from(raw), ttl).await,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache value");
                false
            }
        }
    }

    /// Delete from the default group
    pub async fn delete(&self, key: &str) -> bool {
        self.delete_in(&self.config.default_group, key).await
    }

    /// Delete from both tiers. True only if both tiers answered without error;
    /// deleting an absent key succeeds.
    #[instrument(skip(self))]
    pub async fn delete_in(&self, group: &str, key: &str) -> bool {
        let (fast, durable) = tokio::join!(
            self.guarded(self.fast.name(), "delete", self.fast.delete(group, key)),
            self.guarded(self.durable.name(), "delete", self.durable.delete(group, key)),
        );

        let ok = self.settle("delete", key, fast) & self.settle("delete", key, durable);

        self.emit(CacheEvent::Delete {
            key: key.to_string(),
            memory_bytes: self.fast.memory_usage(),
        });
        ok
    }

    /// Remove every key in `group` from both tiers
    #[instrument(skip(self))]
    pub async fn clear_group(&self, group: &str) {
        let (fast, durable) = tokio::join!(
            self.guarded(self.fast.name(), "clear_group", self.fast.clear_group(group)),
            self.guarded(
                self.durable.name(),
                "clear_group",
                self.durable.clear_group(group)
            ),
        );

        match (fast, durable) {
            (Ok(f), Ok(d)) => debug!(group, fast = f, durable = d, "Cache group cleared"),
            (f, d) => warn!(
                group,
                fast_ok = f.is_ok(),
                durable_ok = d.is_ok(),
                "Cache group only partially cleared"
            ),
        }
    }

    // =========================================================================
    // Remember
    // =========================================================================

    /// Return the cached value or compute, store and return it
    pub async fn remember<T, F, Fut, E>(&self, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let group = self.config.default_group.clone();
        self.remember_in(&group, key, None, producer).await
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Not locked: concurrent callers for the same missing key each run their
    /// producer. A producer error is returned for this key only and nothing is
    /// cached. Backend errors are hidden under `FailOpen` and returned under
    /// `FailClosed`.
    pub async fn remember_in<T, F, Fut, E>(
        &self,
        group: &str,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let (value, _) = self.remember_stored_in(group, key, ttl, producer).await?;
        Ok(value)
    }

    /// [`CacheService::remember_in`] that also reports whether the value is
    /// held by the cache afterwards: `true` on a hit or when both tier writes
    /// succeeded.
    pub async fn remember_stored_in<T, F, Fut, E>(
        &self,
        group: &str,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(value) = self.lookup_value(group, key, true).await? {
            return Ok((value, true));
        }
        self.compute_and_store(group, key, ttl, producer).await
    }

    /// Coalesced `remember` in the default group
    pub async fn remember_coalesced<T, F, Fut, E>(&self, key: &str, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let group = self.config.default_group.clone();
        self.remember_coalesced_in(&group, key, None, producer)
            .await
    }

    /// Like [`CacheService::remember_in`], but concurrent callers for the same
    /// key wait for one in-progress computation instead of each running the
    /// producer.
    pub async fn remember_coalesced_in<T, F, Fut, E>(
        &self,
        group: &str,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(value) = self.lookup_value(group, key, true).await? {
            return Ok(value);
        }

        let flight_key = format!("{}\u{0}{}", group, key);
        let lock = self
            .in_flight
            .entry(flight_key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            // Whoever held the lock before us may have filled the entry
            match self.lookup_value(group, key, false).await {
                Ok(Some(value)) => Ok(value),
                Ok(None) => self
                    .compute_and_store(group, key, ttl, producer)
                    .await
                    .map(|(value, _)| value),
                Err(e) => Err(e),
            }
        };

        // Map + our clone only: nobody else is waiting on this key
        self.in_flight
            .remove_if(&flight_key, |_, m| Arc::strong_count(m) <= 2);
        result
    }

    /// Number of keys with a coalesced computation in progress or queued
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    // =========================================================================
    // Per-user invalidation
    // =========================================================================

    /// Delete every per-user kind for `user_id`. True if all deletes succeeded.
    pub async fn invalidate_all(&self, user_id: &str) -> bool {
        let mut ok = true;
        for kind in CacheKind::USER_KINDS {
            ok &= self.invalidate_one(user_id, kind).await;
        }
        ok
    }

    /// Delete one per-user kind for `user_id`
    pub async fn invalidate_one(&self, user_id: &str, kind: CacheKind) -> bool {
        let key = self.user_key(user_id, kind);
        self.delete(&key).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Fast tier, then durable tier.
    ///
    /// A durable-only hit does not backfill the fast tier.
    // TODO: decide whether durable-only hits should backfill the fast tier.
    async fn lookup(&self, group: &str, key: &str, emit: bool) -> Result<Option<Bytes>> {
        let start = Instant::now();

        let fast = self
            .guarded(self.fast.name(), "get", self.fast.get(group, key))
            .await;
        let outcome = match fast {
            Ok(Some(value)) => Ok(Some(value)),
            fast => {
                let fast_err = fast.err();
                if let Some(e) = &fast_err {
                    warn!(key, tier = self.fast.name(), error = %e, "Cache read failed, trying durable tier");
                }
                match self
                    .guarded(self.durable.name(), "get", self.durable.get(group, key))
                    .await
                {
                    Ok(Some(value)) => Ok(Some(value)),
                    Ok(None) => fast_err.map_or(Ok(None), Err),
                    Err(e) => {
                        warn!(key, tier = self.durable.name(), error = %e, "Cache read failed, treating as miss");
                        Err(e)
                    }
                }
            }
        };

        if emit {
            let elapsed = start.elapsed();
            let key = key.to_string();
            match &outcome {
                Ok(Some(_)) => self.emit(CacheEvent::Hit { key, elapsed }),
                _ => self.emit(CacheEvent::Miss { key, elapsed }),
            }
        }
        outcome
    }

    /// Decoded lookup with the failure policy applied
    async fn lookup_value<T: DeserializeOwned>(
        &self,
        group: &str,
        key: &str,
        emit: bool,
    ) -> Result<Option<T>> {
        match self.lookup(group, key, emit).await {
            Ok(Some(raw)) => Ok(decode(key, &raw)),
            Ok(None) => Ok(None),
            Err(e) if self.config.failure_policy.is_open() => {
                debug!(key, error = %e, "Backend error hidden by fail-open policy");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn compute_and_store<T, F, Fut, E>(
        &self,
        group: &str,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let value = producer().await.map_err(|e| Error::producer(key, e))?;
        let stored = self.set_in(group, key, &value, ttl).await;
        if !stored {
            warn!(key, "Computed value could not be fully cached");
        }
        Ok((value, stored))
    }

    async fn guarded<T>(
        &self,
        backend: &str,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let deadline = self.config.backend_timeout();
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("{}.{}", backend, operation),
                after_ms: deadline.as_millis() as u64,
            }),
        }
    }

    fn settle<T>(&self, operation: &str, key: &str, result: Result<T>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(key, operation, error = %e, "Cache write degraded");
                false
            }
        }
    }

    fn emit(&self, event: CacheEvent) {
        for observer in self.observers.read().iter() {
            observer.on_event(&event);
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("config", &self.config)
            .field("fast", &self.fast.name())
            .field("durable", &self.durable.name())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &[u8]) -> Option<T> {
    match serde_json::from_slice(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Undecodable cache entry, treating as miss");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
