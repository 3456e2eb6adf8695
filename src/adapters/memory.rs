//! In-Memory Store Adapters
//!
//! `MemoryStore` implements both `StoreBackend` and `CounterStore` over
//! sharded `DashMap`s, with TTL expiry read from the injected clock. It can
//! play either cache tier and the rate-limit counter store. Availability and
//! latency can be toggled to exercise the fail-soft paths.
//!
//! Expired values and counters are swept every [`SWEEP_EVERY_WRITES`] writes
//! and by [`MemoryStore::purge_expired`], which the daemon schedules.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::domain::ports::{Clock, CounterStore, CounterUpdate, StoreBackend, TierDirectory};
use crate::error::{Error, Result};

use super::clock::SystemClock;

/// Writes between amortised sweeps of expired values and counters
pub const SWEEP_EVERY_WRITES: u64 = 256;

/// Expiry in unix millis; `None` never expires.
fn expiry(now_ms: i64, ttl: Duration) -> Option<i64> {
    if ttl.is_zero() {
        None
    } else {
        Some(now_ms.saturating_add(ttl.as_millis() as i64))
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<i64>,
}

impl StoredValue {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }
}

#[derive(Debug, Clone, Copy)]
struct StoredCounter {
    value: u64,
    expires_at: Option<i64>,
}

impl StoredCounter {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }
}

/// Group-scoped in-memory key/value and counter store.
pub struct MemoryStore {
    name: String,
    clock: Arc<dyn Clock>,
    /// group -> key -> value
    groups: DashMap<String, DashMap<String, StoredValue>>,
    counters: DashMap<String, StoredCounter>,
    total_bytes: AtomicU64,
    writes: AtomicU64,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    /// Create a store on the system clock
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`
    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            groups: DashMap::new(),
            counters: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of live values across all groups
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.len()).sum()
    }

    /// Check if the store holds no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live rate-limit counters
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Remove every expired value and counter and drop emptied groups.
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.now_ms();
        let mut removed = 0;

        for bucket in self.groups.iter() {
            bucket.retain(|_, value| {
                if value.is_expired(now) {
                    self.release(value);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.groups.retain(|_, bucket| !bucket.is_empty());

        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        removed += before.saturating_sub(self.counters.len());

        if removed > 0 {
            tracing::debug!(store = %self.name, removed, "Purged expired entries");
        }
        removed
    }

    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES == 0 {
            self.purge_expired();
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    async fn ready(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::Relaxed) {
            return Err(Error::backend(&self.name, "store unavailable"));
        }
        Ok(())
    }

    fn release(&self, value: &StoredValue) {
        self.total_bytes
            .fetch_sub(value.data.len() as u64, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("groups", &self.groups.len())
            .field("counters", &self.counters.len())
            .finish()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, group: &str, key: &str) -> Result<Option<Bytes>> {
        self.ready().await?;
        let now = self.now_ms();

        let Some(bucket) = self.groups.get(group) else {
            return Ok(None);
        };
        if let Some(entry) = bucket.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.data.clone()));
            }
        }

        // Expired: drop it on read
        if let Some((_, old)) = bucket.remove_if(key, |_, v| v.is_expired(now)) {
            self.release(&old);
        }
        Ok(None)
    }

    async fn set(&self, group: &str, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.ready().await?;
        let size = value.len() as u64;
        let stored = StoredValue {
            data: value,
            expires_at: expiry(self.now_ms(), ttl),
        };

        // Count the bytes before the entry is visible so a racing delete
        // never subtracts more than was added
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        {
            let bucket = self
                .groups
                .entry(group.to_string())
                .or_insert_with(DashMap::new);
            if let Some(old) = bucket.insert(key.to_string(), stored) {
                self.release(&old);
            }
        }
        self.record_write();
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<bool> {
        self.ready().await?;
        if let Some(bucket) = self.groups.get(group) {
            if let Some((_, old)) = bucket.remove(key) {
                self.release(&old);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn clear_group(&self, group: &str) -> Result<usize> {
        self.ready().await?;
        match self.groups.remove(group) {
            Some((_, bucket)) => {
                let removed = bucket.len();
                for (_, value) in bucket {
                    self.release(&value);
                }
                Ok(removed)
            }
            None => Ok(0),
        }
    }

    fn memory_usage(&self) -> Option<u64> {
        Some(self.total_bytes.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_count(&self, key: &str) -> Result<Option<u64>> {
        self.ready().await?;
        let now = self.now_ms();
        Ok(self
            .counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.value))
    }

    async fn set_count(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.ready().await?;
        let counter = StoredCounter {
            value,
            expires_at: expiry(self.now_ms(), ttl),
        };
        self.counters.insert(key.to_string(), counter);
        self.record_write();
        Ok(())
    }

    async fn delete_count(&self, key: &str) -> Result<()> {
        self.ready().await?;
        self.counters.remove(key);
        Ok(())
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        self.ready().await?;
        let now = self.now_ms();
        let fresh = StoredCounter {
            value: 0,
            expires_at: expiry(now, ttl),
        };

        let value = {
            let mut counter = self.counters.entry(key.to_string()).or_insert(fresh);
            if counter.is_expired(now) {
                *counter = fresh;
            }
            counter.value += 1;
            counter.value
        };
        self.record_write();
        Ok(value)
    }

    fn supports_atomic_increment(&self) -> bool {
        true
    }

    async fn increment_below(&self, key: &str, limit: u64, ttl: Duration) -> Result<CounterUpdate> {
        self.ready().await?;
        let now = self.now_ms();
        let fresh = StoredCounter {
            value: 0,
            expires_at: expiry(now, ttl),
        };

        // The entry guard holds the shard lock for the whole compare-and-increment
        let update = {
            let mut counter = self.counters.entry(key.to_string()).or_insert(fresh);
            if counter.is_expired(now) {
                *counter = fresh;
            }
            if counter.value >= limit {
                CounterUpdate {
                    count: counter.value,
                    incremented: false,
                }
            } else {
                counter.value += 1;
                CounterUpdate {
                    count: counter.value,
                    incremented: true,
                }
            }
        };
        self.record_write();
        Ok(update)
    }
}

/// In-memory tier assignments.
#[derive(Debug, Default)]
pub struct MemoryTierDirectory {
    assignments: DashMap<String, String>,
}

impl MemoryTierDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TierDirectory for MemoryTierDirectory {
    async fn tier_of(&self, identity: &str) -> Result<Option<String>> {
        Ok(self.assignments.get(identity).map(|t| t.clone()))
    }

    async fn assign(&self, identity: &str, tier: &str) -> Result<()> {
        self.assignments
            .insert(identity.to_string(), tier.to_string());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let store = MemoryStore::with_clock("fast", clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let (_, store) = store();

        store
            .set("g", "k", Bytes::from("v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("g", "k").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(store.memory_usage(), Some(1));

        assert!(store.delete("g", "k").await.unwrap());
        assert!(!store.delete("g", "k").await.unwrap());
        assert_eq!(store.get("g", "k").await.unwrap(), None);
        assert_eq!(store.memory_usage(), Some(0));
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let (_, store) = store();

        store
            .set("a", "k", Bytes::from("1"), Duration::ZERO)
            .await
            .unwrap();
        store
            .set("b", "k", Bytes::from("2"), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.clear_group("a").await.unwrap(), 1);
        assert_eq!(store.get("a", "k").await.unwrap(), None);
        assert_eq!(store.get("b", "k").await.unwrap(), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (clock, store) = store();

        store
            .set("g", "k", Bytes::from("v"), Duration::from_secs(10))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(9));
        assert!(store.get("g", "k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("g", "k").await.unwrap().is_none());
        assert_eq!(store.memory_usage(), Some(0));
    }

    #[tokio::test]
    async fn test_purge_releases_expired_bytes_without_reads() {
        let (clock, store) = store();
        let payload = Bytes::from(vec![0u8; 1024]);

        for i in 0..100 {
            store
                .set("g", &format!("k{}", i), payload.clone(), Duration::from_secs(1))
                .await
                .unwrap();
        }
        store
            .set("keep", "k", Bytes::from("v"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.memory_usage(), Some(100 * 1024 + 1));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.purge_expired(), 100);
        assert_eq!(store.memory_usage(), Some(1));
        assert_eq!(store.len(), 1);
        assert_eq!(store.groups.len(), 1);
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_values() {
        let (clock, store) = store();

        store
            .set("old", "k", Bytes::from(vec![0u8; 512]), Duration::from_secs(1))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(5));

        for _ in 0..SWEEP_EVERY_WRITES {
            store
                .set("g", "hot", Bytes::from("v"), Duration::ZERO)
                .await
                .unwrap();
        }
        assert_eq!(store.memory_usage(), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_windows_do_not_accumulate() {
        let (clock, store) = store();
        let window = Duration::from_secs(60);

        for i in 0..500 {
            store
                .increment_below(&format!("rl:user_1:foundation:{}", i), 60, window)
                .await
                .unwrap();
            clock.advance(window);
        }
        assert!(store.counter_count() <= SWEEP_EVERY_WRITES as usize);

        store.purge_expired();
        assert_eq!(store.counter_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_and_delete_never_underflow() {
        let store = Arc::new(MemoryStore::new("fast"));

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    if i % 2 == 0 {
                        store
                            .set("g", "k", Bytes::from("abc"), Duration::ZERO)
                            .await
                            .unwrap();
                    } else {
                        store.delete("g", "k").await.unwrap();
                    }
                    assert!(store.memory_usage().unwrap() <= 3 * 32);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(store.memory_usage().unwrap() <= 3);
    }

    #[tokio::test]
    async fn test_overwrite_tracks_size() {
        let (_, store) = store();

        store
            .set("g", "k", Bytes::from("12345"), Duration::ZERO)
            .await
            .unwrap();
        store
            .set("g", "k", Bytes::from("12"), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.memory_usage(), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let (_, store) = store();
        store.set_available(false);

        assert!(store.get("g", "k").await.is_err());
        assert!(store.get_count("c").await.is_err());

        store.set_available(true);
        assert!(store.get("g", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counter_increment_and_expiry() {
        let (clock, store) = store();

        assert_eq!(
            store
                .increment_with_ttl("c", Duration::from_secs(5))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .increment_with_ttl("c", Duration::from_secs(5))
                .await
                .unwrap(),
            2
        );

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.get_count("c").await.unwrap(), None);
        assert_eq!(
            store
                .increment_with_ttl("c", Duration::from_secs(5))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_increment_below_stops_at_limit() {
        let (_, store) = store();
        let ttl = Duration::from_secs(60);

        for expected in 1..=3 {
            let update = store.increment_below("c", 3, ttl).await.unwrap();
            assert!(update.incremented);
            assert_eq!(update.count, expected);
        }

        let update = store.increment_below("c", 3, ttl).await.unwrap();
        assert!(!update.incremented);
        assert_eq!(update.count, 3);
    }

    #[tokio::test]
    async fn test_increment_below_is_atomic_under_contention() {
        let store = Arc::new(MemoryStore::new("counters"));
        let ttl = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_below("hot", 10, ttl).await.unwrap().incremented
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
        assert_eq!(store.get_count("hot").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_tier_directory() {
        let directory = MemoryTierDirectory::new();
        assert_eq!(directory.tier_of("user_1").await.unwrap(), None);

        directory.assign("user_1", "performance").await.unwrap();
        assert_eq!(
            directory.tier_of("user_1").await.unwrap(),
            Some("performance".to_string())
        );
    }
}
