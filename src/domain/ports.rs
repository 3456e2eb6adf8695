//! Domain Ports (Port/Adapter Pattern)
//!
//! The core abstractions the cache, rate limiter, monitor and warmer depend
//! on. Adapters in [`crate::adapters`] provide concrete implementations; the
//! embedding application supplies its own for durable storage, user data and
//! notification delivery.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Ports (Traits)                               │
//! │  StoreBackend │ CounterStore │ TierDirectory │ AlertChannel          │
//! │  StatsStore   │ WarmSource   │ Clock         │ TierPolicy            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Adapters (Impls)                              │
//! │  MemoryStore │ MemoryTierDirectory │ WebhookChannel │ FileStatsStore │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::Alert;
use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// What a component does when its backing store misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Degrade silently: cache errors become misses, rate-limit errors allow.
    #[default]
    FailOpen,
    /// Surface the failure: cache errors propagate, rate-limit errors deny.
    FailClosed,
}

impl FailurePolicy {
    /// True for [`FailurePolicy::FailOpen`]
    pub fn is_open(&self) -> bool {
        matches!(self, FailurePolicy::FailOpen)
    }
}

/// Enumerated per-identity cache kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Profile,
    Preferences,
    Settings,
    Meta,
    Overview,
    Stats,
    Activity,
    Goals,
}

impl CacheKind {
    /// Kinds removed by a full per-user invalidation.
    pub const USER_KINDS: [CacheKind; 4] = [
        CacheKind::Profile,
        CacheKind::Preferences,
        CacheKind::Settings,
        CacheKind::Meta,
    ];

    /// Every known kind.
    pub const ALL: [CacheKind; 8] = [
        CacheKind::Profile,
        CacheKind::Preferences,
        CacheKind::Settings,
        CacheKind::Meta,
        CacheKind::Overview,
        CacheKind::Stats,
        CacheKind::Activity,
        CacheKind::Goals,
    ];

    /// Stable label used in cache keys and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Profile => "profile",
            CacheKind::Preferences => "preferences",
            CacheKind::Settings => "settings",
            CacheKind::Meta => "meta",
            CacheKind::Overview => "overview",
            CacheKind::Stats => "stats",
            CacheKind::Activity => "activity",
            CacheKind::Goals => "goals",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CacheKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownCacheKind(s.to_string()))
    }
}

/// Periodic projection of the monitor accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub sets: u64,
    pub deletes: u64,
    pub memory_usage_bytes: u64,
    pub avg_response_time_ms: f64,
}

impl StatsSnapshot {
    /// Total sampled lookups
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Miss rate, `0` with no lookups
    pub fn miss_rate(&self) -> f64 {
        if self.lookups() == 0 {
            0.0
        } else {
            self.misses as f64 / self.lookups() as f64
        }
    }
}

// =============================================================================
// Clock Port
// =============================================================================

/// Source of wall-clock time for windows, TTLs, cooldowns and retention.
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;

    /// Current time as unix seconds
    fn unix_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

// =============================================================================
// Store Backend Port
// =============================================================================

/// Group-scoped key/value tier used by the cache service.
///
/// Implementations report connectivity problems as `Err`; absence is
/// `Ok(None)`. Expired entries must read as absent.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Read a value
    async fn get(&self, group: &str, key: &str) -> Result<Option<Bytes>>;

    /// Write a value that expires after `ttl`
    async fn set(&self, group: &str, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a value. Returns whether it existed.
    async fn delete(&self, group: &str, key: &str) -> Result<bool>;

    /// Delete every key in a group. Returns the number removed.
    async fn clear_group(&self, group: &str) -> Result<usize>;

    /// Approximate bytes held, if the backend can tell
    fn memory_usage(&self) -> Option<u64> {
        None
    }
}

// =============================================================================
// Counter Store Port
// =============================================================================

/// Result of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    /// Counter value after the operation
    pub count: u64,
    /// Whether the counter was incremented
    pub incremented: bool,
}

/// Durable counter storage for rate-limit windows.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Store name for logs
    fn name(&self) -> &str;

    /// Read a counter
    async fn get_count(&self, key: &str) -> Result<Option<u64>>;

    /// Overwrite a counter
    async fn set_count(&self, key: &str, value: u64, ttl: Duration) -> Result<()>;

    /// Remove a counter
    async fn delete_count(&self, key: &str) -> Result<()>;

    /// Increment, creating at 1 with `ttl` when absent. Returns the new value.
    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Whether [`CounterStore::increment_below`] is atomic
    fn supports_atomic_increment(&self) -> bool {
        false
    }

    /// Increment only while the counter is below `limit`.
    ///
    /// The default is a read followed by a write and is only safe when the
    /// caller serializes access per key.
    async fn increment_below(&self, key: &str, limit: u64, ttl: Duration) -> Result<CounterUpdate> {
        let current = self.get_count(key).await?.unwrap_or(0);
        if current >= limit {
            return Ok(CounterUpdate {
                count: current,
                incremented: false,
            });
        }
        let count = self.increment_with_ttl(key, ttl).await?;
        Ok(CounterUpdate {
            count,
            incremented: true,
        })
    }
}

// =============================================================================
// Tier Ports
// =============================================================================

/// Durable per-identity tier assignments.
#[async_trait]
pub trait TierDirectory: Send + Sync {
    /// Recorded tier name for an identity
    async fn tier_of(&self, identity: &str) -> Result<Option<String>>;

    /// Record a tier name for an identity
    async fn assign(&self, identity: &str, tier: &str) -> Result<()>;
}

/// Hook that can override the default tier, e.g. by subscription level.
pub trait TierPolicy: Send + Sync {
    /// Tier name to use when nothing valid is recorded for `identity`.
    fn default_tier(&self, identity: &str, configured_default: &str) -> String;
}

// =============================================================================
// Alert Channel Port
// =============================================================================

/// Destination for operator alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name for logs
    fn name(&self) -> &str;

    /// Deliver an alert
    async fn send(&self, alert: &Alert) -> Result<()>;
}

// =============================================================================
// Stats Store Port
// =============================================================================

/// Retained, time-ordered sequence of stats snapshots.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Append a snapshot
    async fn append(&self, snapshot: StatsSnapshot) -> Result<()>;

    /// Drop snapshots older than `cutoff`. Returns the number removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Snapshots at or after `since`, oldest first
    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<StatsSnapshot>>;
}

// =============================================================================
// Warm Source Port
// =============================================================================

/// Authoritative data source the cache warmer recomputes values from.
#[async_trait]
pub trait WarmSource: Send + Sync {
    /// Identities active since `active_since`, at most `limit`
    async fn priority_identities(
        &self,
        active_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Compute the value for one identity and kind
    async fn load(&self, identity: &str, kind: CacheKind) -> Result<serde_json::Value>;
}

// =============================================================================
// Tests
// =============================================================================
