//! Fixed-Window Rate Limiter
//!
//! Counts requests per `(identity, tier, window_start)` in a [`CounterStore`].
//! The check and the increment are one operation: either the store's atomic
//! `increment_below`, or a per-window lock held around a read and a write
//! for stores that cannot do it atomically.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::identity::Identity;
use super::tier::{Tier, TierTable};
use crate::cache::escape_key_component;
use crate::domain::ports::{Clock, CounterStore, CounterUpdate, FailurePolicy, TierDirectory, TierPolicy};
use crate::error::{Error, Result};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// Checks between sweeps of snapshots whose window has closed
const SNAPSHOT_SWEEP_EVERY: u64 = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Tiers in ascending quota order
    pub tiers: TierTable,
    /// Tier used when an identity has none recorded
    pub default_tier: String,
    /// Allow (open) or deny (closed) when the counter store fails
    pub failure_policy: FailurePolicy,
    /// Deadline for each counter store call
    pub store_timeout_ms: u64,
    /// Prefix for window counter keys
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            default_tier: "foundation".to_string(),
            failure_policy: FailurePolicy::FailOpen,
            store_timeout_ms: 250,
            key_prefix: "pulse_rl".to_string(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        self.tiers.validate()?;
        if !self.tiers.contains(&self.default_tier) {
            return Err(Error::InvalidTier(format!(
                "default tier {} is not configured",
                self.default_tier
            )));
        }
        if self.store_timeout_ms == 0 {
            return Err(Error::Config("rate_limit.store_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Quota state reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds at which the current window closes
    pub reset_at: i64,
}

impl RateLimitHeaders {
    /// Header name/value pairs
    pub fn to_header_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (HEADER_LIMIT.to_string(), self.limit.to_string()),
            (HEADER_REMAINING.to_string(), self.remaining.to_string()),
            (HEADER_RESET.to_string(), self.reset_at.to_string()),
        ])
    }

    /// Seconds until the window resets, at least 1
    pub fn retry_after_secs(&self, now: i64) -> u64 {
        (self.reset_at - now).max(1) as u64
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub tier: String,
    pub headers: RateLimitHeaders,
}

// =============================================================================
// Rate Limiter
// =============================================================================

/// Tiered fixed-window rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    directory: Arc<dyn TierDirectory>,
    clock: Arc<dyn Clock>,
    policy: Option<Arc<dyn TierPolicy>>,
    /// Per-window locks for stores without atomic increment
    window_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Latest quota snapshot per identity key
    last_headers: DashMap<String, RateLimitHeaders>,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter. Fails on an invalid tier configuration.
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        directory: Arc<dyn TierDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if !store.supports_atomic_increment() {
            info!(store = store.name(), "Counter store is not atomic, using per-window locks");
        }
        Ok(Self {
            config,
            store,
            directory,
            clock,
            policy: None,
            window_locks: DashMap::new(),
            last_headers: DashMap::new(),
            checks: AtomicU64::new(0),
        })
    }

    /// Install a hook that picks the default tier per identity
    pub fn with_policy(mut self, policy: Arc<dyn TierPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Allow or deny one request, consuming quota when allowed.
    pub async fn check_limit(&self, identity: &Identity) -> bool {
        self.check(identity).await.allowed
    }

    /// Allow or deny one request and report the resulting quota.
    ///
    /// A denied request does not increment the counter.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn check(&self, identity: &Identity) -> RateLimitDecision {
        let tier = self.get_user_tier(identity).await;
        let now = self.clock.unix_secs();
        let reset_at = tier.window_end(now);
        let ttl = Duration::from_secs((reset_at - now).max(1) as u64);
        let key = self.window_key(identity, &tier, now);

        let update = if self.store.supports_atomic_increment() {
            self.guarded(
                "increment_below",
                self.store.increment_below(&key, tier.request_limit, ttl),
            )
            .await
        } else {
            self.locked_increment(&key, tier.request_limit, ttl).await
        };

        let (allowed, remaining) = match update {
            Ok(CounterUpdate { count, incremented }) => {
                (incremented, tier.request_limit.saturating_sub(count))
            }
            Err(e) if self.config.failure_policy.is_open() => {
                warn!(error = %e, "Counter store failed, allowing request");
                (true, tier.request_limit)
            }
            Err(e) => {
                warn!(error = %e, "Counter store failed, denying request");
                (false, 0)
            }
        };

        let headers = RateLimitHeaders {
            limit: tier.request_limit,
            remaining,
            reset_at,
        };
        self.last_headers.insert(identity.as_key(), headers);
        self.sweep_snapshots(now);

        if !allowed {
            debug!(tier = %tier.name, reset_at, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            tier: tier.name,
            headers,
        }
    }

    /// Requests left in the current window. Does not consume quota.
    pub async fn get_remaining(&self, identity: &Identity) -> u64 {
        let tier = self.get_user_tier(identity).await;
        let key = self.window_key(identity, &tier, self.clock.unix_secs());

        match self.guarded("get_count", self.store.get_count(&key)).await {
            Ok(count) => tier.request_limit.saturating_sub(count.unwrap_or(0)),
            Err(e) if self.config.failure_policy.is_open() => {
                warn!(identity = %identity, error = %e, "Counter store failed, reporting full quota");
                tier.request_limit
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Counter store failed, reporting no quota");
                0
            }
        }
    }

    /// Headers from the most recent [`RateLimiter::check`] for `identity`,
    /// empty before any or once that window has closed.
    ///
    /// Prefer [`RateLimitDecision::headers`] when handling the request that
    /// was checked.
    pub fn rate_limit_headers(&self, identity: &Identity) -> HashMap<String, String> {
        self.last_headers(identity)
            .map(|h| h.to_header_map())
            .unwrap_or_default()
    }

    /// Most recent quota snapshot for `identity` in the current window
    pub fn last_headers(&self, identity: &Identity) -> Option<RateLimitHeaders> {
        let now = self.clock.unix_secs();
        self.last_headers
            .get(&identity.as_key())
            .map(|h| *h)
            .filter(|h| h.reset_at > now)
    }

    /// Resolve the tier for an identity.
    ///
    /// Unknown or unreadable assignments fall back to the policy hook's
    /// default, then to the configured default.
    pub async fn get_user_tier(&self, identity: &Identity) -> Tier {
        let identity_key = identity.as_key();

        match self
            .guarded("tier_of", self.directory.tier_of(&identity_key))
            .await
        {
            Ok(Some(name)) => {
                if let Some(tier) = self.config.tiers.get(&name) {
                    return tier.clone();
                }
                debug!(identity = %identity_key, tier = %name, "Recorded tier is not configured");
            }
            Ok(None) => {}
            Err(e) => warn!(identity = %identity_key, error = %e, "Tier lookup failed, using default"),
        }

        self.default_tier_for(&identity_key)
    }

    /// Assign a new tier and reset the identity's current window.
    ///
    /// Returns false for unknown tier names or when the assignment cannot be
    /// stored.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn update_user_tier(&self, identity: &Identity, new_tier: &str) -> bool {
        let Some(tier) = self.config.tiers.get(new_tier).cloned() else {
            warn!(tier = new_tier, "Rejected unknown tier");
            return false;
        };

        let previous = self.get_user_tier(identity).await;
        let identity_key = identity.as_key();
        if let Err(e) = self
            .guarded("assign", self.directory.assign(&identity_key, &tier.name))
            .await
        {
            warn!(error = %e, "Failed to store tier assignment");
            return false;
        }

        let now = self.clock.unix_secs();
        for t in [&previous, &tier] {
            let key = self.window_key(identity, t, now);
            if let Err(e) = self.guarded("delete_count", self.store.delete_count(&key)).await {
                warn!(tier = %t.name, error = %e, "Failed to reset window counter");
            }
        }

        info!(from = %previous.name, to = %tier.name, "Tier updated");
        true
    }

    /// Number of window locks currently held or awaited
    pub fn pending_window_locks(&self) -> usize {
        self.window_locks.len()
    }

    fn default_tier_for(&self, identity_key: &str) -> Tier {
        let configured = &self.config.default_tier;
        if let Some(policy) = &self.policy {
            let name = policy.default_tier(identity_key, configured);
            if let Some(tier) = self.config.tiers.get(&name) {
                return tier.clone();
            }
            debug!(tier = %name, "Policy chose an unconfigured tier, using configured default");
        }
        match self.config.tiers.get(configured) {
            Some(tier) => tier.clone(),
            // validate() guarantees the default exists
            None => Tier::new(configured.clone(), 0, 1),
        }
    }

    fn window_key(&self, identity: &Identity, tier: &Tier, now: i64) -> String {
        format!(
            "{}:{}:{}:{}",
            escape_key_component(&self.config.key_prefix),
            escape_key_component(&identity.as_key()),
            escape_key_component(&tier.name),
            tier.window_start(now)
        )
    }

    fn sweep_snapshots(&self, now: i64) {
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % SNAPSHOT_SWEEP_EVERY == 0 {
            self.last_headers.retain(|_, h| h.reset_at > now);
        }
    }

    async fn locked_increment(&self, key: &str, limit: u64, ttl: Duration) -> Result<CounterUpdate> {
        let lock = self
            .window_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;
            self.guarded("increment_below", self.store.increment_below(key, limit, ttl))
                .await
        };

        self.window_locks
            .remove_if(key, |_, m| Arc::strong_count(m) <= 2);
        result
    }

    async fn guarded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = self.config.store_timeout();
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("{}.{}", self.store.name(), operation),
                after_ms: deadline.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("store", &self.store.name())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
