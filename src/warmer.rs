//! Cache Warmer
//!
//! Populates per-identity cache entries ahead of demand through
//! [`CacheService::remember_in`](crate::cache::CacheService::remember_in),
//! the same miss path request handlers use. The warmer keeps no schedule of
//! its own; see [`crate::scheduler`].

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheService;
use crate::domain::ports::{CacheKind, Clock, WarmSource};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Cache warmer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmerConfig {
    pub enabled: bool,
    /// Cache kind labels warmed per identity
    pub warm_groups: Vec<String>,
    /// Cap on identities warmed per scheduled run
    pub max_identities_per_run: usize,
    /// Identities active within this many seconds count as priority
    pub active_within_secs: u64,
    /// Interval between scheduled runs
    pub interval_secs: u64,
    /// Warm an identity as soon as it logs in
    pub warm_on_login: bool,
    /// TTL for warmed entries; the cache default when unset
    pub ttl_secs: Option<u64>,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warm_groups: vec!["profile".into(), "meta".into(), "preferences".into()],
            max_identities_per_run: 50,
            active_within_secs: 86400,
            interval_secs: 3600,
            warm_on_login: true,
            ttl_secs: None,
        }
    }
}

impl WarmerConfig {
    pub fn validate(&self) -> Result<()> {
        for label in &self.warm_groups {
            label.parse::<CacheKind>().map_err(|_| {
                Error::Config(format!("warmer.warm_groups: unknown cache kind {}", label))
            })?;
        }
        if self.max_identities_per_run == 0 {
            return Err(Error::Config("warmer.max_identities_per_run must be positive".into()));
        }
        if self.interval_secs == 0 {
            return Err(Error::Config("warmer.interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// Warm Report
// =============================================================================

/// Outcome counts for one warming pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmReport {
    /// Identities processed
    pub identities: usize,
    /// Entries held by the cache after the pass
    pub warmed: usize,
    /// Entries whose producer or cache write failed
    pub failed: usize,
    /// Labels that are not known cache kinds
    pub skipped: usize,
}

impl AddAssign for WarmReport {
    fn add_assign(&mut self, other: Self) {
        self.identities += other.identities;
        self.warmed += other.warmed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

// =============================================================================
// Cache Warmer
// =============================================================================

/// Proactive cache population for priority identities.
pub struct CacheWarmer {
    config: WarmerConfig,
    cache: Arc<CacheService>,
    source: Arc<dyn WarmSource>,
    clock: Arc<dyn Clock>,
}

impl CacheWarmer {
    pub fn new(
        config: WarmerConfig,
        cache: Arc<CacheService>,
        source: Arc<dyn WarmSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cache,
            source,
            clock,
        }
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    /// Warm every configured group for one identity
    pub async fn warm_identity(&self, identity: &str) -> WarmReport {
        self.warm_kinds(identity, &self.config.warm_groups).await
    }

    /// Warm the given kind labels for one identity.
    ///
    /// Unknown labels are skipped and each kind is independent of the others.
    #[instrument(skip(self, kinds))]
    pub async fn warm_kinds<S: AsRef<str>>(&self, identity: &str, kinds: &[S]) -> WarmReport {
        let mut report = WarmReport {
            identities: 1,
            ..Default::default()
        };
        let group = self.cache.config().default_group.clone();

        for label in kinds {
            let label = label.as_ref();
            let kind = match label.parse::<CacheKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(identity, error = %e, "Skipping unknown cache kind");
                    report.skipped += 1;
                    continue;
                }
            };

            let key = self.cache.user_key(identity, kind);
            let source = &self.source;
            let result: Result<(serde_json::Value, bool)> = self
                .cache
                .remember_stored_in(&group, &key, self.config.ttl(), || {
                    source.load(identity, kind)
                })
                .await;

            match result {
                Ok((_, true)) => report.warmed += 1,
                Ok((_, false)) => {
                    warn!(identity, kind = %kind, "Warmed value was not cached");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(identity, kind = %kind, error = %e, "Failed to warm cache entry");
                    report.failed += 1;
                }
            }
        }

        debug!(identity, ?report, "Identity warmed");
        report
    }

    /// Warm recently active identities, up to the per-run cap
    #[instrument(skip(self))]
    pub async fn warm_priority_identities(&self) -> WarmReport {
        let mut report = WarmReport::default();
        if !self.config.enabled {
            debug!("Cache warming disabled");
            return report;
        }

        let window = chrono::Duration::seconds(self.config.active_within_secs.min(i32::MAX as u64) as i64);
        let active_since = self.clock.now() - window;
        let limit = self.config.max_identities_per_run;

        let identities = match self.source.priority_identities(active_since, limit).await {
            Ok(identities) => identities,
            Err(e) => {
                warn!(error = %e, "Failed to list priority identities");
                return report;
            }
        };

        for identity in identities.iter().take(limit) {
            report += self.warm_identity(identity).await;
        }

        info!(
            identities = report.identities,
            warmed = report.warmed,
            failed = report.failed,
            skipped = report.skipped,
            "Cache warming run complete"
        );
        report
    }

    /// Login hook. Returns `None` when login warming is off.
    pub async fn on_login(&self, identity: &str) -> Option<WarmReport> {
        if !(self.config.enabled && self.config.warm_on_login) {
            return None;
        }
        Some(self.warm_identity(identity).await)
    }
}

impl std::fmt::Debug for CacheWarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
