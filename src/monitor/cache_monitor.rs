//! Cache Monitor
//!
//! Subscribes to cache events, keeps sampled statistics and raises alerts
//! when thresholds are crossed. Event handlers only touch atomics and the
//! alert queue, so they are safe to call on every cache access.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::accumulator::{MonitorAccumulator, Sampler};
use super::alerts::{AlertChannelsConfig, AlertDispatcher, AlertManager};
use crate::domain::events::{AlertKind, CacheEvent, CacheObserver};
use crate::domain::ports::{AlertChannel, Clock, StatsSnapshot, StatsStore};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Alert when the hit rate drops below this
    pub hit_rate_floor: f64,
    /// Alert when the miss rate exceeds this
    pub miss_rate_ceiling: f64,
    /// Alert when the fast tier holds more than this
    pub memory_usage_ceiling_bytes: u64,
    /// Alert when a response takes longer than this
    pub response_time_ceiling_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            hit_rate_floor: 0.80,
            miss_rate_ceiling: 0.30,
            memory_usage_ceiling_bytes: 256 * 1024 * 1024,
            response_time_ceiling_ms: 100.0,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Fraction of events recorded (0.0 - 1.0)
    pub sampling_rate: f64,
    /// Sampled lookups required before hit/miss thresholds are checked
    pub min_samples: u64,
    /// Capacity of the response time ring
    pub response_buffer_size: usize,
    pub thresholds: Thresholds,
    /// Minimum time between two alerts of the same kind
    pub alert_cooldown_secs: u64,
    /// Snapshots older than this are pruned
    pub stats_retention_secs: u64,
    /// Upper bound on retained snapshots
    pub max_snapshots: usize,
    /// Alerts buffered between the hot path and the dispatcher
    pub alert_queue_capacity: usize,
    pub channels: AlertChannelsConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 0.1,
            min_samples: 100,
            response_buffer_size: 1000,
            thresholds: Thresholds::default(),
            alert_cooldown_secs: 3600,
            stats_retention_secs: 7 * 24 * 3600,
            max_snapshots: 1000,
            alert_queue_capacity: 256,
            channels: AlertChannelsConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(Error::Config(format!(
                "monitor.sampling_rate must be within [0, 1], got {}",
                self.sampling_rate
            )));
        }
        let t = &self.thresholds;
        if !(0.0..=1.0).contains(&t.hit_rate_floor) || !(0.0..=1.0).contains(&t.miss_rate_ceiling) {
            return Err(Error::Config(
                "monitor hit/miss rate thresholds must be within [0, 1]".into(),
            ));
        }
        if !t.response_time_ceiling_ms.is_finite() || t.response_time_ceiling_ms <= 0.0 {
            return Err(Error::Config(
                "monitor.thresholds.response_time_ceiling_ms must be positive".into(),
            ));
        }
        if self.response_buffer_size == 0 || self.max_snapshots == 0 || self.alert_queue_capacity == 0
        {
            return Err(Error::Config(
                "monitor buffer sizes must be positive".into(),
            ));
        }
        if self.stats_retention_secs == 0 {
            return Err(Error::Config("monitor.stats_retention_secs must be positive".into()));
        }
        self.channels.validate()
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn stats_retention(&self) -> Duration {
        Duration::from_secs(self.stats_retention_secs)
    }
}

// =============================================================================
// Cache Monitor
// =============================================================================

/// Sampling cache monitor with cooldown-limited alerting.
pub struct CacheMonitor {
    config: MonitorConfig,
    sampler: Sampler,
    accumulator: MonitorAccumulator,
    alerts: AlertManager,
    stats_store: Arc<dyn StatsStore>,
    clock: Arc<dyn Clock>,
}

impl CacheMonitor {
    /// Create a monitor and the dispatcher that delivers its alerts to
    /// `channels`. The dispatcher must be driven (`run` or `drain`) for
    /// alerts to leave the queue.
    pub fn new(
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
        stats_store: Arc<dyn StatsStore>,
        channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Result<(Self, AlertDispatcher)> {
        config.validate()?;

        let (alerts, receiver) = AlertManager::new(
            config.alert_cooldown(),
            clock.clone(),
            config.alert_queue_capacity,
        );
        let monitor = Self {
            sampler: Sampler::new(config.sampling_rate),
            accumulator: MonitorAccumulator::new(config.response_buffer_size),
            alerts,
            stats_store,
            clock,
            config,
        };
        Ok((monitor, AlertDispatcher::new(receiver, channels)))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn alert_manager(&self) -> &AlertManager {
        &self.alerts
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    /// Sampled hit with the lookup's duration
    pub fn on_hit(&self, elapsed: Duration) {
        if !self.sampler.sample() {
            return;
        }
        self.accumulator.record_hit();
        self.record_response_time(duration_ms(elapsed));
        self.check_thresholds();
    }

    /// Sampled miss with the lookup's duration
    pub fn on_miss(&self, elapsed: Duration) {
        if !self.sampler.sample() {
            return;
        }
        self.accumulator.record_miss();
        self.record_response_time(duration_ms(elapsed));
        self.check_thresholds();
    }

    /// Sampled write. `memory_bytes` is the fast tier's usage if known.
    pub fn on_set(&self, key: &str, size_bytes: u64, memory_bytes: Option<u64>) {
        if !self.sampler.sample() {
            return;
        }
        self.accumulator.record_set();
        if let Some(bytes) = memory_bytes {
            self.accumulator.set_memory_usage(bytes);
        }
        tracing::trace!(key, size_bytes, "Sampled cache set");
        self.check_memory_usage();
    }

    /// Sampled delete
    pub fn on_delete(&self, memory_bytes: Option<u64>) {
        if !self.sampler.sample() {
            return;
        }
        self.accumulator.record_delete();
        if let Some(bytes) = memory_bytes {
            self.accumulator.set_memory_usage(bytes);
        }
        self.check_memory_usage();
    }

    /// Add a response time to the rolling window and check it
    pub fn record_response_time(&self, duration_ms: f64) {
        self.accumulator.record_response_time(duration_ms);
        self.check_response_time(duration_ms);
    }

    // =========================================================================
    // Threshold checks
    // =========================================================================

    /// Compare hit and miss rates once enough lookups were sampled
    pub fn check_thresholds(&self) {
        let hits = self.accumulator.hits();
        let misses = self.accumulator.misses();
        let total = hits + misses;
        if total == 0 || total < self.config.min_samples {
            return;
        }

        let hit_rate = hits as f64 / total as f64;
        let miss_rate = misses as f64 / total as f64;
        let t = &self.config.thresholds;

        if hit_rate < t.hit_rate_floor {
            self.trigger_alert(
                AlertKind::LowHitRate,
                format!(
                    "Cache hit rate {:.2}% is below {:.2}% over {} lookups",
                    hit_rate * 100.0,
                    t.hit_rate_floor * 100.0,
                    total
                ),
            );
        }
        if miss_rate > t.miss_rate_ceiling {
            self.trigger_alert(
                AlertKind::HighMissRate,
                format!(
                    "Cache miss rate {:.2}% exceeds {:.2}% over {} lookups",
                    miss_rate * 100.0,
                    t.miss_rate_ceiling * 100.0,
                    total
                ),
            );
        }
    }

    /// Compare the last known fast-tier memory usage with its ceiling
    pub fn check_memory_usage(&self) {
        let used = self.accumulator.memory_usage();
        let ceiling = self.config.thresholds.memory_usage_ceiling_bytes;
        if used > ceiling {
            self.trigger_alert(
                AlertKind::HighMemoryUsage,
                format!("Cache memory usage {} bytes exceeds {} bytes", used, ceiling),
            );
        }
    }

    /// Compare one response time with its ceiling
    pub fn check_response_time(&self, duration_ms: f64) {
        let ceiling = self.config.thresholds.response_time_ceiling_ms;
        if duration_ms.is_finite() && duration_ms > ceiling {
            self.trigger_alert(
                AlertKind::SlowResponse,
                format!(
                    "Cache response took {:.1}ms, above {:.1}ms",
                    duration_ms, ceiling
                ),
            );
        }
    }

    /// Fire an alert subject to the per-kind cooldown. Returns whether it fired.
    pub fn trigger_alert(&self, kind: AlertKind, message: impl Into<String>) -> bool {
        self.alerts.trigger(kind, message)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Live projection of the accumulator
    pub fn get_current_stats(&self) -> StatsSnapshot {
        self.accumulator.snapshot(self.clock.now())
    }

    /// Append the current snapshot to the retained sequence
    #[instrument(skip(self))]
    pub async fn log_stats(&self) -> Result<StatsSnapshot> {
        let snapshot = self.get_current_stats();
        self.stats_store.append(snapshot.clone()).await?;
        info!(
            hits = snapshot.hits,
            misses = snapshot.misses,
            hit_rate = snapshot.hit_rate,
            memory_bytes = snapshot.memory_usage_bytes,
            avg_response_ms = snapshot.avg_response_time_ms,
            "Cache stats recorded"
        );
        Ok(snapshot)
    }

    /// Drop snapshots older than the retention period
    #[instrument(skip(self))]
    pub async fn cleanup_old_stats(&self) -> Result<usize> {
        let cutoff = self.retention_cutoff();
        let removed = self.stats_store.prune_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "Pruned old cache stats");
        } else {
            debug!(%cutoff, "No cache stats to prune");
        }
        Ok(removed)
    }

    /// Retained snapshots at or after `since`
    pub async fn stats_history(&self, since: DateTime<Utc>) -> Result<Vec<StatsSnapshot>> {
        self.stats_store.since(since).await
    }

    fn retention_cutoff(&self) -> DateTime<Utc> {
        // Capped at a century to stay inside chrono's range
        let secs = self.config.stats_retention_secs.min(100 * 365 * 24 * 3600) as i64;
        let now = self.clock.now();
        now.checked_sub_signed(chrono::Duration::seconds(secs)).unwrap_or_else(|| {
            warn!("Retention period exceeds representable time, keeping everything");
            DateTime::<Utc>::MIN_UTC
        })
    }
}

impl CacheObserver for CacheMonitor {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Hit { elapsed, .. } => self.on_hit(*elapsed),
            CacheEvent::Miss { elapsed, .. } => self.on_miss(*elapsed),
            CacheEvent::Set {
                key,
                size_bytes,
                memory_bytes,
            } => self.on_set(key, *size_bytes, *memory_bytes),
            CacheEvent::Delete { memory_bytes, .. } => self.on_delete(*memory_bytes),
        }
    }
}

impl std::fmt::Debug for CacheMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMonitor")
            .field("config", &self.config)
            .field("alerts", &self.alerts)
            .finish()
    }
}

fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

// =============================================================================
// Tests
// =============================================================================
