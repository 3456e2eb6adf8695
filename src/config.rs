//! Configuration
//!
//! One YAML document with a section per component. Every field has a
//! default, so an empty file is a valid configuration.
//!
//! ```yaml
//! cache:
//!   default_ttl_secs: 3600
//! rate_limit:
//!   default_tier: foundation
//!   tiers:
//!     - { name: foundation, request_limit: 60, window_secs: 3600 }
//!     - { name: performance, request_limit: 300, window_secs: 3600 }
//! monitor:
//!   sampling_rate: 0.1
//!   channels:
//!     webhook_url: https://ops.example.com/hooks/cache
//! warmer:
//!   warm_groups: [profile, meta, preferences]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::monitor::MonitorConfig;
use crate::rate_limit::RateLimitConfig;
use crate::warmer::WarmerConfig;

/// Intervals for the daemon's periodic jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often `log_stats` runs
    pub stats_interval_secs: u64,
    /// How often `cleanup_old_stats` runs
    pub cleanup_interval_secs: u64,
    /// How often in-memory stores drop expired entries
    pub purge_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 3600,
            cleanup_interval_secs: 86400,
            purge_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub monitor: MonitorConfig,
    pub warmer: WarmerConfig,
    pub scheduler: SchedulerConfig,
}

impl PulseConfig {
    /// Parse YAML. Does not validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file. Does not validate.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_yaml_str(&raw)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.cache.backend_timeout_ms == 0 {
            return Err(Error::Config("cache.backend_timeout_ms must be positive".into()));
        }
        if self.cache.default_group.is_empty() || self.cache.key_prefix.is_empty() {
            return Err(Error::Config(
                "cache.default_group and cache.key_prefix must not be empty".into(),
            ));
        }
        self.rate_limit.validate()?;
        self.monitor.validate()?;
        self.warmer.validate()?;
        let s = &self.scheduler;
        if s.stats_interval_secs == 0
            || s.cleanup_interval_secs == 0
            || s.purge_interval_secs == 0
        {
            return Err(Error::Config("scheduler intervals must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
