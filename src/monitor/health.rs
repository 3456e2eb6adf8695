//! Health Checks
//!
//! Liveness, readiness and a threshold evaluation of the live cache stats.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::cache_monitor::Thresholds;
use crate::domain::ports::StatsSnapshot;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    /// Threshold crossed, still serving
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status across checks
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Health check manager.
///
/// A threshold crossed is `Degraded`; crossed by a factor of two is
/// `Unhealthy`. Hit and miss rates are only judged after `min_samples`
/// sampled lookups.
pub struct HealthCheck {
    start_time: Instant,
    ready: AtomicBool,
    thresholds: Thresholds,
    min_samples: u64,
}

impl HealthCheck {
    pub fn new(thresholds: Thresholds, min_samples: u64) -> Self {
        Self {
            start_time: Instant::now(),
            ready: AtomicBool::new(false),
            thresholds,
            min_samples,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Readiness plus one check per threshold
    pub fn evaluate(&self, stats: &StatsSnapshot) -> HealthResponse {
        let readiness = if self.is_ready() {
            HealthCheckResult::healthy("readiness")
        } else {
            HealthCheckResult::unhealthy("readiness", "Service not ready")
        };

        let checks = vec![
            readiness,
            self.check_hit_rate(stats),
            self.check_memory(stats),
            self.check_response_time(stats),
        ];
        HealthResponse::new(checks, self.uptime())
    }

    fn check_hit_rate(&self, stats: &StatsSnapshot) -> HealthCheckResult {
        let name = "hit_rate";
        if stats.lookups() < self.min_samples.max(1) {
            return HealthCheckResult::healthy(name);
        }
        let floor = self.thresholds.hit_rate_floor;
        let message = format!("hit rate {:.3} below {:.3}", stats.hit_rate, floor);
        if stats.hit_rate < floor / 2.0 {
            HealthCheckResult::unhealthy(name, message)
        } else if stats.hit_rate < floor {
            HealthCheckResult::degraded(name, message)
        } else {
            HealthCheckResult::healthy(name)
        }
    }

    fn check_memory(&self, stats: &StatsSnapshot) -> HealthCheckResult {
        let name = "memory_usage";
        let ceiling = self.thresholds.memory_usage_ceiling_bytes;
        let used = stats.memory_usage_bytes;
        let message = format!("{} bytes used, ceiling {}", used, ceiling);
        if used > ceiling.saturating_mul(2) {
            HealthCheckResult::unhealthy(name, message)
        } else if used > ceiling {
            HealthCheckResult::degraded(name, message)
        } else {
            HealthCheckResult::healthy(name)
        }
    }

    fn check_response_time(&self, stats: &StatsSnapshot) -> HealthCheckResult {
        let name = "response_time";
        let ceiling = self.thresholds.response_time_ceiling_ms;
        let avg = stats.avg_response_time_ms;
        let message = format!("average {:.1}ms, ceiling {:.1}ms", avg, ceiling);
        if avg > ceiling * 2.0 {
            HealthCheckResult::unhealthy(name, message)
        } else if avg > ceiling {
            HealthCheckResult::degraded(name, message)
        } else {
            HealthCheckResult::healthy(name)
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new(Thresholds::default(), 100)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stats(hits: u64, misses: u64, memory: u64, avg_ms: f64) -> StatsSnapshot {
        let total = hits + misses;
        StatsSnapshot {
            timestamp: Utc::now(),
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            sets: 0,
            deletes: 0,
            memory_usage_bytes: memory,
            avg_response_time_ms: avg_ms,
        }
    }

    fn status_of(response: &HealthResponse, name: &str) -> HealthStatus {
        response
            .checks
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.status)
            .unwrap()
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Unhealthy.is_operational());
        assert_eq!(format!("{}", HealthStatus::Degraded), "Degraded");
    }

    #[test]
    fn test_not_ready_is_unhealthy() {
        let health = HealthCheck::default();
        let response = health.evaluate(&stats(0, 0, 0, 0.0));
        assert_eq!(response.status, HealthStatus::Unhealthy);

        health.set_ready(true);
        assert_eq!(health.evaluate(&stats(0, 0, 0, 0.0)).status, HealthStatus::Healthy);
    }

    #[test]
    fn test_hit_rate_needs_min_samples() {
        let health = HealthCheck::new(Thresholds::default(), 100);
        health.set_ready(true);

        assert_eq!(status_of(&health.evaluate(&stats(0, 50, 0, 0.0)), "hit_rate"), HealthStatus::Healthy);
        assert_eq!(status_of(&health.evaluate(&stats(70, 30, 0, 0.0)), "hit_rate"), HealthStatus::Degraded);
        assert_eq!(status_of(&health.evaluate(&stats(10, 90, 0, 0.0)), "hit_rate"), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_memory_and_latency_grading() {
        let thresholds = Thresholds {
            memory_usage_ceiling_bytes: 100,
            response_time_ceiling_ms: 10.0,
            ..Default::default()
        };
        let health = HealthCheck::new(thresholds, 1);
        health.set_ready(true);

        let response = health.evaluate(&stats(1, 0, 150, 25.0));
        assert_eq!(status_of(&response, "memory_usage"), HealthStatus::Degraded);
        assert_eq!(status_of(&response, "response_time"), HealthStatus::Unhealthy);
        assert_eq!(response.status, HealthStatus::Unhealthy);
    }
}
