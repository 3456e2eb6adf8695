//! Prometheus export of cache statistics

use prometheus::{Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};

use super::alerts::AlertManager;
use crate::domain::ports::StatsSnapshot;
use crate::error::Result;

/// Gauges mirroring the latest [`StatsSnapshot`], in their own registry.
pub struct StatsExporter {
    registry: Registry,
    hits: IntGauge,
    misses: IntGauge,
    hit_rate: Gauge,
    sets: IntGauge,
    deletes: IntGauge,
    memory_bytes: IntGauge,
    avg_response_ms: Gauge,
    alerts_fired: IntGauge,
    alerts_suppressed: IntGauge,
}

impl StatsExporter {
    /// Register gauges under `namespace`
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let int_gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(namespace))?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let float_gauge = |name: &str, help: &str| -> Result<Gauge> {
            let gauge = Gauge::with_opts(Opts::new(name, help).namespace(namespace))?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(Self {
            hits: int_gauge("cache_hits", "Sampled cache hits")?,
            misses: int_gauge("cache_misses", "Sampled cache misses")?,
            hit_rate: float_gauge("cache_hit_rate", "Sampled hit rate")?,
            sets: int_gauge("cache_sets", "Sampled cache writes")?,
            deletes: int_gauge("cache_deletes", "Sampled cache deletes")?,
            memory_bytes: int_gauge("cache_memory_bytes", "Fast tier memory usage")?,
            avg_response_ms: float_gauge(
                "cache_avg_response_ms",
                "Rolling average cache response time",
            )?,
            alerts_fired: int_gauge("alerts_fired", "Alerts fired since start")?,
            alerts_suppressed: int_gauge(
                "alerts_suppressed",
                "Alerts suppressed by cooldown since start",
            )?,
            registry,
        })
    }

    /// Copy a snapshot into the gauges
    pub fn update(&self, stats: &StatsSnapshot) {
        self.hits.set(clamp(stats.hits));
        self.misses.set(clamp(stats.misses));
        self.hit_rate.set(stats.hit_rate);
        self.sets.set(clamp(stats.sets));
        self.deletes.set(clamp(stats.deletes));
        self.memory_bytes.set(clamp(stats.memory_usage_bytes));
        self.avg_response_ms.set(stats.avg_response_time_ms);
    }

    /// Copy alert counters into the gauges
    pub fn update_alerts(&self, alerts: &AlertManager) {
        self.alerts_fired.set(clamp(alerts.fired_count()));
        self.alerts_suppressed.set(clamp(alerts.suppressed_count()));
    }

    /// Text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn content_type(&self) -> &'static str {
        "text/plain; version=0.0.4"
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// =============================================================================
// Tests
// =============================================================================
