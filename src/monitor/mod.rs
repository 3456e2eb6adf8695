//! Cache Monitoring
//!
//! Sampled statistics, threshold alerts and exports for the cache service.
//!
//! # Architecture
//!
//! ```text
//! CacheService ──CacheEvent──▶ CacheMonitor ──▶ MonitorAccumulator (atomics)
//!                                   │
//!                                   ├──▶ AlertManager ──queue──▶ AlertDispatcher ──▶ channels
//!                                   │      (cooldown)                (background)
//!                                   └──▶ StatsStore (log_stats / cleanup_old_stats)
//! ```
//!
//! `HealthCheck` and `StatsExporter` read [`CacheMonitor::get_current_stats`]
//! for `/readyz` and `/metrics`.

mod accumulator;
mod alerts;
mod cache_monitor;
mod exporter;
mod health;

pub use crate::domain::ports::StatsSnapshot;
pub use accumulator::{MonitorAccumulator, ResponseTimeRing, Sampler};
pub use alerts::{AlertChannelsConfig, AlertDispatcher, AlertManager};
pub use cache_monitor::{CacheMonitor, MonitorConfig, Thresholds};
pub use exporter::StatsExporter;
pub use health::{HealthCheck, HealthCheckResult, HealthResponse, HealthStatus};
