//! PulseCache - Cache, Rate Limiting and Monitoring Core
//!
//! The infrastructure layer beneath an athlete-profile API: a fail-soft
//! two-tier cache, a tiered fixed-window rate limiter, a sampling cache
//! monitor with cooldown-limited alerts, and a scheduled cache warmer.
//!
//! # Architecture
//!
//! ```text
//! request handlers ──▶ RateLimiter ──▶ CounterStore
//!        │
//!        ▼
//!   CacheService ──▶ StoreBackend (fast) + StoreBackend (durable)
//!        │  CacheEvent
//!        ▼
//!   CacheMonitor ──▶ AlertDispatcher ──▶ log / admin notice / webhook
//!        ▲
//!   Scheduler ──▶ log_stats, cleanup_old_stats, CacheWarmer::warm_priority_identities
//! ```
//!
//! Every component takes its collaborators as constructor arguments; there
//! is no global state.
//!
//! # Modules
//!
//! - [`adapters`] - In-memory stores, clocks and alert channels implementing domain ports
//! - [`cache`] - Two-tier cache service and key helpers
//! - [`config`] - YAML configuration and validation
//! - [`domain`] - Ports and events
//! - [`error`] - Error types
//! - [`monitor`] - Sampled statistics, alerts, health and Prometheus export
//! - [`rate_limit`] - Tiers, identities and the fixed-window limiter
//! - [`scheduler`] - Named periodic background jobs
//! - [`warmer`] - Proactive cache population

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod rate_limit;
pub mod scheduler;
pub mod warmer;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheKind, CacheService};
pub use config::PulseConfig;
pub use domain::{FailurePolicy, StatsSnapshot};
pub use error::{Error, Result};
pub use monitor::{CacheMonitor, MonitorConfig};
pub use rate_limit::{ClientInfo, Identity, RateLimitConfig, RateLimiter};
pub use scheduler::Scheduler;
pub use warmer::{CacheWarmer, WarmReport, WarmerConfig};
