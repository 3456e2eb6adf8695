//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern. Production deployments replace the
//! in-memory stores with their own durable backends; the alert channels are
//! usable as-is.
//!
//! # Usage
//!
//! ```ignore
//! use pulsecache::adapters::{MemoryStore, WebhookChannel};
//!
//! let fast = Arc::new(MemoryStore::new("fast"));
//! let durable = Arc::new(MemoryStore::new("durable"));
//! let cache = CacheService::new(config, fast, durable);
//! ```

mod alert_channels;
mod clock;
mod memory;
mod stats_store;
mod warm_source;

pub use alert_channels::{
    AdminNotice, AdminNoticeChannel, CollectingChannel, LogChannel, WebhookChannel,
};
pub use clock::{ManualClock, SystemClock};
pub use memory::{MemoryStore, MemoryTierDirectory};
pub use stats_store::{FileStatsStore, MemoryStatsStore, DEFAULT_MAX_SNAPSHOTS};
pub use warm_source::MemoryWarmSource;
