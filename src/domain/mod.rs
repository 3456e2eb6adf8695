//! Domain Layer
//!
//! Ports (trait abstractions for external collaborators) and events (the
//! records components exchange without calling each other directly).
//!
//! - **Ports** (`ports.rs`) - Store, counter, tier, alert, stats and warm-source traits
//! - **Events** (`events.rs`) - Cache events, observer trait, alerts
//!
//! # Usage
//!
//! ```ignore
//! use pulsecache::domain::{CacheObserver, CacheEvent};
//!
//! struct Printer;
//!
//! impl CacheObserver for Printer {
//!     fn on_event(&self, event: &CacheEvent) {
//!         println!("{} {}", event.event_type(), event.key());
//!     }
//! }
//! ```

pub mod events;
pub mod ports;

// Re-export commonly used types
pub use events::{Alert, AlertKind, CacheEvent, CacheObserver};
pub use ports::{
    AlertChannel, CacheKind, Clock, CounterStore, CounterUpdate, FailurePolicy, StatsSnapshot,
    StatsStore, StoreBackend, TierDirectory, TierPolicy, WarmSource,
};
