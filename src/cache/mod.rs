//! Two-Tier Cache Service
//!
//! Fail-soft caching over a fast tier and a durable tier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CacheService                           │
//! │   get / set / delete / remember / clear_group / invalidate    │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │  Fast tier (StoreBackend)    │  Durable tier (StoreBackend)  │
//! │  read first                  │  read on fast-tier miss       │
//! └──────────────────────────────┴───────────────────────────────┘
//!                 │
//!                 ▼ CacheEvent (hit / miss / set / delete)
//!          CacheObserver subscribers (CacheMonitor)
//! ```
//!
//! # Guarantees
//!
//! - Storage errors never reach `get`/`set`/`delete` callers
//! - Every backend call carries a timeout
//! - `remember` is unlocked; `remember_coalesced` runs one producer per key

mod keys;
mod service;

pub use crate::domain::ports::CacheKind;
pub(crate) use keys::escape as escape_key_component;
pub use keys::{resource_key, user_key};
pub use service::{CacheConfig, CacheService};
