//! In-memory [`WarmSource`]
//!
//! Holds authoritative values and last-activity times in memory. The daemon
//! seeds it from a JSON file and records activity on login:
//!
//! ```json
//! [
//!   { "id": "7", "last_active": "2026-10-16T08:00:00Z",
//!     "values": { "profile": { "name": "Sam" }, "meta": {} } }
//! ]
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::info;

use crate::domain::ports::{CacheKind, WarmSource};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct SeedIdentity {
    id: String,
    #[serde(default)]
    last_active: Option<DateTime<Utc>>,
    #[serde(default)]
    values: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default)]
pub struct MemoryWarmSource {
    values: DashMap<(String, CacheKind), serde_json::Value>,
    activity: DashMap<String, DateTime<Utc>>,
}

impl MemoryWarmSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authoritative value for one identity and kind
    pub fn insert(&self, identity: impl Into<String>, kind: CacheKind, value: serde_json::Value) {
        self.values.insert((identity.into(), kind), value);
    }

    /// Load identities from a JSON seed document. Identities without
    /// `last_active` count as active at `now`. Returns the identities loaded.
    pub fn load_seed(&self, json: &str, now: DateTime<Utc>) -> Result<usize> {
        let seed: Vec<SeedIdentity> = serde_json::from_str(json)?;
        // Validate every kind before touching the store
        let mut parsed = Vec::with_capacity(seed.len());
        for identity in seed {
            let mut values = Vec::with_capacity(identity.values.len());
            for (label, value) in identity.values {
                values.push((label.parse::<CacheKind>()?, value));
            }
            parsed.push((identity.id, identity.last_active.unwrap_or(now), values));
        }

        let count = parsed.len();
        for (id, at, values) in parsed {
            for (kind, value) in values {
                self.insert(id.clone(), kind, value);
            }
            self.record_activity(id, at);
        }
        Ok(count)
    }

    /// Build a source from a seed file
    pub fn from_seed_file(path: impl AsRef<Path>, now: DateTime<Utc>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let source = Self::new();
        let count = source.load_seed(&raw, now)?;
        info!(path = %path.display(), identities = count, "Loaded warm seed");
        Ok(source)
    }

    /// Record that an identity was active at `at`
    pub fn record_activity(&self, identity: impl Into<String>, at: DateTime<Utc>) {
        self.activity
            .entry(identity.into())
            .and_modify(|last| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert(at);
    }
}

#[async_trait]
impl WarmSource for MemoryWarmSource {
    /// Most recently active first
    async fn priority_identities(
        &self,
        active_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut active: Vec<(String, DateTime<Utc>)> = self
            .activity
            .iter()
            .filter(|e| *e.value() >= active_since)
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        active.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(active.into_iter().take(limit).map(|(id, _)| id).collect())
    }

    async fn load(&self, identity: &str, kind: CacheKind) -> Result<serde_json::Value> {
        self.values
            .get(&(identity.to_string(), kind))
            .map(|v| v.clone())
            .ok_or_else(|| Error::backend("memory_warm_source", format!("no {} for {}", kind, identity)))
    }
}

// =============================================================================
// Tests
// =============================================================================
