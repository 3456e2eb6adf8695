//! Stats Store Adapters
//!
//! Implements the `StatsStore` port in memory and as a JSON file, both
//! bounded to a maximum number of snapshots (oldest dropped first).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::ports::{StatsSnapshot, StatsStore};
use crate::error::Result;

/// Default snapshot cap
pub const DEFAULT_MAX_SNAPSHOTS: usize = 1000;

/// In-memory snapshot sequence.
#[derive(Debug)]
pub struct MemoryStatsStore {
    max_snapshots: usize,
    snapshots: RwLock<VecDeque<StatsSnapshot>>,
}

impl MemoryStatsStore {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            max_snapshots: max_snapshots.max(1),
            snapshots: RwLock::new(VecDeque::new()),
        }
    }

    /// Number of retained snapshots
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

impl Default for MemoryStatsStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SNAPSHOTS)
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn append(&self, snapshot: StatsSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write();
        snapshots.push_back(snapshot);
        while snapshots.len() > self.max_snapshots {
            snapshots.pop_front();
        }
        Ok(())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut snapshots = self.snapshots.write();
        let before = snapshots.len();
        snapshots.retain(|s| s.timestamp >= cutoff);
        Ok(before - snapshots.len())
    }

    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<StatsSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect())
    }
}

/// Snapshot sequence persisted as a JSON array on disk.
#[derive(Debug)]
pub struct FileStatsStore {
    path: PathBuf,
    max_snapshots: usize,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStatsStore {
    pub fn new(path: impl AsRef<Path>, max_snapshots: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_snapshots: max_snapshots.max(1),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<StatsSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.is_empty() => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshots: &[StatsSnapshot]) -> Result<()> {
        let raw = serde_json::to_vec(snapshots)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = snapshots.len(), "Stats file written");
        Ok(())
    }
}

#[async_trait]
impl StatsStore for FileStatsStore {
    async fn append(&self, snapshot: StatsSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshots = self.load().await?;
        snapshots.push(snapshot);
        if snapshots.len() > self.max_snapshots {
            let excess = snapshots.len() - self.max_snapshots;
            snapshots.drain(..excess);
        }
        self.save(&snapshots).await
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut snapshots = self.load().await?;
        let before = snapshots.len();
        snapshots.retain(|s| s.timestamp >= cutoff);
        let removed = before - snapshots.len();
        if removed > 0 {
            self.save(&snapshots).await?;
        }
        Ok(removed)
    }

    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<StatsSnapshot>> {
        let mut snapshots = self.load().await?;
        snapshots.retain(|s| s.timestamp >= since);
        Ok(snapshots)
    }
}

// =============================================================================
// Tests
// =============================================================================
