//! Rate-limit tiers

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named request quota per fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub request_limit: u64,
    pub window_secs: u64,
}

impl Tier {
    pub fn new(name: impl Into<String>, request_limit: u64, window_secs: u64) -> Self {
        Self {
            name: name.into(),
            request_limit,
            window_secs,
        }
    }

    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Start of the window containing `now` (unix seconds)
    pub fn window_start(&self, now: i64) -> i64 {
        let size = self.window_secs.max(1) as i64;
        now.div_euclid(size) * size
    }

    /// First second after the window containing `now`
    pub fn window_end(&self, now: i64) -> i64 {
        self.window_start(now) + self.window_secs.max(1) as i64
    }
}

/// The configured set of tiers, in ascending quota order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierTable {
    tiers: Vec<Tier>,
}

impl TierTable {
    /// Build and validate a table
    pub fn new(tiers: Vec<Tier>) -> Result<Self> {
        let table = Self { tiers };
        table.validate()?;
        Ok(table)
    }

    /// Check names are unique, quotas non-zero and strictly increasing
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(Error::Config("at least one rate-limit tier is required".into()));
        }

        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.name.trim().is_empty() {
                return Err(Error::InvalidTier("tier name must not be empty".into()));
            }
            if tier.request_limit == 0 || tier.window_secs == 0 {
                return Err(Error::InvalidTier(format!(
                    "{}: request_limit and window_secs must be positive",
                    tier.name
                )));
            }
            if self.tiers[..i].iter().any(|t| t.name == tier.name) {
                return Err(Error::InvalidTier(format!("duplicate tier {}", tier.name)));
            }
            if i > 0 && tier.request_limit <= self.tiers[i - 1].request_limit {
                return Err(Error::InvalidTier(format!(
                    "{}: limit {} must exceed {} of {}",
                    tier.name,
                    tier.request_limit,
                    self.tiers[i - 1].request_limit,
                    self.tiers[i - 1].name
                )));
            }
        }
        Ok(())
    }

    /// Look up a tier by name
    pub fn get(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                Tier::new("foundation", 60, 3600),
                Tier::new("performance", 300, 3600),
                Tier::new("transformation", 1000, 3600),
            ],
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
