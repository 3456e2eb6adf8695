//! Domain Events
//!
//! Cache operations publish [`CacheEvent`]s to registered [`CacheObserver`]s;
//! the monitor is the primary subscriber. Alerts raised by the monitor are
//! also immutable records and live here.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Cache Events
// =============================================================================

/// Something observable happened in the cache service.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A lookup found a value
    Hit { key: String, elapsed: Duration },

    /// A lookup found nothing
    Miss { key: String, elapsed: Duration },

    /// A value was written
    Set {
        key: String,
        size_bytes: u64,
        memory_bytes: Option<u64>,
    },

    /// A value was deleted
    Delete {
        key: String,
        memory_bytes: Option<u64>,
    },
}

impl CacheEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::Set { .. } => "set",
            CacheEvent::Delete { .. } => "delete",
        }
    }

    /// Key the event refers to
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key, .. }
            | CacheEvent::Set { key, .. }
            | CacheEvent::Delete { key, .. } => key,
        }
    }
}

/// Subscriber to cache events.
///
/// Called synchronously on the request path, so implementations must not
/// block or await I/O.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

// =============================================================================
// Alerts
// =============================================================================

/// Alert categories. Cooldowns are tracked per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowHitRate,
    HighMissRate,
    HighMemoryUsage,
    #[serde(rename = "slow_response_time")]
    SlowResponse,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowHitRate => "low_hit_rate",
            AlertKind::HighMissRate => "high_miss_rate",
            AlertKind::HighMemoryUsage => "high_memory_usage",
            AlertKind::SlowResponse => "slow_response_time",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fired (not suppressed) alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub fired_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>, fired_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            fired_at,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let hit = CacheEvent::Hit {
            key: "k".into(),
            elapsed: Duration::from_micros(5),
        };
        assert_eq!(hit.event_type(), "hit");
        assert_eq!(hit.key(), "k");

        let delete = CacheEvent::Delete {
            key: "gone".into(),
            memory_bytes: None,
        };
        assert_eq!(delete.event_type(), "delete");
        assert_eq!(delete.key(), "gone");
    }

    #[test]
    fn test_alert_kind_serializes_as_label() {
        let json = serde_json::to_string(&AlertKind::SlowResponse).unwrap();
        assert_eq!(json, "\"slow_response_time\"");
        assert_eq!(AlertKind::LowHitRate.to_string(), "low_hit_rate");
    }

    #[test]
    fn test_alert_ids_are_unique() {
        let now = Utc::now();
        let a = Alert::new(AlertKind::LowHitRate, "a", now);
        let b = Alert::new(AlertKind::LowHitRate, "a", now);
        assert_ne!(a.id, b.id);
    }
}
