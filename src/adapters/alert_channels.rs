//! Alert Channel Adapters
//!
//! Implements the `AlertChannel` port for the tracing log, an outbound HTTP
//! webhook, and an admin-visible notice list. `CollectingChannel` records
//! deliveries in memory for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::events::Alert;
use crate::domain::ports::AlertChannel;
use crate::error::{Error, Result};

// =============================================================================
// Log
// =============================================================================

/// Writes alerts to the tracing log at `warn` level.
#[derive(Debug, Clone, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        warn!(
            alert_id = %alert.id,
            alert_type = %alert.kind,
            fired_at = %alert.fired_at,
            "Cache alert: {}",
            alert.message
        );
        Ok(())
    }
}

// =============================================================================
// Webhook
// =============================================================================

/// Posts alerts as JSON to an HTTP endpoint.
pub struct WebhookChannel {
    http_client: Client,
    url: String,
}

impl WebhookChannel {
    /// Create a webhook channel with a per-request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(alert: &Alert) -> serde_json::Value {
        json!({
            "alert_id": alert.id,
            "alert_type": alert.kind,
            "message": alert.message,
            "timestamp": alert.fired_at.to_rfc3339(),
        })
    }
}

impl std::fmt::Debug for WebhookChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookChannel")
            .field("url", &self.url)
            .finish()
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&Self::payload(alert))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::AlertChannel {
                channel: "webhook".to_string(),
                reason: format!("endpoint returned {}", status),
            });
        }

        debug!(url = %self.url, alert_type = %alert.kind, "Webhook alert delivered");
        Ok(())
    }
}

// =============================================================================
// Admin Notices
// =============================================================================

/// An alert surfaced to administrators until dismissed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminNotice {
    pub alert_id: Uuid,
    pub alert_type: String,
    pub message: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Keeps the most recent alerts for an admin-facing surface.
#[derive(Debug)]
pub struct AdminNoticeChannel {
    capacity: usize,
    notices: RwLock<VecDeque<AdminNotice>>,
}

impl AdminNoticeChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            notices: RwLock::new(VecDeque::new()),
        }
    }

    /// Pending notices, oldest first
    pub fn notices(&self) -> Vec<AdminNotice> {
        self.notices.read().iter().cloned().collect()
    }

    /// Dismiss one notice. Returns whether it was present.
    pub fn dismiss(&self, alert_id: Uuid) -> bool {
        let mut notices = self.notices.write();
        let before = notices.len();
        notices.retain(|n| n.alert_id != alert_id);
        notices.len() != before
    }

    /// Dismiss everything
    pub fn clear(&self) {
        self.notices.write().clear();
    }
}

impl Default for AdminNoticeChannel {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait]
impl AlertChannel for AdminNoticeChannel {
    fn name(&self) -> &str {
        "admin_notice"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let notice = AdminNotice {
            alert_id: alert.id,
            alert_type: alert.kind.to_string(),
            message: alert.message.clone(),
            created_at: alert.fired_at,
        };

        let mut notices = self.notices.write();
        notices.push_back(notice);
        while notices.len() > self.capacity {
            notices.pop_front();
        }
        Ok(())
    }
}

// =============================================================================
// Collector (testing)
// =============================================================================

/// Records delivered alerts in memory. Can be switched to fail every send.
#[derive(Debug, Default)]
pub struct CollectingChannel {
    alerts: RwLock<Vec<Alert>>,
    failing: AtomicBool,
}

impl CollectingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel whose every delivery fails
    pub fn failing() -> Self {
        let channel = Self::default();
        channel.failing.store(true, Ordering::Relaxed);
        channel
    }

    /// Delivered alerts
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Number of delivered alerts
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }
}

#[async_trait]
impl AlertChannel for CollectingChannel {
    fn name(&self) -> &str {
        "collector"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::AlertChannel {
                channel: "collector".to_string(),
                reason: "configured to fail".to_string(),
            });
        }
        self.alerts.write().push(alert.clone());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
