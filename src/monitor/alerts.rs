//! Alerting
//!
//! [`AlertManager`] decides whether an alert fires (per-kind cooldown) and
//! enqueues it without awaiting. [`AlertDispatcher`] drains the queue in the
//! background and delivers to every configured channel; a failing channel
//! does not stop delivery to the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{AdminNoticeChannel, LogChannel, WebhookChannel};
use crate::domain::events::{Alert, AlertKind};
use crate::domain::ports::{AlertChannel, Clock};
use crate::error::{Error, Result};

// =============================================================================
// Channel Configuration
// =============================================================================

/// Which alert channels are enabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertChannelsConfig {
    pub log: bool,
    pub admin_notice: bool,
    pub webhook_url: Option<String>,
    pub webhook_timeout_ms: u64,
}

impl Default for AlertChannelsConfig {
    fn default() -> Self {
        Self {
            log: true,
            admin_notice: true,
            webhook_url: None,
            webhook_timeout_ms: 5000,
        }
    }
}

impl AlertChannelsConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "monitor.channels.webhook_url must be an http(s) URL, got {}",
                    url
                )));
            }
            if self.webhook_timeout_ms == 0 {
                return Err(Error::Config(
                    "monitor.channels.webhook_timeout_ms must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Build the enabled channels. `admin_notices` is shared with whatever
    /// surface displays them.
    pub fn build(&self, admin_notices: &Arc<AdminNoticeChannel>) -> Result<Vec<Arc<dyn AlertChannel>>> {
        let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
        if self.log {
            channels.push(Arc::new(LogChannel));
        }
        if self.admin_notice {
            channels.push(admin_notices.clone());
        }
        if let Some(url) = &self.webhook_url {
            let timeout = Duration::from_millis(self.webhook_timeout_ms);
            channels.push(Arc::new(WebhookChannel::new(url.clone(), timeout)?));
        }
        Ok(channels)
    }
}

// =============================================================================
// Alert Manager
// =============================================================================

/// Cooldown bookkeeping and non-blocking enqueue.
pub struct AlertManager {
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    last_fired: DashMap<AlertKind, DateTime<Utc>>,
    queue: mpsc::Sender<Alert>,
    fired: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
}

impl AlertManager {
    /// Create a manager and the receiving end of its queue
    pub fn new(
        cooldown: Duration,
        clock: Arc<dyn Clock>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let manager = Self {
            cooldown,
            clock,
            last_fired: DashMap::new(),
            queue: tx,
            fired: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (manager, rx)
    }

    /// Fire an alert unless one of the same kind fired within the cooldown.
    ///
    /// Returns whether the alert fired.
    pub fn trigger(&self, kind: AlertKind, message: impl Into<String>) -> bool {
        let now = self.clock.now();
        let cooldown_ms = self.cooldown.as_millis() as i64;

        match self.last_fired.entry(kind) {
            Entry::Occupied(mut last) => {
                if (now - *last.get()).num_milliseconds() < cooldown_ms {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    debug!(alert_type = %kind, "Alert suppressed by cooldown");
                    return false;
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        let alert = Alert::new(kind, message, now);
        self.fired.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.queue.try_send(alert) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(alert_type = %kind, error = %e, "Alert queue unavailable, alert dropped");
        }
        true
    }

    /// When `kind` last fired
    pub fn last_fired(&self, kind: AlertKind) -> Option<DateTime<Utc>> {
        self.last_fired.get(&kind).map(|t| *t)
    }

    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("cooldown", &self.cooldown)
            .field("fired", &self.fired_count())
            .field("suppressed", &self.suppressed_count())
            .finish()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Delivers queued alerts to channels.
pub struct AlertDispatcher {
    receiver: mpsc::Receiver<Alert>,
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    pub fn new(receiver: mpsc::Receiver<Alert>, channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self { receiver, channels }
    }

    /// Deliver one alert to every channel concurrently. Returns successful
    /// deliveries.
    pub async fn dispatch(&self, alert: &Alert) -> usize {
        let results = join_all(self.channels.iter().map(|c| c.send(alert))).await;

        let mut delivered = 0;
        for (channel, result) in self.channels.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    channel = channel.name(),
                    alert_type = %alert.kind,
                    error = %e,
                    "Alert channel failed"
                ),
            }
        }
        delivered
    }

    /// Deliver everything currently queued. Returns the number of alerts.
    pub async fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(alert) = self.receiver.try_recv() {
            self.dispatch(&alert).await;
            count += 1;
        }
        count
    }

    /// Deliver alerts until cancelled, then flush what is left.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(channels = self.channels.len(), "Alert dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(alert) => {
                        self.dispatch(&alert).await;
                    }
                    None => break,
                },
            }
        }

        let flushed = self.drain().await;
        info!(flushed, "Alert dispatcher stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CollectingChannel, ManualClock};

    fn manager(cooldown_secs: u64) -> (Arc<ManualClock>, AlertManager, mpsc::Receiver<Alert>) {
        let clock = Arc::new(ManualClock::at_unix(1_000));
        let (manager, rx) = AlertManager::new(Duration::from_secs(cooldown_secs), clock.clone(), 16);
        (clock, manager, rx)
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat() {
        let (clock, manager, rx) = manager(3600);
        let collector = Arc::new(CollectingChannel::new());
        let mut dispatcher = AlertDispatcher::new(rx, vec![collector.clone()]);

        assert!(manager.trigger(AlertKind::LowHitRate, "first"));
        assert!(!manager.trigger(AlertKind::LowHitRate, "second"));
        dispatcher.drain().await;
        assert_eq!(collector.len(), 1);

        clock.advance(Duration::from_secs(3600));
        assert!(manager.trigger(AlertKind::LowHitRate, "third"));
        dispatcher.drain().await;
        assert_eq!(collector.len(), 2);
        assert_eq!(manager.suppressed_count(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_is_per_kind() {
        let (_, manager, _rx) = manager(3600);
        assert!(manager.trigger(AlertKind::LowHitRate, "a"));
        assert!(manager.trigger(AlertKind::HighMissRate, "b"));
        assert!(manager.last_fired(AlertKind::SlowResponse).is_none());
    }

    #[tokio::test]
    async fn test_failing_channel_is_isolated() {
        let (_, manager, rx) = manager(60);
        let failing = Arc::new(CollectingChannel::failing());
        let working = Arc::new(CollectingChannel::new());
        let mut dispatcher = AlertDispatcher::new(rx, vec![failing.clone(), working.clone()]);

        manager.trigger(AlertKind::HighMemoryUsage, "memory");
        assert_eq!(dispatcher.drain().await, 1);
        assert!(failing.is_empty());
        assert_eq!(working.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let (manager, _rx) = AlertManager::new(Duration::ZERO, clock, 1);

        assert!(manager.trigger(AlertKind::SlowResponse, "1"));
        assert!(manager.trigger(AlertKind::SlowResponse, "2"));
        assert_eq!(manager.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_run_flushes_on_cancel() {
        let (_, manager, rx) = manager(0);
        let collector = Arc::new(CollectingChannel::new());
        let dispatcher = AlertDispatcher::new(rx, vec![collector.clone()]);
        let cancel = CancellationToken::new();

        manager.trigger(AlertKind::LowHitRate, "x");
        manager.trigger(AlertKind::HighMissRate, "y");
        cancel.cancel();
        dispatcher.run(cancel).await;

        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn test_channel_config_builds_enabled_channels() {
        let admin = Arc::new(AdminNoticeChannel::default());
        let channels = AlertChannelsConfig::default().build(&admin).unwrap();
        let names: Vec<_> = channels.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["log", "admin_notice"]);

        let bad = AlertChannelsConfig {
            webhook_url: Some("ftp://example".into()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
