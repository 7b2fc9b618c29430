//! # Notification Broker
//!
//! Process-wide alerting state: decides whether a failure warrants a live
//! alert (cooldown logic), retains a bounded set of pending notifications,
//! and exposes acknowledgment.
//!
//! Cooldown state is deliberately independent of the dedup store's
//! window: the cooldown governs alert noise (keyed by category+message),
//! the window governs historical grouping (keyed by the full
//! fingerprint). The broker is constructed explicitly and owned by
//! whatever serves the ingest/stream endpoints; it holds no global state
//! and its contents are lost on restart by design.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::stream::{encode_frame, AckTarget, StreamFrame, StreamHandle, SubscriberRegistry};
use crate::types::{AdminNotification, Classification, Severity};

/// Broker tuning knobs
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Suppression window per cooldown key
    pub cooldown: Duration,
    /// Maximum pending notifications retained, oldest evicted first
    pub retention_cap: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5 * 60),
            retention_cap: 100,
        }
    }
}

impl From<&MonitorConfig> for BrokerConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            cooldown: config.cooldown,
            retention_cap: config.retention_cap,
        }
    }
}

struct BrokerInner {
    pending: VecDeque<AdminNotification>,
    /// cooldown key -> last alerted at
    cooldowns: HashMap<String, DateTime<Utc>>,
}

/// Singleton-by-convention broker instance.
///
/// All check-then-act sequences (cooldown check, retention trim, replay
/// snapshot) run under one mutex, and the registry's own lock makes each
/// broadcast atomic with respect to attach/detach.
pub struct NotificationBroker {
    config: BrokerConfig,
    inner: Mutex<BrokerInner>,
    registry: Arc<SubscriberRegistry>,
}

impl NotificationBroker {
    pub fn new(config: BrokerConfig, registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            config,
            inner: Mutex::new(BrokerInner {
                pending: VecDeque::new(),
                cooldowns: HashMap::new(),
            }),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Creates and broadcasts a notification unless its cooldown key is
    /// currently suppressed. Returns None when suppressed.
    pub fn notify(
        &self,
        classification: Classification,
        message: impl Into<String>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
        severity_override: Option<Severity>,
    ) -> Option<AdminNotification> {
        let message = message.into();
        let key = format!("{}|{}", classification.category, message);
        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(self.config.cooldown)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        let mut inner = self.inner.lock().unwrap();

        if let Some(last_alerted) = inner.cooldowns.get(&key) {
            if now.signed_duration_since(*last_alerted) < cooldown {
                debug!(cooldown_key = %key, "notification suppressed by cooldown");
                counter!("error_monitor.notifications.suppressed", 1);
                return None;
            }
        }

        let notification = AdminNotification {
            id: Uuid::new_v4(),
            timestamp: now,
            category: classification.category,
            severity: severity_override.unwrap_or(classification.severity),
            message: message.clone(),
            user_impact: classification.user_impact,
            suggested_action: classification.suggested_action,
            context: context.unwrap_or_default(),
            acknowledged: false,
        };

        inner.cooldowns.insert(key, now);
        inner.pending.push_back(notification.clone());

        while inner.pending.len() > self.config.retention_cap {
            let oldest = inner
                .pending
                .iter()
                .enumerate()
                .min_by_key(|(_, n)| n.timestamp)
                .map(|(index, _)| index);
            if let Some(index) = oldest {
                if let Some(evicted) = inner.pending.remove(index) {
                    debug!(id = %evicted.id, "evicted notification over retention cap");
                    counter!("error_monitor.notifications.evicted", 1);
                }
            }
        }

        info!(
            id = %notification.id,
            category = %notification.category,
            severity = %notification.severity,
            "admin notification created"
        );
        counter!("error_monitor.notifications.created", 1);

        self.broadcast_frame(&StreamFrame::notification(&notification));
        Some(notification)
    }

    /// Marks one notification acknowledged. Returns whether the id was
    /// found, not whether state changed: acknowledging twice succeeds
    /// both times. Only an actual state flip broadcasts an
    /// acknowledgment frame.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let Some(notification) = inner.pending.iter_mut().find(|n| n.id == id) else {
            return false;
        };

        let flipped = !notification.acknowledged;
        notification.acknowledged = true;

        if flipped {
            counter!("error_monitor.notifications.acknowledged", 1);
            self.broadcast_frame(&StreamFrame::acknowledgment(AckTarget::Ids(vec![id])));
        }
        true
    }

    /// Acknowledges everything pending; returns how many actually flipped
    pub fn acknowledge_all(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();

        let mut flipped = 0;
        for notification in inner.pending.iter_mut() {
            if !notification.acknowledged {
                notification.acknowledged = true;
                flipped += 1;
            }
        }

        if flipped > 0 {
            counter!("error_monitor.notifications.acknowledged", flipped as u64);
            self.broadcast_frame(&StreamFrame::acknowledgment(AckTarget::All));
        }
        flipped
    }

    /// Attaches a live subscriber, replaying all pending unacknowledged
    /// critical notifications so a client connecting mid-incident sees
    /// active alerts immediately. The replay is not a broadcast.
    pub fn subscribe(&self) -> StreamHandle {
        let inner = self.inner.lock().unwrap();

        let replay: Vec<String> = inner
            .pending
            .iter()
            .filter(|n| n.severity == Severity::Critical && !n.acknowledged)
            .filter_map(|n| match encode_frame(&StreamFrame::notification(n)) {
                Ok(line) => Some(line),
                Err(err) => {
                    error!(error = %err, id = %n.id, "failed to encode replay frame");
                    None
                }
            })
            .collect();

        self.registry.attach(replay)
    }

    /// Snapshot of retained notifications, oldest first
    pub fn pending(&self) -> Vec<AdminNotification> {
        let inner = self.inner.lock().unwrap();
        inner.pending.iter().cloned().collect()
    }

    pub fn unacknowledged_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.pending.iter().filter(|n| !n.acknowledged).count()
    }

    fn broadcast_frame(&self, frame: &StreamFrame) {
        match encode_frame(frame) {
            Ok(line) => {
                self.registry.broadcast(line);
            }
            Err(err) => error!(error = %err, "failed to encode stream frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;

    fn broker_with(cooldown: Duration, retention_cap: usize) -> NotificationBroker {
        NotificationBroker::new(
            BrokerConfig {
                cooldown,
                retention_cap,
            },
            Arc::new(SubscriberRegistry::new(256)),
        )
    }

    fn classification(message: &str) -> Classification {
        classify(message, None, None)
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat_alerts() {
        let broker = broker_with(Duration::from_millis(80), 100);
        let message = "connection refused";

        let first = broker.notify(classification(message), message, None, None);
        assert!(first.is_some());

        let second = broker.notify(classification(message), message, None, None);
        assert!(second.is_none());

        tokio::time::sleep(Duration::from_millis(120)).await;

        let third = broker.notify(classification(message), message, None, None);
        assert!(third.is_some());
        assert_ne!(first.unwrap().id, third.unwrap().id);
    }

    #[test]
    fn test_cooldown_key_includes_category_and_message() {
        let broker = broker_with(Duration::from_secs(300), 100);

        assert!(broker
            .notify(classification("connection refused"), "connection refused", None, None)
            .is_some());
        // different message, same category: not suppressed
        assert!(broker
            .notify(classification("connection reset"), "connection reset", None, None)
            .is_some());
    }

    #[test]
    fn test_retention_cap_evicts_oldest() {
        let broker = broker_with(Duration::from_secs(300), 100);

        for i in 0..101 {
            let message = format!("failure number {} of kind {}", i, i);
            assert!(broker
                .notify(classification(&message), message.clone(), None, None)
                .is_some());
        }

        let pending = broker.pending();
        assert_eq!(pending.len(), 100);
        // the first (oldest-timestamp) notification is the one evicted
        assert!(!pending.iter().any(|n| n.message.contains("number 0 ")));
        assert!(pending.iter().any(|n| n.message.contains("number 100 ")));
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let broker = broker_with(Duration::from_secs(300), 100);
        let notification = broker
            .notify(classification("token expired"), "token expired", None, None)
            .unwrap();

        assert_eq!(broker.unacknowledged_count(), 1);
        assert!(broker.acknowledge(notification.id));
        assert_eq!(broker.unacknowledged_count(), 0);

        // second acknowledgment still reports success
        assert!(broker.acknowledge(notification.id));
        assert_eq!(broker.unacknowledged_count(), 0);

        assert!(!broker.acknowledge(Uuid::new_v4()));
    }

    #[test]
    fn test_acknowledge_all_counts_flips() {
        let broker = broker_with(Duration::from_secs(300), 100);

        let first = broker
            .notify(classification("token expired"), "token expired", None, None)
            .unwrap();
        broker.notify(classification("connection refused"), "connection refused", None, None);
        broker.acknowledge(first.id);

        assert_eq!(broker.acknowledge_all(), 1);
        assert_eq!(broker.acknowledge_all(), 0);
    }

    #[tokio::test]
    async fn test_severity_override_applies() {
        let broker = broker_with(Duration::from_secs(300), 100);
        let notification = broker
            .notify(
                classification("rate limit exceeded"),
                "rate limit exceeded",
                None,
                Some(Severity::Critical),
            )
            .unwrap();
        assert_eq!(notification.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_notification_broadcasts_to_subscribers() {
        let broker = broker_with(Duration::from_secs(300), 100);
        let mut handle = broker.subscribe();

        broker.notify(classification("connection refused"), "connection refused", None, None);

        let line = handle.next_frame().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["message"], "connection refused");
    }

    #[tokio::test]
    async fn test_late_attach_replays_critical_unacknowledged() {
        let broker = broker_with(Duration::from_secs(300), 100);

        // two critical, one warning, one acknowledged critical
        let a = broker
            .notify(classification("connection refused"), "connection refused", None, None)
            .unwrap();
        let b = broker
            .notify(classification("token expired"), "token expired", None, None)
            .unwrap();
        broker.notify(classification("rate limit exceeded"), "rate limit exceeded", None, None);
        let acked = broker
            .notify(classification("out of memory"), "out of memory", None, None)
            .unwrap();
        broker.acknowledge(acked.id);

        let mut handle = broker.subscribe();
        let mut replayed = Vec::new();
        while let Some(line) = handle.try_next_frame() {
            let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
            // the acknowledgment broadcast predates this subscriber; only
            // notification frames are replayed
            assert_eq!(value["type"], "notification");
            replayed.push(value["id"].as_str().unwrap().to_string());
        }

        assert_eq!(replayed, vec![a.id.to_string(), b.id.to_string()]);

        // a later broadcast does not repeat the replayed frames
        broker.notify(classification("disk full"), "disk full", None, None);
        let line = handle.next_frame().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["message"], "disk full");
        assert!(handle.try_next_frame().is_none());
    }

    #[tokio::test]
    async fn test_acknowledgment_broadcasts_distinct_frame() {
        let broker = broker_with(Duration::from_secs(300), 100);
        let notification = broker
            .notify(classification("connection refused"), "connection refused", None, None)
            .unwrap();

        let mut handle = broker.subscribe();
        // drain the replayed critical notification
        let _ = handle.try_next_frame();

        broker.acknowledge(notification.id);
        let line = handle.next_frame().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "acknowledgment");
        assert_eq!(value["acknowledgedIds"][0], notification.id.to_string());
    }
}
