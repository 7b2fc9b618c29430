//! # Live Notification Stream
//!
//! Subscriber registry and wire format for the real-time fan-out path.
//! Each subscriber is a bounded channel of newline-delimited JSON frames;
//! broadcasts never block on a slow client, and a dead client is pruned
//! in the same broadcast pass that discovers it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{AdminNotification, Result};

/// Opaque subscriber identity, valid for one connection lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an acknowledgment frame covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckTarget {
    /// Specific notification ids
    Ids(Vec<Uuid>),
    /// Everything currently pending
    All,
}

impl Serialize for AckTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AckTarget::Ids(ids) => ids.serialize(serializer),
            AckTarget::All => serializer.serialize_str("all"),
        }
    }
}

/// One wire frame. Serialized as `{"type": "notification", ...}` or
/// `{"type": "acknowledgment", "acknowledgedIds": [...]|"all", ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Notification {
        #[serde(flatten)]
        notification: AdminNotification,
    },
    Acknowledgment {
        #[serde(rename = "acknowledgedIds")]
        acknowledged_ids: AckTarget,
        timestamp: DateTime<Utc>,
    },
}

impl StreamFrame {
    pub fn notification(notification: &AdminNotification) -> Self {
        StreamFrame::Notification {
            notification: notification.clone(),
        }
    }

    pub fn acknowledgment(acknowledged_ids: AckTarget) -> Self {
        StreamFrame::Acknowledgment {
            acknowledged_ids,
            timestamp: Utc::now(),
        }
    }
}

/// Serializes one frame as a newline-terminated JSON line
pub fn encode_frame(frame: &StreamFrame) -> Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Receiving half of one live connection. Dropping the handle without
/// detaching is fine: the registry prunes the dead sink on the next
/// broadcast.
pub struct StreamHandle {
    id: SubscriberId,
    rx: mpsc::Receiver<String>,
}

impl StreamHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next frame, or None once detached and drained
    pub async fn next_frame(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Non-blocking variant of `next_frame`
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Manages concurrently-attached live listeners and performs fan-out.
///
/// One mutex guards the subscriber set, so broadcast-then-prune is atomic
/// with respect to attach/detach: a broadcast never writes to a
/// half-removed subscriber and never skips one attached before it began.
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
    buffer: usize,
}

impl SubscriberRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Attaches a new subscriber, seeding its channel with the given
    /// replay frames. The replay goes only to this subscriber; it is not
    /// a broadcast.
    pub fn attach(&self, replay: Vec<String>) -> StreamHandle {
        let id = SubscriberId::new();
        // leave room for the replay even with a tiny configured buffer
        let (tx, rx) = mpsc::channel(self.buffer.max(replay.len() + 1));

        let mut subscribers = self.subscribers.lock().unwrap();
        for line in replay {
            if tx.try_send(line).is_err() {
                warn!(subscriber = %id, "replay frame dropped");
            }
        }
        subscribers.insert(id, tx);
        gauge!("error_monitor.stream.subscribers", subscribers.len() as f64);
        info!(subscriber = %id, "subscriber attached");

        StreamHandle { id, rx }
    }

    /// Removes a subscriber. Safe to call concurrently with a broadcast,
    /// and safe to call for an id already pruned.
    pub fn detach(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            gauge!("error_monitor.stream.subscribers", subscribers.len() as f64);
            info!(subscriber = %id, "subscriber detached");
        }
        removed
    }

    /// Writes one encoded frame to every attached subscriber. Dead sinks
    /// (closed channels) are removed in this same pass; a full buffer
    /// drops the frame for that subscriber but keeps it attached. Returns
    /// the number of successful deliveries.
    pub fn broadcast(&self, line: String) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        let mut dead: Vec<SubscriberId> = Vec::new();
        let mut delivered = 0;

        for (id, tx) in subscribers.iter() {
            match tx.try_send(line.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, "subscriber buffer full, dropping frame");
                    counter!("error_monitor.stream.frames_dropped", 1);
                }
                Err(TrySendError::Closed(_)) => dead.push(*id),
            }
        }

        for id in dead {
            subscribers.remove(&id);
            debug!(subscriber = %id, "pruned dead subscriber during broadcast");
            counter!("error_monitor.stream.subscribers_pruned", 1);
        }

        gauge!("error_monitor.stream.subscribers", subscribers.len() as f64);
        delivered
    }

    /// Number of currently attached subscribers
    pub fn count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, Severity};

    fn sample_notification() -> AdminNotification {
        AdminNotification {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category: ErrorCategory::ConnectionFailure,
            severity: Severity::Critical,
            message: "connection refused".to_string(),
            user_impact: "impact".to_string(),
            suggested_action: "action".to_string(),
            context: serde_json::Map::new(),
            acknowledged: false,
        }
    }

    #[test]
    fn test_notification_frame_shape() {
        let notification = sample_notification();
        let line = encode_frame(&StreamFrame::notification(&notification)).unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["category"], "connection-failure");
        assert_eq!(value["severity"], "critical");
        assert_eq!(value["acknowledged"], false);
    }

    #[test]
    fn test_acknowledgment_frame_shapes() {
        let id = Uuid::new_v4();
        let line = encode_frame(&StreamFrame::acknowledgment(AckTarget::Ids(vec![id]))).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "acknowledgment");
        assert_eq!(value["acknowledgedIds"][0], id.to_string());
        assert!(value.get("timestamp").is_some());

        let line = encode_frame(&StreamFrame::acknowledgment(AckTarget::All)).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["acknowledgedIds"], "all");
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_all() {
        let registry = SubscriberRegistry::new(8);
        let mut a = registry.attach(Vec::new());
        let mut b = registry.attach(Vec::new());

        let delivered = registry.broadcast("frame-1\n".to_string());
        assert_eq!(delivered, 2);
        assert_eq!(a.next_frame().await.unwrap(), "frame-1\n");
        assert_eq!(b.next_frame().await.unwrap(), "frame-1\n");
    }

    #[tokio::test]
    async fn test_broken_subscriber_is_pruned_not_fatal() {
        let registry = SubscriberRegistry::new(8);
        let mut a = registry.attach(Vec::new());
        let broken = registry.attach(Vec::new());
        let mut c = registry.attach(Vec::new());

        // simulate a dropped connection
        drop(broken);
        assert_eq!(registry.count(), 3);

        let delivered = registry.broadcast("frame-1\n".to_string());
        assert_eq!(delivered, 2);
        assert_eq!(registry.count(), 2);

        assert_eq!(a.next_frame().await.unwrap(), "frame-1\n");
        assert_eq!(c.next_frame().await.unwrap(), "frame-1\n");

        // subsequent broadcasts no longer see the broken subscriber
        let delivered = registry.broadcast("frame-2\n".to_string());
        assert_eq!(delivered, 2);
    }

    #[tokio::test]
    async fn test_replay_goes_only_to_new_subscriber() {
        let registry = SubscriberRegistry::new(8);
        let mut old = registry.attach(Vec::new());

        let mut late = registry.attach(vec!["replayed\n".to_string()]);
        assert_eq!(late.next_frame().await.unwrap(), "replayed\n");
        assert!(old.try_next_frame().is_none());

        registry.broadcast("fresh\n".to_string());
        assert_eq!(old.next_frame().await.unwrap(), "fresh\n");
        assert_eq!(late.next_frame().await.unwrap(), "fresh\n");
        // the replayed frame is not delivered twice
        assert!(late.try_next_frame().is_none());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_frame_but_keeps_subscriber() {
        let registry = SubscriberRegistry::new(1);
        let mut slow = registry.attach(Vec::new());

        assert_eq!(registry.broadcast("frame-1\n".to_string()), 1);
        // buffer of one is now full; this frame is dropped for the slow client
        assert_eq!(registry.broadcast("frame-2\n".to_string()), 0);
        assert_eq!(registry.count(), 1);

        assert_eq!(slow.next_frame().await.unwrap(), "frame-1\n");
        assert_eq!(registry.broadcast("frame-3\n".to_string()), 1);
        assert_eq!(slow.next_frame().await.unwrap(), "frame-3\n");
    }

    #[test]
    fn test_detach_is_idempotent() {
        let registry = SubscriberRegistry::new(8);
        let handle = registry.attach(Vec::new());
        let id = handle.id();

        assert!(registry.detach(id));
        assert!(!registry.detach(id));
        assert_eq!(registry.count(), 0);
    }
}
