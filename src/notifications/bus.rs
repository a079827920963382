use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Events delivered to live stream subscribers. Delivery is best-effort and
/// at-most-once per connection; clients reconcile by re-fetching the latest
/// summary on receipt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    SummaryUpdate { meeting_id: String },
    SegmentAdded { segment_id: String, count: i64 },
}

struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<StreamEvent>,
}

/// Per-meeting registry of live subscribers.
pub struct NotificationBus {
    next_id: AtomicU64,
    connections: DashMap<String, Vec<Subscriber>>,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
        }
    }

    /// Registers a subscriber for a meeting and returns its id together with
    /// the event receiver the connection task should drain.
    pub fn subscribe(&self, meeting_id: &str) -> (u64, mpsc::UnboundedReceiver<StreamEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .entry(meeting_id.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        debug!("subscriber {} registered for meeting {}", id, meeting_id);
        (id, receiver)
    }

    /// Removes a subscriber. Idempotent.
    pub fn unsubscribe(&self, meeting_id: &str, subscriber_id: u64) {
        if let Some(mut entry) = self.connections.get_mut(meeting_id) {
            entry.retain(|s| s.id != subscriber_id);
        }
        self.connections.remove_if(meeting_id, |_, subs| subs.is_empty());
    }

    /// Delivers an event to every live subscriber of the meeting. A failed
    /// send unregisters that subscriber.
    pub fn broadcast(&self, meeting_id: &str, event: StreamEvent) {
        if let Some(mut entry) = self.connections.get_mut(meeting_id) {
            entry.retain(|s| s.sender.send(event.clone()).is_ok());
        }
        self.connections.remove_if(meeting_id, |_, subs| subs.is_empty());
    }

    pub fn subscriber_count(&self, meeting_id: &str) -> usize {
        self.connections
            .get(meeting_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let bus = NotificationBus::new();
        let (_a, mut rx_a) = bus.subscribe("m1");
        let (_b, mut rx_b) = bus.subscribe("m1");

        let event = StreamEvent::SummaryUpdate {
            meeting_id: "m1".into(),
        };
        bus.broadcast("m1", event.clone());

        assert_eq!(rx_a.recv().await.unwrap(), event);
        assert_eq!(rx_b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn broadcast_is_scoped_to_the_meeting() {
        let bus = NotificationBus::new();
        let (_a, mut rx_a) = bus.subscribe("m1");
        let (_b, mut rx_b) = bus.subscribe("m2");

        bus.broadcast(
            "m1",
            StreamEvent::SegmentAdded {
                segment_id: "s1".into(),
                count: 1,
            },
        );

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_on_send_failure() {
        let bus = NotificationBus::new();
        let (_id, rx) = bus.subscribe("m1");
        drop(rx);
        assert_eq!(bus.subscriber_count("m1"), 1);

        bus.broadcast(
            "m1",
            StreamEvent::SummaryUpdate {
                meeting_id: "m1".into(),
            },
        );
        assert_eq!(bus.subscriber_count("m1"), 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = NotificationBus::new();
        let (id, _rx) = bus.subscribe("m1");
        bus.unsubscribe("m1", id);
        bus.unsubscribe("m1", id);
        assert_eq!(bus.subscriber_count("m1"), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(StreamEvent::SummaryUpdate {
            meeting_id: "m1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "summary_update");
        assert_eq!(json["meeting_id"], "m1");

        let json = serde_json::to_value(StreamEvent::SegmentAdded {
            segment_id: "s1".into(),
            count: 4,
        })
        .unwrap();
        assert_eq!(json["type"], "segment_added");
        assert_eq!(json["count"], 4);
    }
}
