//! New-visitor notifications.
//!
//! The recorder emits a [`NewVisitorEvent`] through a [`VisitorEventSink`]
//! before a first-time visitor is written. [`EventBus`] fans events out to
//! any number of in-process subscribers over a `tokio::sync::broadcast`
//! channel.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{VisitorAttributes, VisitorUpsert};

/// A visitor seen for the first time in its session, not yet persisted.
#[derive(Debug, Clone, Serialize)]
pub struct NewVisitorEvent {
    pub unique_id: String,
    pub attributes: VisitorAttributes,
    /// Unix timestamp (seconds)
    pub occurred_at: i64,
}

impl NewVisitorEvent {
    pub fn new(visitor: &VisitorUpsert) -> Self {
        Self {
            unique_id: visitor.unique_id.clone(),
            attributes: visitor.attributes.clone(),
            occurred_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[async_trait]
pub trait VisitorEventSink: Send + Sync {
    async fn new_visitor(&self, event: NewVisitorEvent);
}

/// Sink that drops every event.
pub struct NoopEventSink;

#[async_trait]
impl VisitorEventSink for NoopEventSink {
    async fn new_visitor(&self, _event: NewVisitorEvent) {}
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of new-visitor events.
///
/// Slow subscribers that fall more than `capacity` events behind observe
/// `RecvError::Lagged` and lose the oldest events.
pub struct EventBus {
    sender: broadcast::Sender<NewVisitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Without subscribers the event is
    /// dropped.
    pub fn publish(&self, event: NewVisitorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NewVisitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl VisitorEventSink for EventBus {
    async fn new_visitor(&self, event: NewVisitorEvent) {
        tracing::debug!(unique_id = %event.unique_id, "publishing new visitor event");
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(unique_id: &str) -> VisitorUpsert {
        VisitorUpsert {
            id: None,
            unique_id: unique_id.to_string(),
            attributes: VisitorAttributes {
                ip: "203.0.113.7".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.new_visitor(NewVisitorEvent::new(&upsert("abc"))).await;

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert_eq!(a.unique_id, "abc");
        assert_eq!(b.unique_id, "abc");
        assert_eq!(a.attributes.ip, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.new_visitor(NewVisitorEvent::new(&upsert("nobody"))).await;

        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_event_serializes() {
        let json = serde_json::to_value(NewVisitorEvent::new(&upsert("abc"))).unwrap();
        assert_eq!(json["unique_id"], "abc");
        assert_eq!(json["attributes"]["ip"], "203.0.113.7");
    }
}
