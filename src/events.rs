//! In-process pub/sub for the notification pipeline's own lifecycle
//! events (`notification.sent`, `notification.failed`). Kept strictly
//! separate from the webhook `EventType` bus in `model::webhook::Event`
//! per the §9 design note.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct InternalEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<InternalEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn publish(&self, topic: impl Into<String>, payload: serde_json::Value) {
        // No subscribers is a normal state (e.g. in tests); ignore the
        // send error rather than treating it as a bus failure.
        let _ = self.sender.send(InternalEvent {
            topic: topic.into(),
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InternalEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish("notification.sent", json!({"notification_id": "abc"}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "notification.sent");
        assert_eq!(event.payload["notification_id"], "abc");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish("notification.sent", json!({}));
    }
}
