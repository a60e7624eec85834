//! Notification sink for security-relevant federation events.
//!
//! Notifications are fire-and-forget: a sink never fails the login that
//! produced the event.

use async_trait::async_trait;
use platform_events::{EventBus, FederationEvent};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Receiver of federation events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver an event. Must not block the caller on failure.
    async fn notify(&self, event: FederationEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, event: FederationEvent) {
        debug!(event_type = event.event_type(), "Dropping federation event");
    }
}

/// Sink publishing to the platform event bus under `federation.*` topics.
pub struct EventBusSink {
    bus: Arc<dyn EventBus>,
}

impl EventBusSink {
    /// Create a sink over an event bus.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSink for EventBusSink {
    async fn notify(&self, event: FederationEvent) {
        let event = event.to_event();
        let topic = event.topic();
        if let Err(e) = self.bus.publish(event).await {
            error!(topic = %topic, error = %e, "Failed to publish federation event");
        }
    }
}

/// Sink keeping events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<FederationEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, oldest first.
    pub async fn events(&self) -> Vec<FederationEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn notify(&self, event: FederationEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_events::MemoryEventBus;
    use uuid::Uuid;

    fn denied() -> FederationEvent {
        FederationEvent::RemoteOnlyCreationDenied {
            provider_id: "forum".to_string(),
            remote_username: "Mallory".to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_sink_publishes_under_federation_topic() {
        let bus = Arc::new(MemoryEventBus::new());
        let mut sub = bus.subscribe("federation.security.*").await.unwrap();

        let sink = EventBusSink::new(bus.clone());
        sink.notify(denied()).await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.topic(), "federation.security.remote_only_creation_denied");
        assert_eq!(event.metadata["actor"], serde_json::json!("Mallory"));
    }

    #[tokio::test]
    async fn test_event_bus_sink_without_subscribers_does_not_fail() {
        let sink = EventBusSink::new(Arc::new(MemoryEventBus::new()));
        sink.notify(FederationEvent::MappingCreated {
            provider_id: "forum".to_string(),
            remote_username: "Alice".to_string(),
            account_id: Uuid::now_v7(),
            mapping_count: 1,
        })
        .await;
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.notify(denied()).await;
        NoopSink.notify(denied()).await;
        sink.notify(FederationEvent::IdentityRejected {
            provider_id: "forum".to_string(),
            remote_username: None,
            reason: None,
        })
        .await;

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], denied());
    }
}
