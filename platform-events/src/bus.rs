//! Event bus implementation
//!
//! This module provides the event bus abstraction and the in-process
//! implementation used to fan security events out to audit consumers.

use crate::types::Event;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Failed to publish event
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// Failed to subscribe
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),

    /// Unknown subscription ID
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    /// Handler failed to process an event
    #[error("Handler error: {0}")]
    HandlerError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Subscription handle for receiving events.
pub struct Subscription {
    /// Subscription ID
    pub id: String,
    /// Topic pattern
    pub topic: String,
    /// Event receiver
    pub receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event.
    pub async fn recv(&mut self) -> EventBusResult<Event> {
        self.receiver
            .recv()
            .await
            .map_err(|_| EventBusError::ChannelClosed)
    }

    /// Receive an already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Event handler trait for processing events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: Event) -> EventBusResult<()>;

    /// Get the topics this handler is interested in.
    fn topics(&self) -> Vec<String>;
}

/// Event bus trait for publish/subscribe operations.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> EventBusResult<()>;

    /// Subscribe to a topic pattern.
    ///
    /// Topic patterns support wildcards:
    /// - `*` matches any single segment
    /// - `#` matches zero or more segments
    ///
    /// Examples:
    /// - `federation.security.*` matches `federation.security.identity_rejected`
    /// - `federation.#` matches every federation event
    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription>;

    /// Register an event handler.
    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()>;

    /// Unsubscribe from a topic.
    async fn unsubscribe(&self, subscription_id: &str) -> EventBusResult<()>;

    /// Get event bus stats.
    async fn stats(&self) -> EventBusStats;
}

/// Event bus statistics.
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    /// Total events published
    pub events_published: u64,
    /// Total events delivered to subscribers and handlers
    pub events_delivered: u64,
    /// Active subscriptions
    pub active_subscriptions: usize,
    /// Registered handlers
    pub registered_handlers: usize,
}

/// In-memory event bus implementation.
///
/// Suitable for single-process deployments and testing.
pub struct MemoryEventBus {
    /// Broadcast channel per topic pattern
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Event>>>>,
    /// Subscription ID to topic pattern
    subscriptions: Arc<RwLock<HashMap<String, String>>>,
    /// Registered handlers
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    /// Statistics
    stats: Arc<RwLock<EventBusStats>>,
    /// Default channel capacity
    channel_capacity: usize,
}

impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl MemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create with custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            handlers: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(RwLock::new(EventBusStats::default())),
            channel_capacity: capacity,
        }
    }

    /// Check if a topic matches a pattern.
    pub fn topic_matches(pattern: &str, topic: &str) -> bool {
        let pattern_parts: Vec<&str> = pattern.split('.').collect();
        let topic_parts: Vec<&str> = topic.split('.').collect();
        Self::segments_match(&pattern_parts, &topic_parts)
    }

    fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                // zero segments, or consume one and stay on `#`
                Self::segments_match(&pattern[1..], topic)
                    || (!topic.is_empty() && Self::segments_match(pattern, &topic[1..]))
            }
            (Some(&"*"), Some(_)) => Self::segments_match(&pattern[1..], &topic[1..]),
            (Some(segment), Some(part)) if segment == part => {
                Self::segments_match(&pattern[1..], &topic[1..])
            }
            _ => false,
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        let topic = event.topic();
        let mut delivered = 0u64;

        {
            let channels = self.channels.read().await;
            for (pattern, sender) in channels.iter() {
                if Self::topic_matches(pattern, &topic) {
                    // no receivers left is not an error
                    if let Ok(receivers) = sender.send(event.clone()) {
                        delivered += receivers as u64;
                    }
                }
            }
        }

        {
            let handlers = self.handlers.read().await;
            for handler in handlers.iter() {
                if handler
                    .topics()
                    .iter()
                    .any(|pattern| Self::topic_matches(pattern, &topic))
                {
                    delivered += 1;
                    let handler = handler.clone();
                    let event = event.clone();
                    tokio::task::spawn(async move {
                        if let Err(e) = handler.handle(event).await {
                            tracing::error!(error = %e, "Event handler failed");
                        }
                    });
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.events_published += 1;
        stats.events_delivered += delivered;

        tracing::debug!(topic = %topic, event_id = %event.id, delivered, "Event published");

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> EventBusResult<Subscription> {
        if topic.is_empty() {
            return Err(EventBusError::SubscribeError(
                "topic pattern must not be empty".to_string(),
            ));
        }

        let id = uuid::Uuid::now_v7().to_string();

        // Lock order is channels, then subscriptions, in both subscribe and unsubscribe
        let receiver = {
            let mut channels = self.channels.write().await;
            let receiver = match channels.get(topic) {
                Some(sender) => sender.subscribe(),
                None => {
                    let (sender, receiver) = broadcast::channel(self.channel_capacity);
                    channels.insert(topic.to_string(), sender);
                    receiver
                }
            };
            self.subscriptions
                .write()
                .await
                .insert(id.clone(), topic.to_string());
            receiver
        };

        self.stats.write().await.active_subscriptions += 1;

        Ok(Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        })
    }

    async fn register_handler(&self, handler: Arc<dyn EventHandler>) -> EventBusResult<()> {
        self.handlers.write().await.push(handler);
        self.stats.write().await.registered_handlers += 1;
        Ok(())
    }

    async fn unsubscribe(&self, subscription_id: &str) -> EventBusResult<()> {
        {
            let mut channels = self.channels.write().await;
            let mut subscriptions = self.subscriptions.write().await;
            let Some(pattern) = subscriptions.remove(subscription_id) else {
                return Err(EventBusError::UnknownSubscription(
                    subscription_id.to_string(),
                ));
            };
            if !subscriptions.values().any(|p| *p == pattern) {
                channels.remove(&pattern);
            }
        }

        let mut stats = self.stats.write().await;
        stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
        Ok(())
    }

    async fn stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FederationEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn mapping_event() -> Event {
        FederationEvent::MappingCreated {
            provider_id: "forum".to_string(),
            remote_username: "Alice".to_string(),
            account_id: Uuid::now_v7(),
            mapping_count: 1,
        }
        .to_event()
    }

    #[tokio::test]
    async fn test_memory_event_bus_publish_subscribe() {
        let bus = MemoryEventBus::new();

        let mut sub = bus.subscribe("federation.identity.*").await.unwrap();
        bus.publish(mapping_event()).await.unwrap();

        let received =
            tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv()).await;

        let event = received.unwrap().unwrap();
        assert_eq!(event.event_type, "identity.mapping_created");
    }

    #[tokio::test]
    async fn test_non_matching_subscription_receives_nothing() {
        let bus = MemoryEventBus::new();

        let mut sub = bus.subscribe("federation.security.*").await.unwrap();
        bus.publish(mapping_event()).await.unwrap();

        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_topic_matching() {
        // Exact match
        assert!(MemoryEventBus::topic_matches(
            "federation.identity.mapping_created",
            "federation.identity.mapping_created"
        ));

        // Single wildcard
        assert!(MemoryEventBus::topic_matches(
            "federation.identity.*",
            "federation.identity.mapping_created"
        ));
        assert!(MemoryEventBus::topic_matches(
            "*.security.identity_rejected",
            "federation.security.identity_rejected"
        ));

        // Multi-segment wildcard
        assert!(MemoryEventBus::topic_matches("federation.#", "federation.identity.mapping_created"));
        assert!(MemoryEventBus::topic_matches("#", "federation.identity.mapping_created"));
        assert!(MemoryEventBus::topic_matches(
            "#.mapping_created",
            "federation.identity.mapping_created"
        ));

        // Non-matches
        assert!(!MemoryEventBus::topic_matches(
            "federation.security.*",
            "federation.identity.mapping_created"
        ));
        assert!(!MemoryEventBus::topic_matches("federation.*", "federation.identity.mapping_created"));
    }

    struct CountingHandler {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: Event) -> EventBusResult<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn topics(&self) -> Vec<String> {
            vec!["federation.identity.#".to_string(), "federation.#".to_string()]
        }
    }

    #[tokio::test]
    async fn test_handler_invoked_once_per_event() {
        let bus = MemoryEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.register_handler(Arc::new(CountingHandler { seen: seen.clone() }))
            .await
            .unwrap();

        bus.publish(mapping_event()).await.unwrap();

        for _ in 0..50 {
            if seen.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = MemoryEventBus::new();

        let stats = bus.stats().await;
        assert_eq!(stats.events_published, 0);
        assert_eq!(stats.active_subscriptions, 0);

        let sub = bus.subscribe("federation.#").await.unwrap();
        let stats = bus.stats().await;
        assert_eq!(stats.active_subscriptions, 1);

        bus.publish(mapping_event()).await.unwrap();
        let stats = bus.stats().await;
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.events_delivered, 1);

        bus.unsubscribe(&sub.id).await.unwrap();
        assert_eq!(bus.stats().await.active_subscriptions, 0);
        assert!(matches!(
            bus.unsubscribe(&sub.id).await,
            Err(EventBusError::UnknownSubscription(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_unused_channel() {
        let bus = MemoryEventBus::new();
        let first = bus.subscribe("federation.identity.*").await.unwrap();
        let mut second = bus.subscribe("federation.identity.*").await.unwrap();
        let other = bus.subscribe("federation.#").await.unwrap();
        assert_eq!(bus.channels.read().await.len(), 2);

        bus.unsubscribe(&first.id).await.unwrap();
        assert_eq!(bus.channels.read().await.len(), 2);

        // Remaining subscriber on the shared pattern still receives events
        bus.publish(mapping_event()).await.unwrap();
        assert!(second.try_recv().is_some());

        bus.unsubscribe(&second.id).await.unwrap();
        assert!(!bus.channels.read().await.contains_key("federation.identity.*"));

        bus.unsubscribe(&other.id).await.unwrap();
        assert!(bus.channels.read().await.is_empty());
    }
}
