//! # Platform Events
//!
//! This crate provides the event bus the Relay platform uses to publish
//! identity and security notifications, such as a remote identity being
//! linked to a local account or a remote login being refused.
//!
//! ## Overview
//!
//! The platform-events crate handles:
//! - **Event Types**: The event envelope and typed federation events
//! - **Event Bus**: Publish/subscribe messaging
//! - **Event Handlers**: Async event processing (audit logs, alerting)
//!
//! ## Usage
//!
//! ### Publishing Events
//!
//! ```rust,no_run
//! use platform_events::{EventBus, FederationEvent, MemoryEventBus};
//! use uuid::Uuid;
//!
//! async fn publish_example() {
//!     let bus = MemoryEventBus::new();
//!
//!     let event = FederationEvent::MappingCreated {
//!         provider_id: "forum".to_string(),
//!         remote_username: "Alice".to_string(),
//!         account_id: Uuid::now_v7(),
//!         mapping_count: 1,
//!     };
//!
//!     bus.publish(event.to_event()).await.unwrap();
//! }
//! ```
//!
//! ### Subscribing to Events
//!
//! ```rust,no_run
//! use platform_events::{EventBus, MemoryEventBus};
//!
//! async fn subscribe_example() {
//!     let bus = MemoryEventBus::new();
//!
//!     // Every security-relevant rejection
//!     let mut sub = bus.subscribe("federation.security.*").await.unwrap();
//!
//!     while let Ok(event) = sub.recv().await {
//!         println!("Received: {}", event.event_type);
//!     }
//! }
//! ```
//!
//! ## Topic Patterns
//!
//! Topics are structured as `{source}.{event_type}`:
//! - `federation.identity.mapping_created` - Specific event
//! - `federation.security.*` - All security events from federation
//! - `#` - All events
//!
//! Wildcards:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments

pub mod bus;
pub mod types;

// Re-export main types
pub use bus::{
    EventBus, EventBusError, EventBusResult, EventBusStats, EventHandler, MemoryEventBus,
    Subscription,
};
pub use types::{Event, EventCategory, FederationEvent, FEDERATION_SOURCE};
