//! Event types for identity and security notifications
//!
//! This module defines the event envelope published on the bus and the
//! typed events emitted by remote identity federation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Source name used by events emitted from the federation login core.
pub const FEDERATION_SOURCE: &str = "federation";

/// Event envelope.
///
/// All events are wrapped in this envelope which provides metadata
/// for routing, tracing, and processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Event type (e.g., "identity.mapping_created")
    pub event_type: String,

    /// Emitting component (first topic segment)
    pub source: String,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Local account the event is about, when one is known
    pub user_id: Option<Uuid>,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    /// Event version for schema evolution
    pub version: u32,

    /// Event payload
    pub payload: serde_json::Value,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create a new event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The event type string
    /// * `source` - The emitting component
    /// * `payload` - The event payload
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            user_id: None,
            correlation_id: None,
            version: 1,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Set user context.
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Get the topic for this event.
    ///
    /// Topics are structured as: `{source}.{event_type}`
    pub fn topic(&self) -> String {
        format!("{}.{}", self.source, self.event_type)
    }

    /// Category of this event, derived from the event type prefix.
    pub fn category(&self) -> Option<EventCategory> {
        EventCategory::from_event_type(&self.event_type)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Event categories for filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Identity linkage events
    Identity,
    /// Session lifecycle events
    Session,
    /// Security events
    Security,
}

impl EventCategory {
    /// Parse from event type string.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        let prefix = event_type.split('.').next()?;
        match prefix {
            "identity" | "mapping" | "account" => Some(EventCategory::Identity),
            "session" | "login" | "logout" => Some(EventCategory::Session),
            "security" | "audit" => Some(EventCategory::Security),
            _ => None,
        }
    }
}

// ============================================================================
// Federation Events
// ============================================================================

/// Events emitted by remote identity federation.
///
/// The payload contract is kind + actor + relevant counts: the actor is the
/// local account when one exists, otherwise the remote username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FederationEvent {
    /// A remote identity was linked to a local account
    MappingCreated {
        provider_id: String,
        remote_username: String,
        account_id: Uuid,
        /// Mappings held by the account after this one was added
        mapping_count: u64,
    },
    /// The provider or a login gate refused the remote identity
    IdentityRejected {
        provider_id: String,
        remote_username: Option<String>,
        reason: Option<String>,
    },
    /// A first-time remote login was refused because remote-only accounts are disabled
    RemoteOnlyCreationDenied {
        provider_id: String,
        remote_username: String,
    },
}

impl FederationEvent {
    /// Event type string for this variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            FederationEvent::MappingCreated { .. } => "identity.mapping_created",
            FederationEvent::IdentityRejected { .. } => "security.identity_rejected",
            FederationEvent::RemoteOnlyCreationDenied { .. } => {
                "security.remote_only_creation_denied"
            }
        }
    }

    /// Provider configuration the event originated from.
    pub fn provider_id(&self) -> &str {
        match self {
            FederationEvent::MappingCreated { provider_id, .. }
            | FederationEvent::IdentityRejected { provider_id, .. }
            | FederationEvent::RemoteOnlyCreationDenied { provider_id, .. } => provider_id,
        }
    }

    /// Convert to generic event.
    pub fn to_event(&self) -> Event {
        let payload = serde_json::to_value(self).unwrap_or_default();
        let event = Event::new(self.event_type(), FEDERATION_SOURCE, payload)
            .with_metadata("provider_id", serde_json::json!(self.provider_id()));

        match self {
            FederationEvent::MappingCreated { account_id, .. } => event.with_user(*account_id),
            FederationEvent::IdentityRejected {
                remote_username: Some(name),
                ..
            }
            | FederationEvent::RemoteOnlyCreationDenied {
                remote_username: name,
                ..
            } => event.with_metadata("actor", serde_json::json!(name)),
            FederationEvent::IdentityRejected { .. } => event,
        }
    }
}
