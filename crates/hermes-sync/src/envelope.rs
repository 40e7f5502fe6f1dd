//! Push envelope types.
//!
//! The [`Envelope`] is the unit of fan-out: a tagged kind, a kind-specific
//! payload, a timestamp, and optional target selectors. On the wire it is a
//! single JSON object; SSE frames carry the same JSON after a `data: `
//! prefix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of a push envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// An agent status change.
    AgentStatus,
    /// A message lifecycle update.
    MessageUpdate,
    /// A session lifecycle update.
    SessionUpdate,
    /// An error event.
    Error,
    /// A periodic liveness beacon.
    Heartbeat,
    /// The first envelope on a new connection, carrying its ID.
    Welcome,
    /// Reply to an inbound ping.
    Pong,
    /// A client-originated or otherwise untyped event.
    #[serde(other)]
    Custom,
}

/// The unit of fan-out.
///
/// `principal_id` and `subject_id` double as target selectors: an envelope
/// with both empty is broadcast to every connection; otherwise a connection
/// receives it iff every non-empty target matches the connection's
/// corresponding field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Kind-specific payload.
    pub data: serde_json::Value,
    /// When the envelope was emitted.
    pub timestamp: DateTime<Utc>,
    /// The connection that originated the envelope, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Target principal selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    /// Target subject selector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Open metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Envelope {
    /// Creates an envelope of the given kind with a payload.
    #[must_use]
    pub fn new(kind: EnvelopeKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            client_id: None,
            principal_id: None,
            subject_id: None,
            metadata: None,
        }
    }

    /// Builds an agent-status envelope targeted at the subject.
    #[must_use]
    pub fn agent_status(subject_id: &str, status: &str, message: &str) -> Self {
        let event = AgentStatusEvent {
            subject_id: subject_id.to_string(),
            status: status.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        Self::new(
            EnvelopeKind::AgentStatus,
            serde_json::to_value(event).unwrap_or_default(),
        )
        .with_subject(subject_id)
    }

    /// Builds a message-update envelope targeted at the subject.
    #[must_use]
    pub fn message_update(message_id: &str, content: &str, status: &str, subject_id: &str) -> Self {
        let event = MessageUpdateEvent {
            message_id: message_id.to_string(),
            content: content.to_string(),
            status: status.to_string(),
            subject_id: subject_id.to_string(),
            timestamp: Utc::now(),
        };
        Self::new(
            EnvelopeKind::MessageUpdate,
            serde_json::to_value(event).unwrap_or_default(),
        )
        .with_subject(subject_id)
    }

    /// Builds a session-update envelope targeted at the subject.
    #[must_use]
    pub fn session_update(session_id: &str, status: &str, data: serde_json::Value) -> Self {
        let event = SessionUpdateEvent {
            session_id: session_id.to_string(),
            status: status.to_string(),
            data,
            timestamp: Utc::now(),
        };
        Self::new(
            EnvelopeKind::SessionUpdate,
            serde_json::to_value(event).unwrap_or_default(),
        )
        .with_subject(session_id)
    }

    /// Builds an untargeted error envelope.
    #[must_use]
    pub fn error(code: &str, message: &str, details: &str) -> Self {
        let event = ErrorEvent {
            code: code.to_string(),
            message: message.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
        };
        Self::new(
            EnvelopeKind::Error,
            serde_json::to_value(event).unwrap_or_default(),
        )
    }

    /// Builds an untargeted heartbeat envelope.
    #[must_use]
    pub fn heartbeat() -> Self {
        let event = HeartbeatEvent {
            timestamp: Utc::now(),
        };
        Self::new(
            EnvelopeKind::Heartbeat,
            serde_json::to_value(event).unwrap_or_default(),
        )
    }

    /// Builds the welcome envelope for a new connection.
    #[must_use]
    pub fn welcome(connection_id: &str) -> Self {
        Self::new(
            EnvelopeKind::Welcome,
            serde_json::json!({ "connection_id": connection_id }),
        )
    }

    /// Builds the pong reply to an inbound ping.
    #[must_use]
    pub fn pong(connection_id: &str) -> Self {
        let mut envelope = Self::new(EnvelopeKind::Pong, serde_json::Value::Null);
        envelope.client_id = Some(connection_id.to_string());
        envelope
    }

    /// Builds a custom envelope from a client-originated payload.
    #[must_use]
    pub fn custom(data: serde_json::Value) -> Self {
        Self::new(EnvelopeKind::Custom, data)
    }

    /// Sets the subject target.
    #[must_use]
    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Sets the principal target.
    #[must_use]
    pub fn with_principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    /// Sets the originating connection.
    #[must_use]
    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the metadata field.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Agent status change payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusEvent {
    /// The agent whose status changed.
    pub subject_id: String,
    /// The new status.
    pub status: String,
    /// Optional human-readable detail.
    pub message: String,
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
}

/// Message lifecycle update payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdateEvent {
    /// The message this update concerns.
    pub message_id: String,
    /// Current message content.
    pub content: String,
    /// Message status, e.g. `processing`.
    pub status: String,
    /// The agent the message belongs to.
    pub subject_id: String,
    /// When the update happened.
    pub timestamp: DateTime<Utc>,
}

/// Session lifecycle update payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdateEvent {
    /// The session this update concerns.
    pub session_id: String,
    /// Current session status.
    pub status: String,
    /// Free-form detail.
    pub data: serde_json::Value,
    /// When the update happened.
    pub timestamp: DateTime<Utc>,
}

/// Error event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional detail.
    pub details: String,
    /// When the error happened.
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    /// When the beacon was emitted.
    pub timestamp: DateTime<Utc>,
}
