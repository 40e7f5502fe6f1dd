//! Session state.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hermes_core::SessionSnapshot;

/// The model tag assigned when a client does not name one.
pub const DEFAULT_MODEL: &str = "claude-3-sonnet";

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The session is live.
    Active,
    /// The backend reported the conversation as finished.
    Ended,
    /// The backend reported a failure.
    Failed,
}

impl SessionStatus {
    /// Parses a backend-reported status string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Conversational state bound to one backend session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub session_id: String,
    /// Unique conversation identifier.
    pub conversation_id: String,
    /// The model the session is bound to.
    pub model: String,
    /// Capability names forwarded to the backend.
    pub tools: Vec<String>,
    /// Free-form key/value context forwarded to the backend.
    pub context: HashMap<String, String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last time the session saw a forward. Monotone non-decreasing.
    pub last_activity: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: SessionStatus,
}

impl Session {
    /// Creates a fresh session, generating any missing identifiers.
    #[must_use]
    pub fn new(
        session_id: Option<&str>,
        conversation_id: Option<&str>,
        model: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(generate_session_id),
            conversation_id: conversation_id
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(generate_conversation_id),
            model: model
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            tools: Vec::new(),
            context: HashMap::new(),
            created_at: now,
            last_activity: now,
            status: SessionStatus::Active,
        }
    }

    /// Records activity on the session. `last_activity` never moves
    /// backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    /// Returns whether the session has been idle longer than the
    /// threshold, judged at `now`.
    #[must_use]
    pub fn is_idle(&self, threshold: std::time::Duration, now: DateTime<Utc>) -> bool {
        let threshold = ChronoDuration::from_std(threshold).unwrap_or(ChronoDuration::MAX);
        now - self.last_activity > threshold
    }

    /// Produces the snapshot attached to request contexts.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            conversation_id: self.conversation_id.clone(),
            model: self.model.clone(),
            tools: self.tools.clone(),
            context: self.context.clone(),
        }
    }
}

/// Generates a unique session ID.
///
/// UUID v7 combines a timestamp with entropy, so IDs stay unique even when
/// two sessions are created within the same tick.
fn generate_session_id() -> String {
    format!("sess_{}", Uuid::now_v7().simple())
}

/// Generates a unique conversation ID.
fn generate_conversation_id() -> String {
    format!("conv_{}", Uuid::now_v7().simple())
}
