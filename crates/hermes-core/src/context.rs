//! Request context types.
//!
//! The [`RequestContext`] carries per-request identity and metadata through
//! the middleware chain and into handlers. It is created by the orchestrator
//! before the chain runs and dropped once the response has been written.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes request IDs sortable in logs and
/// keeps the generation cheap (no coordination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot of agent-session state attached to a request.
///
/// When a request carries a session header, the session layer resolves the
/// session once and attaches this snapshot so downstream handlers can read
/// the model, tools, and context without another registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// The session identifier.
    pub session_id: String,
    /// The conversation identifier.
    pub conversation_id: String,
    /// The model tag the session is bound to.
    pub model: String,
    /// Capability names available to the session.
    pub tools: Vec<String>,
    /// Free-form key/value context forwarded to the backend.
    pub context: HashMap<String, String>,
}

/// Per-request context that flows through the middleware chain.
///
/// The context is mutable while the chain runs: the authenticator writes the
/// principal, handlers may set the subject, and any layer can attach typed
/// metadata. Handlers receive a clone once the chain reaches them.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// The authenticated principal, set by the authenticator on success.
    principal_id: Option<String>,

    /// The agent or session the request concerns, set by handlers.
    subject_id: Option<String>,

    /// Monotonic timestamp taken at creation.
    started_at: Instant,

    /// Open metadata written by any layer.
    metadata: HashMap<String, serde_json::Value>,

    /// Session state attached when a session header names a live session.
    session: Option<SessionSnapshot>,
}

impl RequestContext {
    /// Creates a new request context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            principal_id: None,
            subject_id: None,
            started_at: Instant::now(),
            metadata: HashMap::new(),
            session: None,
        }
    }

    /// Creates a context with a specific request ID.
    ///
    /// Useful when the ID was provided by a client or an upstream proxy.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            ..Self::new()
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the authenticated principal, if any.
    #[must_use]
    pub fn principal_id(&self) -> Option<&str> {
        self.principal_id.as_deref()
    }

    /// Sets the authenticated principal.
    ///
    /// Only the authenticator should call this.
    pub fn set_principal_id(&mut self, principal_id: impl Into<String>) {
        self.principal_id = Some(principal_id.into());
    }

    /// Returns the subject this request concerns, if set.
    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// Sets the subject this request concerns.
    pub fn set_subject_id(&mut self, subject_id: impl Into<String>) {
        self.subject_id = Some(subject_id.into());
    }

    /// Returns the session snapshot, if one was attached.
    #[must_use]
    pub fn session(&self) -> Option<&SessionSnapshot> {
        self.session.as_ref()
    }

    /// Attaches a session snapshot.
    pub fn set_session(&mut self, snapshot: SessionSnapshot) {
        self.session = Some(snapshot);
    }

    /// Reads a metadata entry.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Writes a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
