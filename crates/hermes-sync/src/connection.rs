//! Connection types.
//!
//! A [`ClientHandle`] is the hub's view of one live subscriber: its
//! identity, filter keys, and the sending half of its bounded outbound
//! queue. The receiving half lives with the per-connection writer task
//! (WebSocket) or the response body (SSE).

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::envelope::Envelope;

/// A unique identifier for a push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The transport a subscriber is connected over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// A duplex WebSocket connection.
    Duplex,
    /// A one-way server-sent event stream.
    EventStream,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplex => write!(f, "websocket"),
            Self::EventStream => write!(f, "sse"),
        }
    }
}

/// The hub's handle to one live subscriber.
///
/// The subject is shared interior-mutable state: the connection's reader
/// task replaces it on `subscribe`, while the supervisor reads it during
/// fan-out filtering. The registry itself is still owned exclusively by the
/// supervisor.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    transport: Transport,
    principal_id: Option<String>,
    subject: Arc<RwLock<Option<String>>>,
    sender: mpsc::Sender<Envelope>,
    last_liveness: Arc<RwLock<Instant>>,
}

impl ClientHandle {
    /// Creates a handle for a new subscriber.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        transport: Transport,
        principal_id: Option<String>,
        subject_id: Option<String>,
        sender: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            id,
            transport,
            principal_id,
            subject: Arc::new(RwLock::new(subject_id)),
            sender,
            last_liveness: Arc::new(RwLock::new(Instant::now())),
        }
    }

    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the bound principal, if any.
    #[must_use]
    pub fn principal_id(&self) -> Option<&str> {
        self.principal_id.as_deref()
    }

    /// Returns the current subject, if subscribed.
    #[must_use]
    pub fn subject_id(&self) -> Option<String> {
        self.subject.read().clone()
    }

    /// Returns the shared subject cell, for the reader task.
    #[must_use]
    pub fn subject_cell(&self) -> Arc<RwLock<Option<String>>> {
        Arc::clone(&self.subject)
    }

    /// Returns the sending half of the outbound queue.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.sender.clone()
    }

    /// Returns the shared liveness cell, for the reader task.
    #[must_use]
    pub fn liveness_cell(&self) -> Arc<RwLock<Instant>> {
        Arc::clone(&self.last_liveness)
    }

    /// Records inbound traffic on the connection.
    pub fn touch(&self) {
        *self.last_liveness.write() = Instant::now();
    }

    /// Returns how long the connection has been silent.
    #[must_use]
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_liveness.read().elapsed()
    }

    /// Applies the fan-out filter rule for an envelope.
    ///
    /// Both targets empty selects every connection; otherwise every
    /// non-empty target must equal the connection's corresponding field.
    #[must_use]
    pub fn wants(&self, envelope: &Envelope) -> bool {
        if envelope.principal_id.is_none() && envelope.subject_id.is_none() {
            return true;
        }

        if let Some(target) = &envelope.principal_id {
            if self.principal_id.as_deref() != Some(target.as_str()) {
                return false;
            }
        }
        if let Some(target) = &envelope.subject_id {
            if self.subject.read().as_deref() != Some(target.as_str()) {
                return false;
            }
        }
        true
    }

    /// Attempts a non-blocking enqueue onto the outbound queue.
    ///
    /// # Errors
    ///
    /// Returns the error from the underlying channel: the queue is full
    /// (slow consumer) or the receiver is gone (connection closed).
    pub fn try_enqueue(
        &self,
        envelope: Envelope,
    ) -> Result<(), mpsc::error::TrySendError<Envelope>> {
        self.sender.try_send(envelope)
    }
}
