//! Real-time synchronization hub.
//!
//! A single-process in-memory broker that fans out envelopes to many
//! long-lived subscribers over WebSocket (duplex) and SSE (one-way)
//! transports.
//!
//! # Concurrency design
//!
//! All registry mutations happen on one supervisor task fed by three
//! channels (`register`, `unregister`, `broadcast`), which removes locks
//! from the fan-out path. Count queries read a snapshot behind a
//! readers-writer lock that only the supervisor writes.
//!
//! Outbound queues are bounded. A subscriber whose queue cannot accept an
//! envelope in non-blocking time is closed and unregistered immediately:
//! the hub prefers dropping a slow consumer over backpressuring the
//! producer, so one stalled socket cannot raise every other subscriber's
//! latency. Heartbeats count against queue capacity and trigger the same
//! policy.

pub mod connection;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod sse;
pub mod stage;
pub mod ws;

pub use connection::{ClientHandle, ConnectionId, Transport};
pub use envelope::{
    AgentStatusEvent, Envelope, EnvelopeKind, ErrorEvent, HeartbeatEvent, MessageUpdateEvent,
    SessionUpdateEvent,
};
pub use error::{SyncError, SyncResult};
pub use hub::{HubSnapshot, SyncHub};
pub use stage::SyncStage;
