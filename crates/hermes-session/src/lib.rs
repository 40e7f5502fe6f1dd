//! Agent session layer.
//!
//! Multiplexes per-session conversational state against the backend agent:
//! get-or-create sessions, forward messages with bounded retries, mirror
//! the backend's status, and evict idle sessions periodically.
//!
//! Session operations are seconds-scale, so the registry sits behind a
//! plain mutex rather than the hub's channel discipline.

pub mod backend;
pub mod registry;
pub mod session;
pub mod stage;

pub use backend::{BackendClient, BackendReply, ForwardRequest};
pub use registry::SessionRegistry;
pub use session::{Session, SessionStatus};
pub use stage::{SessionStage, SESSION_HEADER};
