//! Middleware chain for the Hermes control plane.
//!
//! The chain has a fixed order because each layer depends on invariants
//! established by the previous one:
//!
//! 1. **Recovery**: outermost; converts errors and panics into standard
//!    envelopes so every request terminates with a well-formed response.
//! 2. **Shaper**: decorates responses with safety and caching headers,
//!    handles compression and CORS preflight.
//! 3. **Auth**: verifies a bearer token or API key and writes the
//!    principal into the request context.
//! 4. **Validation**: enforces size, header, content-type, and body-shape
//!    constraints before handlers consume the body.
//!
//! The sync hub and the session layer plug into the same [`Middleware`]
//! contract from their own crates; the chain is an ordered list of stages
//! composed by the orchestrator.

pub mod chain;
pub mod middleware;
pub mod stages;
pub mod types;

pub use chain::{Chain, ChainBuilder};
pub use middleware::{BoxFuture, HandlerResult, Middleware, Next};
pub use stages::auth::{AuthStage, Authenticator};
pub use stages::recovery::{sanitize_message, RecoveryStage};
pub use stages::shaper::{Responder, ShaperStage};
pub use stages::validation::ValidationStage;
pub use types::{body_bytes, empty_body, full_body, BoxedBody, Request, Response, Streaming};
