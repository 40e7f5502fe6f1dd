//! Hermes: an HTTP control plane for a conversational agent backend.
//!
//! Fronts an interactive agent behind a uniform request/response API with
//! real-time push channels (WebSocket and SSE) for many concurrent
//! clients.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use hermes::{HermesConfig, Orchestrator, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     hermes::init_logging(&hermes::LogConfig::default()).ok();
//!
//!     let orchestrator = Orchestrator::new(HermesConfig::from_env())?;
//!     let server = Server::new(ServerConfig::from_env(), orchestrator);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub use hermes_core::{
    ApiEnvelope, AuthConfig, AuthMode, HermesConfig, HermesError, HermesResult, RecoveryConfig,
    RequestContext, RequestId, SessionConfig, SessionSnapshot, ShaperConfig, ShutdownSignal,
    SyncConfig, ValidationConfig,
};
pub use hermes_middleware::{Chain, Middleware, Responder};
pub use hermes_server::{init_logging, LogConfig, Orchestrator, Server, ServerConfig};
pub use hermes_session::{Session, SessionRegistry, SessionStatus};
pub use hermes_sync::{Envelope, EnvelopeKind, HubSnapshot, SyncHub};
