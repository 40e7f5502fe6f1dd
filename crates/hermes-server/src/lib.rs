//! HTTP server and orchestrator for the Hermes control plane.
//!
//! The [`Orchestrator`] assembles the middleware chain in its fixed order,
//! owns the sync hub and session registry, and exposes lifecycle
//! `start`/`stop` plus hot reconfiguration. The [`Server`] is a thin
//! hyper HTTP/1 accept loop that buffers request bodies and hands them to
//! the orchestrator; SIGINT and SIGTERM trigger a graceful stop.

pub mod handlers;
pub mod logging;
pub mod orchestrator;
pub mod router;
pub mod server;

pub use logging::{init_logging, LogConfig};
pub use orchestrator::Orchestrator;
pub use router::{RouteMatch, Router};
pub use server::{Server, ServerConfig, ServerError};
