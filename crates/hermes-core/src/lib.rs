//! Core types for the Hermes control plane.
//!
//! This crate defines the vocabulary shared by every other Hermes crate:
//!
//! - [`RequestId`] and [`RequestContext`]: per-request identity and metadata
//!   that flow through the middleware chain and into handlers.
//! - [`HermesError`]: the single error sum used across the control plane,
//!   with HTTP status and machine-readable code derivation.
//! - [`ApiEnvelope`]: the uniform wire shape of every HTTP response body.
//! - [`HermesConfig`]: the structured configuration record, one section per
//!   chain layer, validated at construction time.
//! - [`ShutdownSignal`] and [`TaskTracker`]: cooperative shutdown primitives
//!   shared by the hub, the session layer, and the server accept loop.

pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod shutdown;

pub use config::{
    AuthConfig, AuthMode, HermesConfig, RecoveryConfig, SessionConfig, ShaperConfig, SyncConfig,
    ValidationConfig,
};
pub use context::{RequestContext, RequestId, SessionSnapshot};
pub use envelope::{ApiEnvelope, ErrorInfo, MetaInfo, RateLimitInfo};
pub use error::{code_for_status, HermesError, HermesResult};
pub use shutdown::{ShutdownSignal, TaskToken, TaskTracker};
