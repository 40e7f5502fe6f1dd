//! Hub error types.

use thiserror::Error;

/// Result type alias using [`SyncError`].
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the hub's public API.
///
/// Push-side errors (slow consumers, broken sockets) never surface here;
/// they only affect the subscriber in question.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The hub supervisor is not running or has shut down.
    #[error("sync hub is not running")]
    NotRunning,

    /// An envelope could not be encoded for the wire.
    #[error("failed to encode envelope: {0}")]
    Encoding(String),
}
