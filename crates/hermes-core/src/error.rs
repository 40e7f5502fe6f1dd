//! Error types for the Hermes control plane.
//!
//! Every layer surfaces failures as a [`HermesError`]; the HTTP status and
//! machine-readable code are derived from the variant, never chosen ad hoc.
//! Only the outermost recovery layer converts unexpected failures (panics)
//! into an `INTERNAL_SERVER_ERROR` envelope.

use http::StatusCode;
use thiserror::Error;

/// Result type alias using [`HermesError`].
pub type HermesResult<T> = Result<T, HermesError>;

/// The single error sum used across the control plane.
#[derive(Error, Debug)]
pub enum HermesError {
    /// Authentication failed: missing or malformed credential, expired
    /// claims, unknown key.
    #[error("{message}")]
    Authentication {
        /// Single-line failure reason. Must not leak more than that.
        message: String,
    },

    /// Request validation failed: size, headers, content type, or body shape.
    #[error("{message}")]
    Validation {
        /// Message identifying the offending constraint.
        message: String,
    },

    /// A named resource does not exist.
    #[error("{message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// The backend agent failed: retries exhausted or a non-OK reply body.
    #[error("{message}")]
    Backend {
        /// Human-readable error message, including the backend's reply.
        message: String,
        /// Additional detail, e.g. the backend status line.
        details: Option<String>,
    },

    /// An unexpected internal failure.
    #[error("{message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error, never exposed to clients.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// An explicitly reported HTTP status with a message.
    ///
    /// Used where a handler knows the status but the failure does not fit a
    /// richer variant, e.g. 405 on an unsupported method.
    #[error("{message}")]
    Status {
        /// The HTTP status to report.
        status: StatusCode,
        /// Human-readable error message.
        message: String,
    },
}

impl HermesError {
    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            details: None,
        }
    }

    /// Creates a backend error with additional detail.
    #[must_use]
    pub fn backend_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an error for an explicitly reported status.
    #[must_use]
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Backend { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Status { status, .. } => *status,
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "UNAUTHORIZED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Backend { .. } => "CLAUDE_ERROR",
            Self::Internal { .. } => "INTERNAL_SERVER_ERROR",
            Self::Status { status, .. } => code_for_status(*status),
        }
    }

    /// Returns additional detail for the error envelope, if any.
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Backend { details, .. } => details.as_deref(),
            _ => None,
        }
    }
}

/// Maps an HTTP status to its machine-readable code.
#[must_use]
pub fn code_for_status(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "BAD_REQUEST",
        StatusCode::UNAUTHORIZED => "UNAUTHORIZED",
        StatusCode::FORBIDDEN => "FORBIDDEN",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::METHOD_NOT_ALLOWED => "METHOD_NOT_ALLOWED",
        StatusCode::REQUEST_TIMEOUT => "REQUEST_TIMEOUT",
        StatusCode::CONFLICT => "CONFLICT",
        StatusCode::UNPROCESSABLE_ENTITY => "UNPROCESSABLE_ENTITY",
        StatusCode::TOO_MANY_REQUESTS => "RATE_LIMITED",
        StatusCode::INTERNAL_SERVER_ERROR => "INTERNAL_SERVER_ERROR",
        StatusCode::BAD_GATEWAY => "BAD_GATEWAY",
        StatusCode::SERVICE_UNAVAILABLE => "SERVICE_UNAVAILABLE",
        StatusCode::GATEWAY_TIMEOUT => "GATEWAY_TIMEOUT",
        _ => "UNKNOWN_ERROR",
    }
}
