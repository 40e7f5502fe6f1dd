//! The standard HTTP response envelope.
//!
//! Every HTTP response body emitted by Hermes is an [`ApiEnvelope`]: a
//! success flag, the data or error payload, optional metadata, the request
//! ID for correlation, and a server-emitted timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::RequestId;
use crate::error::HermesError;

/// The uniform wire shape of every HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope {
    /// Whether the request succeeded.
    pub success: bool,

    /// The response payload. Present iff `success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// The error payload. Present iff `!success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Optional response metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaInfo>,

    /// Echo of the request context's ID.
    pub request_id: String,

    /// Server-emitted timestamp.
    pub timestamp: DateTime<Utc>,
}

impl ApiEnvelope {
    /// Builds a success envelope around a payload.
    #[must_use]
    pub fn success(request_id: RequestId, data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Builds an error envelope from a code and message.
    #[must_use]
    pub fn error(request_id: RequestId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorInfo {
                code: code.into(),
                message: message.into(),
                details: None,
                stack: None,
            }),
            meta: None,
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Builds an error envelope from a [`HermesError`].
    #[must_use]
    pub fn from_error(request_id: RequestId, err: &HermesError) -> Self {
        let mut envelope = Self::error(request_id, err.code(), err.to_string());
        if let (Some(info), Some(details)) = (envelope.error.as_mut(), err.details()) {
            info.details = Some(details.to_string());
        }
        envelope
    }

    /// Attaches metadata to the envelope.
    #[must_use]
    pub fn with_meta(mut self, meta: MetaInfo) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Detailed error information inside an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// A call-site trace, attached only when explicitly enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Optional response metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaInfo {
    /// API version string.
    pub version: String,
    /// Elapsed processing time, human readable.
    pub process_time: String,
    /// Rate-limit state, reserved at the envelope level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

/// Rate-limit information carried in response metadata.
///
/// Hermes reserves the shape; no enforcer lives in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Requests allowed per window.
    pub limit: u64,
    /// Requests remaining in the current window.
    pub remaining: u64,
    /// Unix timestamp at which the window resets.
    pub reset: u64,
}
