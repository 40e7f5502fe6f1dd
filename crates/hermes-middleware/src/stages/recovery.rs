//! Error recovery.
//!
//! The outermost chain stage. Guarantees that every request terminates with
//! a standard envelope: explicit errors from downstream layers are rendered
//! through the status-to-code mapping, and panics are captured and turned
//! into a 500-class envelope.
//!
//! Sanitization, message detail, and stack inclusion are gated by three
//! independent configuration flags.

use std::sync::Arc;

use futures_util::FutureExt;
use hermes_core::{HermesError, RecoveryConfig, RequestContext};
use http::header::ORIGIN;
use http::HeaderValue;
use parking_lot::RwLock;

use crate::middleware::{BoxFuture, HandlerResult, Middleware, Next};
use crate::stages::shaper::Responder;
use crate::types::{Request, Response};

/// Substrings redacted from error messages when sanitization is on.
const SENSITIVE_KEYS: [&str; 6] = ["password", "token", "key", "secret", "auth", "credential"];

/// Replacement for redacted substrings.
const REDACTED: &str = "[REDACTED]";

/// The error recovery stage.
pub struct RecoveryStage {
    config: RwLock<RecoveryConfig>,
    responder: Arc<Responder>,
}

impl RecoveryStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: RecoveryConfig, responder: Arc<Responder>) -> Self {
        Self {
            config: RwLock::new(config),
            responder,
        }
    }

    /// Reapplies a configuration snapshot.
    pub fn configure(&self, config: RecoveryConfig) {
        *self.config.write() = config;
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> RecoveryConfig {
        self.config.read().clone()
    }

    /// Renders an explicit error into an envelope response.
    ///
    /// Errors short-circuit the chain below the shaper, so the standard
    /// header decoration is applied here; error envelopes carry the same
    /// security, CORS, and correlation headers as successes.
    pub fn render_error(
        &self,
        ctx: &RequestContext,
        origin: Option<&HeaderValue>,
        err: &HermesError,
    ) -> Response {
        let config = self.config.read().clone();

        let mut message = err.to_string();
        if config.sanitize_secrets {
            message = sanitize_message(&message);
        }

        let details = if config.detailed_errors {
            err.details().map(|d| {
                if config.sanitize_secrets {
                    sanitize_message(d)
                } else {
                    d.to_string()
                }
            })
        } else {
            None
        };

        let stack = if config.detailed_errors && config.include_stack {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        };

        if config.log_errors {
            tracing::error!(
                request_id = %ctx.request_id(),
                code = err.code(),
                status = %err.status_code(),
                "request failed: {message}",
            );
        }

        let mut response = self
            .responder
            .error_detailed(ctx, err.status_code(), err.code(), message, details, stack);
        self.responder.decorate(ctx, origin, &mut response);
        response
    }

    /// Renders a recovered panic into a 500 envelope.
    fn render_panic(
        &self,
        ctx: &RequestContext,
        origin: Option<&HeaderValue>,
        payload: &str,
    ) -> Response {
        let config = self.config.read().clone();

        if config.log_errors {
            let logged = if config.sanitize_secrets {
                sanitize_message(payload)
            } else {
                payload.to_string()
            };
            tracing::error!(request_id = %ctx.request_id(), "panic recovered: {logged}");
        }

        let stack = if config.detailed_errors && config.include_stack {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        };

        let mut response = self.responder.error_detailed(
            ctx,
            http::StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Internal server error",
            None,
            stack,
        );
        self.responder.decorate(ctx, origin, &mut response);
        response
    }
}

impl Middleware for RecoveryStage {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn enabled(&self) -> bool {
        self.config.read().enabled
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let origin = request.headers().get(ORIGIN).cloned();

            let outcome = std::panic::AssertUnwindSafe(next.run(ctx, request))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Ok(self.render_error(ctx, origin.as_ref(), &err)),
                Err(panic) => {
                    let payload = panic_message(panic.as_ref());
                    Ok(self.render_panic(ctx, origin.as_ref(), &payload))
                }
            }
        })
    }
}

/// Extracts a printable message from a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Redacts sensitive substrings from a message, case-insensitively.
#[must_use]
pub fn sanitize_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for key in SENSITIVE_KEYS {
        sanitized = redact_case_insensitive(&sanitized, key);
    }
    sanitized
}

fn redact_case_insensitive(haystack: &str, needle: &str) -> String {
    let lower = haystack.to_lowercase();
    let mut result = String::with_capacity(haystack.len());
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(needle) {
        let start = cursor + found;
        // Byte offsets from the lowercase string are only safe to apply to
        // the original if lowercasing preserved lengths; fall back to a
        // whole-message redaction otherwise.
        if lower.len() != haystack.len() {
            return REDACTED.to_string();
        }
        result.push_str(&haystack[cursor..start]);
        result.push_str(REDACTED);
        cursor = start + needle.len();
    }
    result.push_str(&haystack[cursor..]);
    result
}
