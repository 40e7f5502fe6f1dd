//! Request validation.
//!
//! Enforces size, header, content-type, and body-shape constraints before
//! handlers consume the body. The JSON body is parsed for validation only;
//! downstream layers see the exact original bytes.

use hermes_core::{HermesError, HermesResult, RequestContext, ValidationConfig};
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use http::Method;
use parking_lot::RwLock;

use crate::middleware::{BoxFuture, HandlerResult, Middleware, Next};
use crate::types::Request;

/// Content types accepted for requests with bodies.
const SUPPORTED_CONTENT_TYPES: [&str; 4] = [
    "application/json",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "text/plain",
];

/// Maximum length of a single string value in strict mode.
const MAX_STRING_LENGTH: usize = 10_000;

/// The request validation stage.
pub struct ValidationStage {
    config: RwLock<ValidationConfig>,
}

impl ValidationStage {
    /// Creates the stage with the given configuration.
    #[must_use]
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Reapplies a configuration snapshot.
    pub fn configure(&self, config: ValidationConfig) {
        *self.config.write() = config;
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> ValidationConfig {
        self.config.read().clone()
    }

    /// Runs every configured check against the request.
    fn validate(&self, request: &Request) -> HermesResult<()> {
        let config = self.config.read().clone();

        self.check_size(&config, request)?;
        if config.validate_headers {
            self.check_headers(&config, request)?;
        }
        if request.method() == Method::POST || request.method() == Method::PUT {
            self.check_content_type(request)?;
        }
        if has_json_body(request) {
            self.check_json(&config, request.body())?;
        }
        Ok(())
    }

    fn check_size(&self, config: &ValidationConfig, request: &Request) -> HermesResult<()> {
        if config.max_request_size == 0 {
            return Ok(());
        }

        let declared = request
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let size = declared.unwrap_or(request.body().len()).max(request.body().len());

        if size > config.max_request_size {
            return Err(HermesError::validation(format!(
                "request size {size} exceeds maximum allowed size {}",
                config.max_request_size
            )));
        }
        Ok(())
    }

    fn check_headers(&self, config: &ValidationConfig, request: &Request) -> HermesResult<()> {
        if config.strict_mode {
            let user_agent = request
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if user_agent.is_empty() {
                return Err(HermesError::validation("missing User-Agent header"));
            }
        }

        let path = request.uri().path();
        if path.starts_with("/api/") || path.starts_with("/v1/") {
            if let Some(accept) = request.headers().get(ACCEPT).and_then(|v| v.to_str().ok()) {
                if !accept.contains("application/json") && !accept.contains("*/*") {
                    return Err(HermesError::validation(format!(
                        "unsupported Accept header: {accept}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_content_type(&self, request: &Request) -> HermesResult<()> {
        if request.body().is_empty() {
            return Ok(());
        }

        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if content_type.is_empty() {
            return Err(HermesError::validation("missing Content-Type header"));
        }

        if SUPPORTED_CONTENT_TYPES
            .iter()
            .any(|supported| content_type.starts_with(supported))
        {
            Ok(())
        } else {
            Err(HermesError::validation(format!(
                "unsupported Content-Type: {content_type}"
            )))
        }
    }

    fn check_json(&self, config: &ValidationConfig, body: &[u8]) -> HermesResult<()> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| HermesError::validation(format!("invalid JSON: {e}")))?;

        if config.strict_mode {
            check_json_structure(&value)?;
        }
        Ok(())
    }
}

/// Recursively validates JSON shape in strict mode: object keys must be
/// non-empty and string values bounded.
fn check_json_structure(value: &serde_json::Value) -> HermesResult<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                if key.is_empty() {
                    return Err(HermesError::validation("empty object key not allowed"));
                }
                check_json_structure(nested)?;
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                check_json_structure(item)?;
            }
            Ok(())
        }
        serde_json::Value::String(s) if s.len() > MAX_STRING_LENGTH => Err(
            HermesError::validation(format!("string value too long: {} characters", s.len())),
        ),
        _ => Ok(()),
    }
}

fn has_json_body(request: &Request) -> bool {
    !request.body().is_empty()
        && request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"))
}

impl Middleware for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
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
            self.validate(&request)?;

            ctx.set_metadata(
                "validation",
                serde_json::json!({
                    "strict_mode": self.config.read().strict_mode,
                }),
            );

            // The request passes through untouched: handlers see the exact
            // payload bytes, not a re-serialized form.
            next.run(ctx, request).await
        })
    }
}
