//! Response shaping.
//!
//! The [`Responder`] builds enveloped responses for handlers: standard
//! success (200), created (201), no-content (204), and error writes. The
//! [`ShaperStage`] decorates every response that flows back through the
//! chain with safety and caching headers, CORS headers, processing time,
//! and gzip compression when the client advertises support.

use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;
use hermes_core::{ApiEnvelope, MetaInfo, RequestContext, ShaperConfig};
use http::header::{
    ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN,
};
use http::{HeaderValue, Method, StatusCode};
use parking_lot::RwLock;

use crate::middleware::{BoxFuture, HandlerResult, Middleware, Next};
use crate::types::{body_bytes, empty_body, full_body, Request, Response, Streaming};

/// The API version advertised on every response.
const API_VERSION: &str = "1.0";

/// Builds enveloped responses.
///
/// Handlers hold a shared `Responder` so success and error writes follow
/// the same configuration snapshot (standard format, metadata inclusion).
pub struct Responder {
    config: RwLock<ShaperConfig>,
}

impl Responder {
    /// Creates a responder with the given configuration.
    #[must_use]
    pub fn new(config: ShaperConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Reapplies a configuration snapshot.
    pub fn configure(&self, config: ShaperConfig) {
        *self.config.write() = config;
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> ShaperConfig {
        self.config.read().clone()
    }

    /// Writes a standard success response (200).
    #[must_use]
    pub fn success(&self, ctx: &RequestContext, data: serde_json::Value) -> Response {
        self.json(ctx, StatusCode::OK, data)
    }

    /// Writes a created response (201).
    #[must_use]
    pub fn created(&self, ctx: &RequestContext, data: serde_json::Value) -> Response {
        self.json(ctx, StatusCode::CREATED, data)
    }

    /// Writes a no-content response (204).
    #[must_use]
    pub fn no_content(&self) -> Response {
        http::Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(empty_body())
            .expect("static response must build")
    }

    /// Writes an error response with a code and message.
    ///
    /// Error bodies are always enveloped, even when `standard_format` is
    /// off, so clients can rely on the error shape.
    #[must_use]
    pub fn error(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Response {
        self.error_detailed(ctx, status, code, message, None, None)
    }

    /// Writes an error response with optional detail and stack fields.
    #[must_use]
    pub fn error_detailed(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
        stack: Option<String>,
    ) -> Response {
        let mut envelope = ApiEnvelope::error(ctx.request_id(), code, message);
        if let Some(info) = envelope.error.as_mut() {
            info.details = details;
            info.stack = stack;
        }
        envelope = self.attach_meta(ctx, envelope);
        self.write_json(ctx, status, &envelope)
    }

    fn json(&self, ctx: &RequestContext, status: StatusCode, data: serde_json::Value) -> Response {
        let standard = self.config.read().standard_format;
        if standard {
            let envelope = self.attach_meta(ctx, ApiEnvelope::success(ctx.request_id(), data));
            self.write_json(ctx, status, &envelope)
        } else {
            self.write_json(ctx, status, &data)
        }
    }

    fn attach_meta(&self, ctx: &RequestContext, envelope: ApiEnvelope) -> ApiEnvelope {
        if self.config.read().include_meta {
            envelope.with_meta(MetaInfo {
                version: API_VERSION.to_string(),
                process_time: format!("{:?}", ctx.elapsed()),
                rate_limit: None,
            })
        } else {
            envelope
        }
    }

    fn write_json<T: serde::Serialize>(
        &self,
        ctx: &RequestContext,
        status: StatusCode,
        value: &T,
    ) -> Response {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| {
            tracing::error!(request_id = %ctx.request_id(), "failed to encode response body");
            br#"{"success":false,"error":{"code":"ENCODING_ERROR","message":"failed to encode response"}}"#
                .to_vec()
        });

        http::Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(full_body(body))
            .expect("response with static headers must build")
    }

    /// Decorates a response with the standard header set: safety headers,
    /// API version, caching policy, request correlation, processing time,
    /// and CORS.
    ///
    /// The shaper applies this to everything flowing back through the
    /// chain; the recovery stage applies it to the error responses it
    /// renders, so 4xx/5xx envelopes carry the same headers as successes.
    pub fn decorate(
        &self,
        ctx: &RequestContext,
        origin: Option<&HeaderValue>,
        response: &mut Response,
    ) {
        let headers = response.headers_mut();
        headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
        headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
        headers.insert(
            "X-XSS-Protection",
            HeaderValue::from_static("1; mode=block"),
        );
        headers.insert("X-API-Version", HeaderValue::from_static(API_VERSION));

        let cache_control = self.config.read().cache_control.clone();
        if !cache_control.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&cache_control) {
                headers.insert(CACHE_CONTROL, value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(&ctx.request_id().to_string()) {
            headers.insert("X-Request-ID", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("{:?}", ctx.elapsed())) {
            headers.insert("X-Processing-Time", value);
        }

        apply_cors(origin, response);
    }
}

/// The response-shaping stage.
///
/// Runs second in the chain (inside recovery) and decorates everything that
/// flows back: headers first, then compression. CORS preflight requests are
/// answered here without touching the rest of the chain.
pub struct ShaperStage {
    responder: Arc<Responder>,
}

impl ShaperStage {
    /// Creates the stage around a shared responder.
    #[must_use]
    pub fn new(responder: Arc<Responder>) -> Self {
        Self { responder }
    }

    /// Returns the shared responder.
    #[must_use]
    pub fn responder(&self) -> Arc<Responder> {
        Arc::clone(&self.responder)
    }

    /// Compresses the response body when the client accepts gzip.
    async fn compress(&self, accept_encoding: Option<&str>, response: Response) -> Response {
        let level = self.responder.config.read().compression_level;
        let client_supports = accept_encoding.is_some_and(|v| v.contains("gzip"));

        let skip = level == 0
            || !client_supports
            || response.status() == StatusCode::SWITCHING_PROTOCOLS
            || response.status() == StatusCode::NO_CONTENT
            || response.extensions().get::<Streaming>().is_some()
            || response.headers().contains_key(CONTENT_ENCODING);
        if skip {
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let bytes = body_bytes(body).await;
        if bytes.is_empty() {
            return http::Response::from_parts(parts, empty_body());
        }

        let mut encoder = GzEncoder::new(Vec::new(), GzCompression::new(level.min(9)));
        if encoder.write_all(&bytes).is_err() {
            return http::Response::from_parts(parts, full_body(bytes));
        }
        match encoder.finish() {
            Ok(compressed) => {
                parts
                    .headers
                    .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                parts.headers.insert(
                    CONTENT_LENGTH,
                    HeaderValue::from_str(&compressed.len().to_string())
                        .expect("length is a valid header value"),
                );
                http::Response::from_parts(parts, full_body(compressed))
            }
            Err(_) => http::Response::from_parts(parts, full_body(bytes)),
        }
    }
}

impl Middleware for ShaperStage {
    fn name(&self) -> &'static str {
        "shaper"
    }

    fn enabled(&self) -> bool {
        self.responder.config.read().enabled
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let origin = request.headers().get(ORIGIN).cloned();

            if request.method() == Method::OPTIONS {
                let mut response = self.responder.no_content();
                apply_cors(origin.as_ref(), &mut response);
                return Ok(response);
            }

            let accept_encoding = request
                .headers()
                .get(ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);

            let mut response = next.run(ctx, request).await?;
            self.responder.decorate(ctx, origin.as_ref(), &mut response);
            Ok(self.compress(accept_encoding.as_deref(), response).await)
        })
    }
}

/// Applies CORS headers to a response.
fn apply_cors(origin: Option<&HeaderValue>, response: &mut Response) {
    let headers = response.headers_mut();
    match origin {
        Some(origin) => headers.insert("Access-Control-Allow-Origin", origin.clone()),
        None => headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*")),
    };
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static(
            "Accept, Authorization, Content-Type, X-API-Key, X-Agent-Session-ID",
        ),
    );
    headers.insert(
        "Access-Control-Expose-Headers",
        HeaderValue::from_static("X-Request-ID, X-Processing-Time"),
    );
    headers.insert(
        "Access-Control-Allow-Credentials",
        HeaderValue::from_static("true"),
    );
    headers.insert("Access-Control-Max-Age", HeaderValue::from_static("86400"));
}
