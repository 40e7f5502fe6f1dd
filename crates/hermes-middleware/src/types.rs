//! Request and response type aliases shared across the chain.
//!
//! Bodies are collected into [`Bytes`] before the chain runs, so the
//! validator can inspect the exact payload and re-expose it unchanged.
//! Responses use a boxed body so both buffered payloads and event streams
//! fit the same type.

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

/// An HTTP request with a fully buffered body.
pub type Request = http::Request<Bytes>;

/// The response body type: buffered or streaming, never failing.
pub type BoxedBody = BoxBody<Bytes, Infallible>;

/// An HTTP response with a boxed body.
pub type Response = http::Response<BoxedBody>;

/// Response extension marking a body that must not be buffered.
///
/// Event-stream responses carry this marker so the shaper skips
/// compression, which would otherwise try to collect the body.
#[derive(Debug, Clone, Copy)]
pub struct Streaming;

/// Builds a buffered response body.
pub fn full_body(data: impl Into<Bytes>) -> BoxedBody {
    Full::new(data.into()).boxed()
}

/// Builds an empty response body.
#[must_use]
pub fn empty_body() -> BoxedBody {
    Empty::new().boxed()
}

/// Collects a boxed body into bytes.
///
/// Streaming bodies are drained to completion; buffered bodies return
/// immediately.
pub async fn body_bytes(body: BoxedBody) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}
