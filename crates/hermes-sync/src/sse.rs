//! Server-sent event streaming.
//!
//! One-way subscribers receive envelopes as `data: <json>\n\n` frames over
//! a long-lived response body. The body wraps the receiving half of the
//! connection's bounded outbound queue: when the hub drops the sending
//! half (shutdown or slow-consumer drop), the stream ends and the response
//! completes.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use hermes_middleware::{Response, Streaming};
use http::{header, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;

use hermes_core::TaskToken;

use crate::envelope::Envelope;

/// A response body yielding envelopes as SSE frames.
///
/// Holds a [`TaskToken`] so shutdown can count the connection until the
/// client goes away and hyper drops the body.
pub struct EventStreamBody {
    receiver: mpsc::Receiver<Envelope>,
    _token: Option<TaskToken>,
}

impl EventStreamBody {
    /// Wraps the receiving half of an outbound queue.
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<Envelope>, token: Option<TaskToken>) -> Self {
        Self {
            receiver,
            _token: token,
        }
    }
}

impl Stream for EventStreamBody {
    type Item = Result<Frame<Bytes>, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(envelope)) => {
                let frame = match serde_json::to_string(&envelope) {
                    Ok(json) => format!("data: {json}\n\n"),
                    // Skip envelopes that cannot be encoded rather than
                    // killing the stream.
                    Err(_) => return self.poll_next(cx),
                };
                Poll::Ready(Some(Ok(Frame::data(Bytes::from(frame)))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Builds the SSE response around an outbound queue.
#[must_use]
pub fn sse_response(receiver: mpsc::Receiver<Envelope>, token: Option<TaskToken>) -> Response {
    let body = StreamBody::new(EventStreamBody::new(receiver, token)).boxed();

    let mut response = http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .expect("static response must build");
    response.extensions_mut().insert(Streaming);
    response
}
