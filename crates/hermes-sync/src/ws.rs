//! WebSocket upgrade and per-connection tasks.
//!
//! The upgrade handshake follows RFC 6455: the `Sec-WebSocket-Accept`
//! value is derived with SHA-1 over the client key and the protocol GUID.
//! After the 101 response, each connection runs two tasks: a **reader**
//! enforcing a 60-second deadline refreshed by any inbound traffic, and a
//! **writer** enforcing a 10-second deadline per frame. Either task exiting
//! unregisters the connection; removal at the hub is idempotent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hermes_core::HermesError;
use hermes_middleware::{empty_body, Request, Response};
use http::{header, StatusCode};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};
use tungstenite::protocol::Role;
use tungstenite::Message;

use crate::connection::ConnectionId;
use crate::envelope::Envelope;
use crate::hub::SyncHub;

/// The WebSocket handshake GUID from RFC 6455.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Read deadline, refreshed by any inbound traffic.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Write deadline per outbound frame.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<TokioIo<Upgraded>>;

/// Checks whether a request asks for a WebSocket upgrade.
pub fn is_upgrade_request(request: &Request) -> bool {
    let connection_upgrade = request
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let upgrade_websocket = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// Validates the handshake headers and computes the accept key.
///
/// # Errors
///
/// Returns a validation error naming the missing or invalid header.
pub fn validate_upgrade(request: &Request) -> Result<String, HermesError> {
    if !is_upgrade_request(request) {
        return Err(HermesError::validation(
            "missing Connection: Upgrade or Upgrade: websocket header",
        ));
    }

    let version = request
        .headers()
        .get("Sec-WebSocket-Version")
        .and_then(|v| v.to_str().ok());
    if version != Some("13") {
        return Err(HermesError::validation(
            "missing or invalid Sec-WebSocket-Version header (must be 13)",
        ));
    }

    let client_key = request
        .headers()
        .get("Sec-WebSocket-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HermesError::validation("missing Sec-WebSocket-Key header"))?;

    Ok(accept_key(client_key))
}

/// Computes the `Sec-WebSocket-Accept` value for a client key.
fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Builds the 101 Switching Protocols response.
#[must_use]
pub fn upgrade_response(accept: &str) -> Response {
    http::Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header("Sec-WebSocket-Accept", accept)
        .body(empty_body())
        .expect("static response must build")
}

/// Everything a connection's tasks need from the accept path.
pub struct ConnectionTasks {
    /// The connection being served.
    pub id: ConnectionId,
    /// The principal bound at upgrade time.
    pub principal_id: Option<String>,
    /// Shared subject cell, replaced by `subscribe` messages.
    pub subject: Arc<RwLock<Option<String>>>,
    /// Shared liveness cell, refreshed by inbound traffic.
    pub liveness: Arc<RwLock<Instant>>,
    /// Weak sender for pong replies; the registry holds the strong side.
    pub reply: mpsc::WeakSender<Envelope>,
    /// Receiving half of the outbound queue.
    pub outbound: mpsc::Receiver<Envelope>,
}

/// Spawns the reader and writer tasks once the HTTP upgrade completes.
pub fn spawn_connection(hub: Arc<SyncHub>, on_upgrade: OnUpgrade, tasks: ConnectionTasks) {
    let tracker = hub.tracker();

    tokio::spawn(async move {
        let _token = tracker.acquire();

        let ConnectionTasks {
            id,
            principal_id,
            subject,
            liveness,
            reply,
            outbound,
        } = tasks;

        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!(connection_id = %id, "websocket upgrade failed: {e}");
                hub.unregister(id).await;
                return;
            }
        };

        let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
        let (sink, stream) = ws.split();

        let writer_hub = Arc::clone(&hub);
        let writer_tracker = writer_hub.tracker();
        tokio::spawn(async move {
            let _token = writer_tracker.acquire();
            run_writer(id, sink, outbound).await;
            writer_hub.unregister(id).await;
        });

        let reader = ReaderState {
            id,
            principal_id,
            subject,
            liveness,
            reply,
        };
        run_reader(&hub, stream, &reader).await;
        hub.unregister(id).await;
    });
}

/// State shared with the reader task.
struct ReaderState {
    id: ConnectionId,
    principal_id: Option<String>,
    subject: Arc<RwLock<Option<String>>>,
    liveness: Arc<RwLock<Instant>>,
    reply: mpsc::WeakSender<Envelope>,
}

/// Drains the outbound queue onto the socket.
///
/// Exits when the hub drops the queue's senders (shutdown or slow-consumer
/// drop), or on any write error or deadline miss.
async fn run_writer(
    id: ConnectionId,
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = outbound.recv().await {
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection_id = %id, "failed to encode envelope: {e}");
                continue;
            }
        };

        match timeout(WRITE_DEADLINE, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection_id = %id, "websocket write failed: {e}");
                return;
            }
            Err(_) => {
                debug!(connection_id = %id, "websocket write missed its deadline");
                return;
            }
        }
    }

    // Queue closed: the hub dropped us. Say goodbye best-effort.
    let _ = timeout(WRITE_DEADLINE, sink.send(Message::Close(None))).await;
}

/// Reads inbound frames until the peer goes away, a deadline passes, or
/// shutdown begins.
async fn run_reader(hub: &Arc<SyncHub>, mut stream: SplitStream<WsStream>, reader: &ReaderState) {
    let shutdown = hub.shutdown_signal();

    loop {
        let frame = tokio::select! {
            frame = timeout(READ_DEADLINE, stream.next()) => frame,
            _ = shutdown.recv() => break,
        };

        match frame {
            Err(_) => {
                debug!(connection_id = %reader.id, "websocket read deadline passed");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %reader.id, "websocket read failed: {e}");
                break;
            }
            Ok(Some(Ok(message))) => {
                *reader.liveness.write() = Instant::now();
                match message {
                    Message::Text(text) => handle_inbound(hub, reader, &text).await,
                    Message::Close(_) => break,
                    // Ping/pong refresh liveness; the transport answers
                    // pings on its own.
                    _ => {}
                }
            }
        }
    }
}

/// An inbound client message.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Dispatches one inbound text frame.
///
/// `ping` gets an immediate pong on the same connection; `subscribe`
/// replaces the connection's subject; anything else is forwarded to the
/// broadcast channel tagged with the sender.
async fn handle_inbound(hub: &Arc<SyncHub>, reader: &ReaderState, text: &str) {
    let message: InboundMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(connection_id = %reader.id, "ignoring unparseable client message: {e}");
            return;
        }
    };

    match message.kind.as_str() {
        "ping" => {
            if let Some(sender) = reader.reply.upgrade() {
                let _ = sender.try_send(Envelope::pong(&reader.id.to_string()));
            }
        }
        "subscribe" => {
            if let Some(subject) = message.data.get("subject_id").and_then(|v| v.as_str()) {
                debug!(connection_id = %reader.id, subject_id = subject, "subscription replaced");
                *reader.subject.write() = Some(subject.to_string());
            }
        }
        other => {
            let mut envelope = Envelope::custom(message.data)
                .with_client(reader.id.to_string())
                .with_metadata(serde_json::json!({ "client_type": other }));
            if let Some(principal) = &reader.principal_id {
                envelope = envelope.with_principal(principal.clone());
            }
            let _ = hub.broadcast(envelope).await;
        }
    }
}
