//! The sync chain stage.
//!
//! Intercepts upgrade and event-stream requests; every other request
//! passes through with hub statistics annotated on the context.

use std::sync::Arc;

use hermes_core::{HermesError, RequestContext};
use hermes_middleware::{BoxFuture, HandlerResult, Middleware, Next, Request};
use http::header::ACCEPT;
use http::StatusCode;
use hyper::upgrade::OnUpgrade;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::{ClientHandle, ConnectionId, Transport};
use crate::hub::SyncHub;
use crate::sse::sse_response;
use crate::ws::{self, ConnectionTasks};

/// The real-time synchronization stage.
pub struct SyncStage {
    hub: Arc<SyncHub>,
}

impl SyncStage {
    /// Creates the stage around a shared hub.
    #[must_use]
    pub fn new(hub: Arc<SyncHub>) -> Self {
        Self { hub }
    }

    /// Returns the shared hub.
    #[must_use]
    pub fn hub(&self) -> Arc<SyncHub> {
        Arc::clone(&self.hub)
    }

    /// Accepts a duplex subscription: validates the handshake, registers
    /// the connection, spawns its tasks, and returns the 101 response.
    async fn accept_websocket(
        &self,
        ctx: &RequestContext,
        mut request: Request,
    ) -> HandlerResult {
        let accept = ws::validate_upgrade(&request)?;

        let on_upgrade = request
            .extensions_mut()
            .remove::<OnUpgrade>()
            .ok_or_else(|| HermesError::internal("connection does not support upgrades"))?;

        let buffer_size = self.hub.config().buffer_size.max(1);
        let (tx, rx) = mpsc::channel(buffer_size);

        let id = ConnectionId::new();
        let handle = ClientHandle::new(
            id,
            Transport::Duplex,
            ctx.principal_id().map(String::from),
            subject_from_query(&request),
            tx.clone(),
        );
        let subject = handle.subject_cell();
        let liveness = handle.liveness_cell();

        self.hub.register(handle).await.map_err(|_| {
            HermesError::status(StatusCode::SERVICE_UNAVAILABLE, "hub is shutting down")
        })?;

        let tasks = ConnectionTasks {
            id,
            principal_id: ctx.principal_id().map(String::from),
            subject,
            liveness,
            reply: tx.downgrade(),
            outbound: rx,
        };
        // The registry entry owns the only strong sender; dropping it ends
        // the writer task.
        drop(tx);

        ws::spawn_connection(self.hub(), on_upgrade, tasks);
        debug!(request_id = %ctx.request_id(), connection_id = %id, "websocket accepted");

        Ok(ws::upgrade_response(&accept))
    }

    /// Accepts a one-way subscription and returns the streaming response.
    async fn accept_event_stream(&self, ctx: &RequestContext, request: &Request) -> HandlerResult {
        let buffer_size = self.hub.config().buffer_size.max(1);
        let (tx, rx) = mpsc::channel(buffer_size);

        let id = ConnectionId::new();
        let handle = ClientHandle::new(
            id,
            Transport::EventStream,
            ctx.principal_id().map(String::from),
            subject_from_query(request),
            tx,
        );

        self.hub.register(handle).await.map_err(|_| {
            HermesError::status(StatusCode::SERVICE_UNAVAILABLE, "hub is shutting down")
        })?;

        debug!(request_id = %ctx.request_id(), connection_id = %id, "event stream accepted");
        Ok(sse_response(rx, Some(self.hub.tracker().acquire())))
    }
}

impl Middleware for SyncStage {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn enabled(&self) -> bool {
        self.hub.config().enabled
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let config = self.hub.config();

            if config.websocket_enabled && ws::is_upgrade_request(&request) {
                return self.accept_websocket(ctx, request).await;
            }

            if config.sse_enabled && is_event_stream_request(&request) {
                return self.accept_event_stream(ctx, &request).await;
            }

            ctx.set_metadata(
                "sync",
                serde_json::json!({
                    "websocket_enabled": config.websocket_enabled,
                    "sse_enabled": config.sse_enabled,
                    "client_count": self.hub.client_count(),
                }),
            );
            next.run(ctx, request).await
        })
    }
}

/// Checks whether a request asks for a one-way event stream.
fn is_event_stream_request(request: &Request) -> bool {
    if request.uri().path() == "/events" {
        return true;
    }
    request
        .headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

/// Reads an initial subject from the `subject_id` query parameter.
fn subject_from_query(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("subject_id=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
