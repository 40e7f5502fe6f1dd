//! The HTTP server.
//!
//! A hyper HTTP/1 accept loop. Each connection is served on its own task
//! with upgrade support enabled so the sync stage can take over WebSocket
//! handshakes. Request bodies are buffered before the chain runs so the
//! validator can inspect and re-expose the exact payload.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hermes_core::{RequestContext, ShutdownSignal, TaskTracker};
use hermes_middleware::{full_body, Response};
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::orchestrator::Orchestrator;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// How long `stop` waits for in-flight work.
    pub shutdown_timeout: Duration,
    /// Deadline for collecting one request body.
    pub body_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            shutdown_timeout: Duration::from_secs(30),
            body_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Builds the default configuration with `HERMES_PORT` applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("HERMES_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.bind_addr = format!("0.0.0.0:{port}");
            }
        }
        config
    }
}

/// Server error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Failed to bind the configured address.
    Bind(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(msg) => write!(f, "bind error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// The Hermes HTTP server.
pub struct Server {
    config: ServerConfig,
    orchestrator: Arc<Orchestrator>,
}

impl Server {
    /// Creates a server around an orchestrator.
    #[must_use]
    pub fn new(config: ServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Binds the listener, returning the bound address alongside the
    /// running handle. Useful when binding port 0.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let addr: SocketAddr = self
            .config
            .bind_addr
            .parse()
            .map_err(|e| ServerError::Bind(format!("invalid address {}: {e}", self.config.bind_addr)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        info!(%local_addr, "server listening");
        Ok(BoundServer {
            config: self.config,
            orchestrator: self.orchestrator,
            listener,
            local_addr,
        })
    }

    /// Runs until SIGINT or SIGTERM, then stops with the configured
    /// shutdown deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        let bound = self.bind().await?;
        bound.run_with_shutdown(ShutdownSignal::with_os_signals()).await;
        Ok(())
    }
}

/// A server with its listener bound.
pub struct BoundServer {
    config: ServerConfig,
    orchestrator: Arc<Orchestrator>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundServer")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl BoundServer {
    /// Returns the bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the shutdown signal triggers, then stops
    /// the orchestrator and waits for in-flight connections.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) {
        self.orchestrator.start();
        let connections = TaskTracker::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, remote_addr)) => {
                            let orchestrator = Arc::clone(&self.orchestrator);
                            let body_timeout = self.config.body_timeout;
                            let token = connections.acquire();

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |request: hyper::Request<Incoming>| {
                                    let orchestrator = Arc::clone(&orchestrator);
                                    async move {
                                        serve_request(orchestrator, request, body_timeout).await
                                    }
                                });

                                let connection = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .with_upgrades();
                                if let Err(e) = connection.await {
                                    debug!(%remote_addr, "connection ended with error: {e}");
                                }
                                drop(token);
                            });
                        }
                        Err(e) => {
                            error!("failed to accept connection: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        self.orchestrator.stop(self.config.shutdown_timeout).await;

        if tokio::time::timeout(self.config.shutdown_timeout, connections.wait_idle())
            .await
            .is_err()
        {
            warn!(
                active = connections.active(),
                "connections still open at shutdown deadline",
            );
        }
        info!("server stopped");
    }
}

/// Buffers one request and runs it through the chain.
///
/// Extensions (including hyper's upgrade handle) survive the rebuild, so
/// the sync stage can still complete WebSocket handshakes.
async fn serve_request(
    orchestrator: Arc<Orchestrator>,
    request: hyper::Request<Incoming>,
    body_timeout: Duration,
) -> Result<Response, std::convert::Infallible> {
    let mut ctx = RequestContext::new();
    let (parts, body) = request.into_parts();

    let collected = tokio::time::timeout(body_timeout, body.collect()).await;
    let bytes = match collected {
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) => {
            debug!(request_id = %ctx.request_id(), "failed to read request body: {e}");
            return Ok(plain_error(
                StatusCode::BAD_REQUEST,
                "BODY_READ_ERROR",
                "failed to read request body",
                &ctx,
            ));
        }
        Err(_) => {
            debug!(request_id = %ctx.request_id(), "request body read timed out");
            return Ok(plain_error(
                StatusCode::REQUEST_TIMEOUT,
                "REQUEST_TIMEOUT",
                "request body read timed out",
                &ctx,
            ));
        }
    };

    let request = http::Request::from_parts(parts, bytes);
    Ok(orchestrator.handle(&mut ctx, request).await)
}

/// A bare envelope for failures before the chain can run.
fn plain_error(status: StatusCode, code: &str, message: &str, ctx: &RequestContext) -> Response {
    let envelope = hermes_core::ApiEnvelope::error(ctx.request_id(), code, message);
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .unwrap_or_else(|_| http::Response::new(full_body(Bytes::new())))
}
