//! The backend agent client.
//!
//! Forwards a session-bound message to the configured backend endpoint
//! with a per-request deadline. Transport errors and 5xx replies are
//! retried with linear backoff; any other non-OK reply is surfaced to the
//! caller immediately.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hermes_core::{HermesError, HermesResult, SessionConfig};

use crate::session::Session;

/// A client's forward request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForwardRequest {
    /// Existing session to reuse, if any.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Existing conversation to reuse, if any.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Model override for a new session.
    #[serde(default)]
    pub model: Option<String>,
    /// The message to forward.
    pub message: String,
    /// Capability names to attach.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Context entries to merge into the session.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Whether the backend should stream its reply.
    #[serde(default)]
    pub stream: bool,
}

/// The backend's reply to a forwarded message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendReply {
    /// The session the reply belongs to.
    pub session_id: String,
    /// The conversation the reply belongs to.
    pub conversation_id: String,
    /// The reply content.
    pub message: String,
    /// The backend's view of the session status.
    pub status: String,
    /// Capability names in effect.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Context echoed by the backend.
    #[serde(default)]
    pub context: serde_json::Value,
    /// Reply timestamp, stamped locally when the backend omits it.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

struct Inner {
    http: reqwest::Client,
    config: SessionConfig,
}

/// HTTP client for the backend agent endpoint.
pub struct BackendClient {
    inner: RwLock<Inner>,
    backoff_unit: Duration,
}

impl BackendClient {
    /// Creates a client for the configured endpoint.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                http: build_http(&config),
                config,
            }),
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Overrides the linear-backoff unit. Tests shrink it so retry
    /// behavior stays observable without multi-second sleeps.
    #[must_use]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Reapplies a configuration snapshot, rebuilding the pooled client.
    pub fn configure(&self, config: SessionConfig) {
        let mut inner = self.inner.write();
        inner.http = build_http(&config);
        inner.config = config;
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.inner.read().config.clone()
    }

    /// Forwards a message for a session, retrying on transport errors and
    /// 5xx replies.
    ///
    /// # Errors
    ///
    /// Returns a backend error when retries are exhausted or the backend
    /// replies with a non-5xx, non-OK status.
    pub async fn forward(
        &self,
        session: &Session,
        message: &str,
        stream: bool,
    ) -> HermesResult<BackendReply> {
        let (http, config) = {
            let inner = self.inner.read();
            (inner.http.clone(), inner.config.clone())
        };

        let payload = serde_json::json!({
            "session_id": session.session_id,
            "conversation_id": session.conversation_id,
            "model": session.model,
            "message": message,
            "tools": session.tools,
            "context": session.context,
            "stream": stream,
        });

        let mut last_failure = String::new();
        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_unit * attempt).await;
            }

            match http.post(&config.api_endpoint).json(&payload).send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_failure = format!("backend returned status {}", response.status());
                    debug!(
                        session_id = %session.session_id,
                        attempt,
                        status = %response.status(),
                        "backend reply is retryable",
                    );
                }
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    let mut reply: BackendReply = response.json().await.map_err(|e| {
                        HermesError::backend(format!("failed to decode backend reply: {e}"))
                    })?;
                    if reply.timestamp.is_none() {
                        reply.timestamp = Some(Utc::now());
                    }
                    return Ok(reply);
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(HermesError::backend_with_details(
                        format!("backend returned status {status}: {body}"),
                        status.to_string(),
                    ));
                }
                Err(e) => {
                    last_failure = format!("backend request failed: {e}");
                    debug!(session_id = %session.session_id, attempt, "transport error: {e}");
                }
            }
        }

        warn!(
            session_id = %session.session_id,
            retries = config.max_retries,
            "backend retries exhausted",
        );
        Err(HermesError::backend(format!(
            "retries exhausted: {last_failure}"
        )))
    }
}

fn build_http(config: &SessionConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .user_agent("hermes/1.0")
        .build()
        .unwrap_or_default()
}
