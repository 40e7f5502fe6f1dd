//! The session chain stage.
//!
//! Intercepts session-path requests (`/claude/...`); every other request
//! passes through, with the session snapshot attached to the context when
//! the session header names a live session.

use std::sync::Arc;

use hermes_core::{HermesError, RequestContext};
use hermes_middleware::{BoxFuture, HandlerResult, Middleware, Next, Request, Responder};
use http::{Method, StatusCode};
use tracing::debug;

use crate::backend::{BackendClient, ForwardRequest};
use crate::registry::SessionRegistry;

/// Header that binds a request to an existing session.
pub const SESSION_HEADER: &str = "X-Agent-Session-ID";

/// The agent session stage.
pub struct SessionStage {
    registry: Arc<SessionRegistry>,
    backend: Arc<BackendClient>,
    responder: Arc<Responder>,
}

impl SessionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        backend: Arc<BackendClient>,
        responder: Arc<Responder>,
    ) -> Self {
        Self {
            registry,
            backend,
            responder,
        }
    }

    /// Returns the shared registry.
    #[must_use]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Returns the shared backend client.
    #[must_use]
    pub fn backend(&self) -> Arc<BackendClient> {
        Arc::clone(&self.backend)
    }

    async fn handle_message(&self, ctx: &RequestContext, request: &Request) -> HandlerResult {
        let forward: ForwardRequest = serde_json::from_slice(request.body())
            .map_err(|_| HermesError::validation("invalid session message format"))?;

        let session = self.registry.get_or_create(
            forward.session_id.as_deref(),
            forward.conversation_id.as_deref(),
            forward.model.as_deref(),
        );
        self.registry.merge_context(&session.session_id, &forward.context);
        let session = self
            .registry
            .get(&session.session_id)
            .unwrap_or(session);

        let reply = self
            .backend
            .forward(&session, &forward.message, forward.stream)
            .await?;

        self.registry.record_forward(&session.session_id, &reply.status);
        debug!(session_id = %session.session_id, "message forwarded");

        let data = serde_json::to_value(&reply)
            .map_err(|e| HermesError::internal_with_source("failed to encode backend reply", e))?;
        Ok(self.responder.success(ctx, data))
    }

    fn handle_get_session(&self, ctx: &RequestContext, request: &Request) -> HandlerResult {
        let session_id = query_param(request, "session_id")
            .ok_or_else(|| HermesError::validation("session_id is required"))?;

        let session = self
            .registry
            .get(&session_id)
            .ok_or_else(|| HermesError::not_found("session not found"))?;

        let data = serde_json::to_value(&session)
            .map_err(|e| HermesError::internal_with_source("failed to encode session", e))?;
        Ok(self.responder.success(ctx, data))
    }

    fn handle_delete(&self, path: &str) -> HandlerResult {
        let session_id = path.trim_start_matches("/claude/session/");
        if session_id.is_empty() {
            return Err(HermesError::validation("session_id is required"));
        }

        // Deleting an unknown or already-deleted session is a no-op; the
        // response is 204 either way.
        self.registry.delete(session_id);
        Ok(self.responder.no_content())
    }

    fn handle_status(&self, ctx: &RequestContext) -> HandlerResult {
        let config = self.backend.config();
        Ok(self.responder.success(
            ctx,
            serde_json::json!({
                "enabled": config.enabled,
                "endpoint": config.api_endpoint,
                "version": config.version,
                "session_count": self.registry.count(),
                "timestamp": chrono::Utc::now(),
            }),
        ))
    }

    async fn handle_session_path(
        &self,
        ctx: &RequestContext,
        request: &Request,
        path: &str,
    ) -> HandlerResult {
        let method = request.method();
        if method == Method::POST {
            if path == "/claude/message" {
                return self.handle_message(ctx, request).await;
            }
            Err(HermesError::not_found("session endpoint not found"))
        } else if method == Method::GET {
            match path {
                "/claude/session" => self.handle_get_session(ctx, request),
                "/claude/status" => self.handle_status(ctx),
                _ => Err(HermesError::not_found("session endpoint not found")),
            }
        } else if method == Method::DELETE {
            if path.starts_with("/claude/session/") {
                return self.handle_delete(path);
            }
            Err(HermesError::not_found("session endpoint not found"))
        } else {
            Err(HermesError::status(
                StatusCode::METHOD_NOT_ALLOWED,
                "method not allowed for session endpoint",
            ))
        }
    }
}

impl Middleware for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    fn enabled(&self) -> bool {
        self.backend.config().enabled
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            // Accept both the bare and the `/api`-prefixed forms.
            let path = request.uri().path().to_string();
            let normalized = path.strip_prefix("/api").unwrap_or(&path).to_string();

            if normalized.starts_with("/claude/") {
                return self.handle_session_path(ctx, &request, &normalized).await;
            }

            // Context threading: attach the session snapshot when the
            // header names a live session.
            if let Some(session_id) = request
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                if let Some(snapshot) = self.registry.snapshot(session_id) {
                    ctx.set_subject_id(snapshot.session_id.clone());
                    ctx.set_session(snapshot);
                }
            }

            next.run(ctx, request).await
        })
    }
}

fn query_param(request: &Request, name: &str) -> Option<String> {
    let query = request.uri().query()?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == name && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hermes_core::{ApiEnvelope, SessionConfig, ShaperConfig};
    use hermes_middleware::body_bytes;

    fn stage() -> SessionStage {
        // Point the backend at a closed port; tests that do not forward
        // never touch it.
        SessionStage::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(
                BackendClient::new(SessionConfig {
                    api_endpoint: "http://127.0.0.1:9/unused".to_string(),
                    max_retries: 0,
                    timeout_seconds: 1,
                    ..SessionConfig::default()
                })
                .with_backoff_unit(std::time::Duration::from_millis(1)),
            ),
            Arc::new(Responder::new(ShaperConfig::default())),
        )
    }

    fn ok_next<'a>() -> Next<'a> {
        Next::handler(|_ctx, _req| {
            Box::pin(async {
                Ok(http::Response::builder()
                    .status(StatusCode::OK)
                    .body(hermes_middleware::full_body("through"))
                    .unwrap())
            })
        })
    }

    fn get(path: &str) -> Request {
        http::Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Bytes::new())
            .unwrap()
    }

    async fn envelope_of(response: hermes_middleware::Response) -> ApiEnvelope {
        let bytes = body_bytes(response.into_body()).await;
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn get_session_requires_id() {
        let stage = stage();
        let mut ctx = RequestContext::new();

        let err = stage
            .process(&mut ctx, get("/claude/session"), ok_next())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn get_unknown_session_is_404() {
        let stage = stage();
        let mut ctx = RequestContext::new();

        let err = stage
            .process(&mut ctx, get("/claude/session?session_id=ghost"), ok_next())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_known_session_returns_it() {
        let stage = stage();
        stage.registry().get_or_create(Some("s-1"), None, None);
        let mut ctx = RequestContext::new();

        let response = stage
            .process(&mut ctx, get("/claude/session?session_id=s-1"), ok_next())
            .await
            .unwrap();
        let envelope = envelope_of(response).await;
        assert!(envelope.success);
        assert_eq!(envelope.data.unwrap()["session_id"], "s-1");
    }

    #[tokio::test]
    async fn delete_is_204_twice() {
        let stage = stage();
        stage.registry().get_or_create(Some("s-1"), None, None);
        let mut ctx = RequestContext::new();

        for _ in 0..2 {
            let request = http::Request::builder()
                .method(Method::DELETE)
                .uri("/claude/session/s-1")
                .body(Bytes::new())
                .unwrap();
            let response = stage
                .process(&mut ctx, request, ok_next())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert_eq!(stage.registry().count(), 0);
    }

    #[tokio::test]
    async fn status_reports_session_count() {
        let stage = stage();
        stage.registry().get_or_create(None, None, None);
        stage.registry().get_or_create(None, None, None);
        let mut ctx = RequestContext::new();

        let response = stage
            .process(&mut ctx, get("/claude/status"), ok_next())
            .await
            .unwrap();
        let envelope = envelope_of(response).await;
        assert_eq!(envelope.data.unwrap()["session_count"], 2);
    }

    #[tokio::test]
    async fn invalid_message_body_is_rejected() {
        let stage = stage();
        let mut ctx = RequestContext::new();

        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/claude/message")
            .body(Bytes::from("{\"no_message_field\":1}"))
            .unwrap();

        let err = stage
            .process(&mut ctx, request, ok_next())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let stage = stage();
        let mut ctx = RequestContext::new();

        let request = http::Request::builder()
            .method(Method::PUT)
            .uri("/claude/message")
            .body(Bytes::new())
            .unwrap();

        let err = stage
            .process(&mut ctx, request, ok_next())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unknown_session_endpoint_is_404() {
        let stage = stage();
        let mut ctx = RequestContext::new();

        let err = stage
            .process(&mut ctx, get("/claude/bogus"), ok_next())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn api_prefix_is_accepted() {
        let stage = stage();
        stage.registry().get_or_create(Some("s-9"), None, None);
        let mut ctx = RequestContext::new();

        let response = stage
            .process(
                &mut ctx,
                get("/api/claude/session?session_id=s-9"),
                ok_next(),
            )
            .await
            .unwrap();
        assert!(envelope_of(response).await.success);
    }

    #[tokio::test]
    async fn session_header_attaches_snapshot() {
        let stage = stage();
        stage
            .registry()
            .get_or_create(Some("s-7"), None, Some("claude-3-opus"));
        let mut ctx = RequestContext::new();

        let request = http::Request::builder()
            .method(Method::GET)
            .uri("/agents/a-1/status")
            .header(SESSION_HEADER, "s-7")
            .body(Bytes::new())
            .unwrap();

        let response = stage.process(&mut ctx, request, ok_next()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot = ctx.session().expect("snapshot should be attached");
        assert_eq!(snapshot.session_id, "s-7");
        assert_eq!(snapshot.model, "claude-3-opus");
    }

    #[tokio::test]
    async fn missing_session_header_passes_through_untouched() {
        let stage = stage();
        let mut ctx = RequestContext::new();

        let response = stage
            .process(&mut ctx, get("/agents/a-1/status"), ok_next())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.session().is_none());
    }
}
