//! Endpoint handlers.
//!
//! The terminal dispatcher behind the middleware chain: requests that no
//! stage intercepted are matched against the route table and handled here.

use hermes_core::{HermesConfig, HermesError, RequestContext};
use hermes_middleware::{HandlerResult, Request};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::orchestrator::Orchestrator;
use crate::router::RouteMatch;

/// Credentials presented to `/auth/login`.
#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Body accepted by `/agents/{id}/messages`.
#[derive(Debug, Deserialize)]
struct AgentMessageRequest {
    /// The message content. `message` is accepted as an alias.
    #[serde(default, alias = "message")]
    content: String,
}

impl Orchestrator {
    /// Routes and executes one request that reached the end of the chain.
    pub(crate) async fn dispatch(&self, ctx: RequestContext, request: Request) -> HandlerResult {
        let path = request.uri().path().to_string();
        let matched = self
            .router
            .match_route(request.method(), &path)
            .ok_or_else(|| HermesError::not_found(format!("endpoint not found: {path}")))?;

        debug!(request_id = %ctx.request_id(), operation = matched.operation, "dispatching");

        match matched.operation {
            "health" => self.handle_health(&ctx),
            "middlewareStatus" => Ok(self.responder.success(&ctx, self.status())),
            "getMiddlewareConfig" => self.handle_get_config(&ctx),
            "updateMiddlewareConfig" => self.handle_update_config(&ctx, &request),
            "login" => self.handle_login(&ctx, &request),
            "logout" => Ok(self
                .responder
                .success(&ctx, serde_json::json!({ "message": "logged out" }))),
            "refresh" => self.handle_refresh(&ctx),
            "agentStatus" => self.handle_agent_status(&ctx, &matched).await,
            "sendAgentMessage" => self.handle_agent_message(&ctx, &matched, &request).await,
            other => Err(HermesError::internal(format!(
                "route resolved to unregistered operation {other}"
            ))),
        }
    }

    fn handle_health(&self, ctx: &RequestContext) -> HandlerResult {
        Ok(self.responder.success(
            ctx,
            serde_json::json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now(),
                "version": env!("CARGO_PKG_VERSION"),
                "middleware": self.status(),
            }),
        ))
    }

    fn handle_get_config(&self, ctx: &RequestContext) -> HandlerResult {
        let config = self.config();
        let data = serde_json::to_value(&config)
            .map_err(|e| HermesError::internal_with_source("failed to encode config", e))?;
        Ok(self.responder.success(ctx, data))
    }

    fn handle_update_config(&self, ctx: &RequestContext, request: &Request) -> HandlerResult {
        let config: HermesConfig = serde_json::from_slice(request.body())
            .map_err(|e| HermesError::validation(format!("invalid configuration: {e}")))?;

        self.reconfigure(config)?;
        Ok(self.responder.success(
            ctx,
            serde_json::json!({ "message": "configuration updated" }),
        ))
    }

    fn handle_login(&self, ctx: &RequestContext, request: &Request) -> HandlerResult {
        let login: LoginRequest = serde_json::from_slice(request.body())
            .map_err(|_| HermesError::validation("invalid login request"))?;

        if login.username.is_empty() || login.password.is_empty() {
            return Err(HermesError::authentication("invalid username or password"));
        }

        let (token, expires_in) = self.authenticator.issue_token(&login.username)?;
        Ok(self.responder.success(
            ctx,
            serde_json::json!({
                "token": token,
                "principal_id": login.username,
                "expires_in": expires_in,
            }),
        ))
    }

    fn handle_refresh(&self, ctx: &RequestContext) -> HandlerResult {
        let principal = ctx
            .principal_id()
            .ok_or_else(|| HermesError::authentication("no authenticated principal"))?;

        let (token, expires_in) = self.authenticator.issue_token(principal)?;
        Ok(self.responder.success(
            ctx,
            serde_json::json!({
                "token": token,
                "principal_id": principal,
                "expires_in": expires_in,
            }),
        ))
    }

    async fn handle_agent_status(
        &self,
        ctx: &RequestContext,
        matched: &RouteMatch,
    ) -> HandlerResult {
        let subject_id = &matched.params["id"];

        // Status queries double as liveness signals for subscribers.
        let _ = self
            .hub()
            .broadcast_agent_status(subject_id, "running", "processing request")
            .await;

        Ok(self.responder.success(
            ctx,
            serde_json::json!({
                "subject_id": subject_id,
                "status": "running",
                "message": "processing request",
            }),
        ))
    }

    async fn handle_agent_message(
        &self,
        ctx: &RequestContext,
        matched: &RouteMatch,
        request: &Request,
    ) -> HandlerResult {
        let subject_id = &matched.params["id"];

        let body: AgentMessageRequest = if request.body().is_empty() {
            AgentMessageRequest {
                content: String::new(),
            }
        } else {
            serde_json::from_slice(request.body())
                .map_err(|_| HermesError::validation("invalid message request"))?
        };
        if body.content.is_empty() {
            return Err(HermesError::validation("message content is required"));
        }

        let message_id = format!("msg_{}", Uuid::now_v7().simple());
        let _ = self
            .hub()
            .broadcast_message_update(&message_id, &body.content, "processing", subject_id)
            .await;

        Ok(self.responder.success(
            ctx,
            serde_json::json!({
                "message_id": message_id,
                "subject_id": subject_id,
                "status": "processing",
            }),
        ))
    }
}
