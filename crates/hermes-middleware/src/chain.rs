//! The fixed-order middleware chain.
//!
//! The orchestrator assembles the chain once per configuration snapshot.
//! Hot-reload rebuilds it; in-flight requests keep the chain they entered
//! with.

use std::sync::Arc;

use hermes_core::{ApiEnvelope, RequestContext};
use http::header::CONTENT_TYPE;
use http::StatusCode;

use crate::middleware::{BoxFuture, HandlerResult, Middleware, Next};
use crate::types::{full_body, Request, Response};

/// A type-erased middleware stage.
pub type BoxedStage = Arc<dyn Middleware>;

/// The ordered middleware chain.
///
/// Stages wrap the terminal handler back to front, so the first stage added
/// is the outermost.
pub struct Chain {
    stages: Vec<BoxedStage>,
}

impl Chain {
    /// Creates a new chain builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Processes a request through the chain and into the handler.
    ///
    /// Any error that escapes the chain (possible only when the recovery
    /// stage is disabled) is converted into a bare error envelope so the
    /// caller always receives a response.
    pub async fn handle<H>(&self, ctx: &mut RequestContext, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, HandlerResult>
            + Send
            + 'static,
    {
        let request_id = ctx.request_id();
        let next = self.compose(handler);
        match next.run(ctx, request).await {
            Ok(response) => response,
            Err(err) => {
                let envelope = ApiEnvelope::from_error(request_id, &err);
                let body = serde_json::to_vec(&envelope).unwrap_or_default();
                http::Response::builder()
                    .status(err.status_code())
                    .header(CONTENT_TYPE, "application/json")
                    .body(full_body(body))
                    .unwrap_or_else(|_| {
                        http::Response::builder()
                            .status(StatusCode::INTERNAL_SERVER_ERROR)
                            .body(full_body("{}"))
                            .expect("static response must build")
                    })
            }
        }
    }

    /// Returns the names of the active stages, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Returns the number of active stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn compose<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, HandlerResult> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for stage in self.stages.iter().rev() {
            next = Next::stage(stage.as_ref(), next);
        }
        next
    }
}

/// Builder assembling a [`Chain`] from stages in order.
///
/// Disabled stages are skipped at build time; rebuilding the chain after a
/// configuration change re-evaluates every stage's enabled flag.
#[derive(Default)]
pub struct ChainBuilder {
    stages: Vec<BoxedStage>,
}

impl ChainBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage if it is enabled.
    #[must_use]
    pub fn stage(mut self, stage: BoxedStage) -> Self {
        if stage.enabled() {
            self.stages.push(stage);
        }
        self
    }

    /// Builds the chain.
    #[must_use]
    pub fn build(self) -> Chain {
        Chain {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::HermesError;

    struct RecordingStage {
        name: &'static str,
        enabled: bool,
    }

    impl Middleware for RecordingStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move { next.run(ctx, request).await })
        }
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/x")
            .body(bytes::Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn disabled_stages_are_skipped() {
        let chain = Chain::builder()
            .stage(Arc::new(RecordingStage {
                name: "on",
                enabled: true,
            }))
            .stage(Arc::new(RecordingStage {
                name: "off",
                enabled: false,
            }))
            .build();

        assert_eq!(chain.stage_names(), vec!["on"]);
        assert_eq!(chain.stage_count(), 1);
    }

    #[tokio::test]
    async fn escaped_errors_become_envelopes() {
        let chain = Chain::builder().build();
        let mut ctx = RequestContext::new();

        let response = chain
            .handle(&mut ctx, request(), |_ctx, _req| {
                Box::pin(async { Err(HermesError::not_found("missing")) })
            })
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = crate::types::body_bytes(response.into_body()).await;
        let envelope: ApiEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap().code, "NOT_FOUND");
        assert_eq!(envelope.request_id, ctx.request_id().to_string());
    }

    #[tokio::test]
    async fn successful_responses_pass_through() {
        let chain = Chain::builder()
            .stage(Arc::new(RecordingStage {
                name: "only",
                enabled: true,
            }))
            .build();
        let mut ctx = RequestContext::new();

        let response = chain
            .handle(&mut ctx, request(), |_ctx, _req| {
                Box::pin(async {
                    Ok(http::Response::builder()
                        .status(StatusCode::OK)
                        .body(full_body("ok"))
                        .unwrap())
                })
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
    }
}
