//! End-to-end chain tests: recovery, shaper, auth, and validation composed
//! in their fixed order around a terminal handler.

use std::sync::Arc;

use bytes::Bytes;
use hermes_core::{ApiEnvelope, AuthConfig, RecoveryConfig, RequestContext, ShaperConfig, ValidationConfig};
use hermes_middleware::{
    body_bytes, full_body, AuthStage, Authenticator, Chain, RecoveryStage, Responder, ShaperStage,
    ValidationStage,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{Method, StatusCode};

struct Fixture {
    chain: Chain,
    authenticator: Arc<Authenticator>,
    responder: Arc<Responder>,
}

fn fixture() -> Fixture {
    let responder = Arc::new(Responder::new(ShaperConfig::default()));
    let authenticator = Arc::new(Authenticator::new(AuthConfig::default()));

    let chain = Chain::builder()
        .stage(Arc::new(RecoveryStage::new(
            RecoveryConfig::default(),
            Arc::clone(&responder),
        )))
        .stage(Arc::new(ShaperStage::new(Arc::clone(&responder))))
        .stage(Arc::new(AuthStage::new(Arc::clone(&authenticator))))
        .stage(Arc::new(ValidationStage::new(ValidationConfig::default())))
        .build();

    Fixture {
        chain,
        authenticator,
        responder,
    }
}

fn authed_post(fixture: &Fixture, path: &str, body: &str) -> http::Request<Bytes> {
    let (token, _) = fixture.authenticator.issue_token("tester").unwrap();
    http::Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(CONTENT_TYPE, "application/json")
        .body(Bytes::from(body.to_string()))
        .unwrap()
}

async fn envelope_of(response: hermes_middleware::Response) -> ApiEnvelope {
    let bytes = body_bytes(response.into_body()).await;
    serde_json::from_slice(&bytes).expect("body should be a standard envelope")
}

#[tokio::test]
async fn chain_has_fixed_order() {
    let fixture = fixture();
    assert_eq!(
        fixture.chain.stage_names(),
        vec!["recovery", "shaper", "auth", "validation"]
    );
}

#[tokio::test]
async fn authenticated_request_reaches_handler() {
    let fixture = fixture();
    let mut ctx = RequestContext::new();
    let request = authed_post(&fixture, "/claude/message", r#"{"message":"hi"}"#);

    let responder = Arc::clone(&fixture.responder);
    let response = fixture
        .chain
        .handle(&mut ctx, request, move |ctx, _req| {
            let snapshot = ctx.clone();
            Box::pin(async move {
                Ok(responder.success(&snapshot, serde_json::json!({"echo": "hi"})))
            })
        })
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["X-Request-ID"],
        ctx.request_id().to_string().as_str()
    );

    let envelope = envelope_of(response).await;
    assert!(envelope.success);
    assert_eq!(envelope.request_id, ctx.request_id().to_string());
    assert_eq!(ctx.principal_id(), Some("tester"));
}

#[tokio::test]
async fn unauthenticated_request_gets_401_envelope() {
    let fixture = fixture();
    let mut ctx = RequestContext::new();
    let request = http::Request::builder()
        .method(Method::GET)
        .uri("/middleware/status")
        .body(Bytes::new())
        .unwrap();

    let response = fixture
        .chain
        .handle(&mut ctx, request, |_ctx, _req| {
            Box::pin(async { panic!("handler must not run without auth") })
        })
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Error responses carry the same header set as successes, so a
    // cross-origin caller can actually read the envelope.
    let headers = response.headers();
    assert_eq!(headers["X-Content-Type-Options"], "nosniff");
    assert_eq!(headers["Access-Control-Allow-Origin"], "*");
    assert_eq!(
        headers["X-Request-ID"],
        ctx.request_id().to_string().as_str()
    );

    let envelope = envelope_of(response).await;
    assert_eq!(envelope.error.unwrap().code, "UNAUTHORIZED");
}

#[tokio::test]
async fn invalid_body_gets_400_envelope_without_reaching_handler() {
    let fixture = fixture();
    let mut ctx = RequestContext::new();
    let request = authed_post(&fixture, "/claude/message", "definitely not json");

    let response = fixture
        .chain
        .handle(&mut ctx, request, |_ctx, _req| {
            Box::pin(async { panic!("handler must not see an invalid body") })
        })
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope = envelope_of(response).await;
    assert_eq!(envelope.error.unwrap().code, "VALIDATION_ERROR");
}

#[tokio::test]
async fn handler_panic_yields_500_envelope() {
    let fixture = fixture();
    let mut ctx = RequestContext::new();
    let request = authed_post(&fixture, "/claude/message", r#"{"message":"hi"}"#);

    let response = fixture
        .chain
        .handle(&mut ctx, request, |_ctx, _req| {
            Box::pin(async { panic!("late failure with a secret inside") })
        })
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = envelope_of(response).await;
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "INTERNAL_SERVER_ERROR");
    assert_eq!(error.message, "Internal server error");
}

#[tokio::test]
async fn handler_error_message_is_sanitized() {
    let fixture = fixture();
    let mut ctx = RequestContext::new();
    let request = authed_post(&fixture, "/claude/message", r#"{"message":"hi"}"#);

    let response = fixture
        .chain
        .handle(&mut ctx, request, |_ctx, _req| {
            Box::pin(async {
                Err(hermes_core::HermesError::internal(
                    "database password leaked in message",
                ))
            })
        })
        .await;

    let envelope = envelope_of(response).await;
    let message = envelope.error.unwrap().message.to_lowercase();
    assert!(!message.contains("password"));
}

#[tokio::test]
async fn exactly_one_envelope_per_request() {
    // Success, explicit error, and panic paths all produce exactly one
    // parseable envelope carrying the context's request ID.
    let fixture = fixture();

    for scenario in ["ok", "error", "panic"] {
        let mut ctx = RequestContext::new();
        let request = authed_post(&fixture, "/claude/message", r#"{"message":"hi"}"#);
        let responder = Arc::clone(&fixture.responder);

        let response = fixture
            .chain
            .handle(&mut ctx, request, move |ctx, _req| {
                let snapshot = ctx.clone();
                let scenario = scenario.to_string();
                Box::pin(async move {
                    match scenario.as_str() {
                        "ok" => Ok(responder.success(&snapshot, serde_json::json!(1))),
                        "error" => Err(hermes_core::HermesError::not_found("missing")),
                        _ => panic!("forced"),
                    }
                })
            })
            .await;

        let envelope = envelope_of(response).await;
        assert_eq!(
            envelope.request_id,
            ctx.request_id().to_string(),
            "scenario {scenario}"
        );
    }
}

#[tokio::test]
async fn disabled_auth_lets_requests_through() {
    let responder = Arc::new(Responder::new(ShaperConfig::default()));
    let authenticator = Arc::new(Authenticator::new(AuthConfig {
        enabled: false,
        ..AuthConfig::default()
    }));

    let chain = Chain::builder()
        .stage(Arc::new(RecoveryStage::new(
            RecoveryConfig::default(),
            Arc::clone(&responder),
        )))
        .stage(Arc::new(ShaperStage::new(Arc::clone(&responder))))
        .stage(Arc::new(AuthStage::new(authenticator)))
        .stage(Arc::new(ValidationStage::new(ValidationConfig::default())))
        .build();

    assert_eq!(chain.stage_names(), vec!["recovery", "shaper", "validation"]);

    let mut ctx = RequestContext::new();
    let request = http::Request::builder()
        .method(Method::GET)
        .uri("/middleware/status")
        .body(Bytes::new())
        .unwrap();

    let response = chain
        .handle(&mut ctx, request, |_ctx, _req| {
            Box::pin(async {
                Ok(http::Response::builder()
                    .status(StatusCode::OK)
                    .body(full_body("through"))
                    .unwrap())
            })
        })
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
