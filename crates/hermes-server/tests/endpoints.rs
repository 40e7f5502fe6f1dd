//! Full-stack tests: a bound server, real HTTP and WebSocket clients, and
//! a canned backend agent.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use hermes_core::{HermesConfig, ShutdownSignal};
use hermes_server::{Orchestrator, Server, ServerConfig};
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tungstenite::client::IntoClientRequest;
use tungstenite::Message;

struct Stack {
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    shutdown: ShutdownSignal,
    server: JoinHandle<()>,
}

impl Stack {
    async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server).await;
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// Starts a full stack with the given configuration tweaks applied on top
/// of test-friendly defaults.
async fn start_stack(tweak: impl FnOnce(&mut HermesConfig)) -> Stack {
    let mut config = HermesConfig::default();
    config.sync.heartbeat_interval_secs = 3600;
    config.session.api_endpoint = "http://127.0.0.1:9/unused".to_string();
    tweak(&mut config);

    let orchestrator = Orchestrator::new(config).expect("config should validate");
    let server = Server::new(
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            shutdown_timeout: Duration::from_secs(2),
            body_timeout: Duration::from_secs(5),
        },
        Arc::clone(&orchestrator),
    );

    let bound = server.bind().await.expect("bind should succeed");
    let addr = bound.local_addr();
    let shutdown = ShutdownSignal::new();
    let server = tokio::spawn(bound.run_with_shutdown(shutdown.clone()));

    Stack {
        addr,
        orchestrator,
        shutdown,
        server,
    }
}

/// Serves canned status codes in order, repeating the last. Returns the
/// endpoint URL and a hit counter.
async fn canned_backend(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let statuses = statuses.clone();
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let service = service_fn(move |_req| {
                    let hit = counter.fetch_add(1, Ordering::SeqCst);
                    let status = *statuses.get(hit).or(statuses.last()).unwrap_or(&200);
                    async move {
                        let body = serde_json::json!({
                            "session_id": "s-backend",
                            "conversation_id": "c-backend",
                            "message": "reply from the agent",
                            "status": "active",
                        })
                        .to_string();
                        Ok::<_, std::convert::Infallible>(
                            hyper::Response::builder()
                                .status(status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(body)))
                                .unwrap(),
                        )
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (format!("http://{addr}/agent"), hits)
}

async fn login(stack: &Stack) -> String {
    let response = reqwest::Client::new()
        .post(stack.url("/auth/login"))
        .json(&serde_json::json!({"username": "demo-user", "password": "demo-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["data"]["expires_in"].as_u64().unwrap() > 0);
    body["data"]["token"].as_str().unwrap().to_string()
}

/// Connects a duplex subscriber, consuming the welcome envelope.
async fn connect_ws(
    stack: &Stack,
    token: &str,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let mut request = format!("ws://{}/ws", stack.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        http::header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );

    let (mut ws, _response) = connect_async(request).await.expect("upgrade should succeed");

    let welcome = expect_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["data"]["connection_id"].is_string());
    ws
}

async fn expect_json(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame should arrive")
            .expect("stream should be open")
            .expect("frame should read");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("frame should be JSON");
        }
    }
}

/// Subscribes the socket to a subject, using ping/pong as a barrier so the
/// subscription is in effect before returning.
async fn subscribe(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    subject_id: &str,
) {
    let subscribe = serde_json::json!({"type": "subscribe", "data": {"subject_id": subject_id}});
    ws.send(Message::Text(subscribe.to_string())).await.unwrap();

    ws.send(Message::Text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let pong = expect_json(ws).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn unauthenticated_health_succeeds() {
    let stack = start_stack(|_| {}).await;

    let response = reqwest::get(stack.url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert!(body["request_id"].is_string());

    stack.stop().await;
}

#[tokio::test]
async fn login_then_authed_health_shows_middleware_map() {
    let stack = start_stack(|_| {}).await;
    let token = login(&stack).await;

    let response = reqwest::Client::new()
        .get(stack.url("/health"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    let middleware = body["data"]["middleware"]
        .as_object()
        .expect("middleware map should be present");
    assert!(!middleware.is_empty());

    stack.stop().await;
}

#[tokio::test]
async fn protected_endpoints_reject_missing_credentials() {
    let stack = start_stack(|_| {}).await;

    let response = reqwest::get(stack.url("/middleware/status")).await.unwrap();
    assert_eq!(response.status(), 401);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    stack.stop().await;
}

#[tokio::test]
async fn config_round_trip_and_invalid_update() {
    let stack = start_stack(|_| {}).await;
    let token = login(&stack).await;
    let client = reqwest::Client::new();

    let response = client
        .get(stack.url("/middleware/config"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let mut config: HermesConfig =
        serde_json::from_value(body["data"].clone()).expect("config should deserialize");

    // An invalid update is rejected before apply.
    config.sync.buffer_size = 0;
    let response = client
        .put(stack.url("/middleware/config"))
        .bearer_auth(&token)
        .json(&config)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // A valid update is applied.
    config.sync.buffer_size = 500;
    config.validation.strict_mode = true;
    let response = client
        .put(stack.url("/middleware/config"))
        .bearer_auth(&token)
        .json(&config)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(stack.orchestrator.config().validation.strict_mode);

    stack.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_matching_subscriber_only() {
    let stack = start_stack(|_| {}).await;
    let token = login(&stack).await;

    let mut ws_a = connect_ws(&stack, &token).await;
    let mut ws_b = connect_ws(&stack, &token).await;
    subscribe(&mut ws_a, "x").await;
    subscribe(&mut ws_b, "y").await;

    stack
        .orchestrator
        .hub()
        .broadcast_agent_status("x", "running", "ok")
        .await
        .unwrap();

    let envelope = expect_json(&mut ws_a).await;
    assert_eq!(envelope["type"], "agent_status");
    assert_eq!(envelope["data"]["subject_id"], "x");
    assert_eq!(envelope["data"]["status"], "running");

    // B must receive nothing within the window.
    let silence = tokio::time::timeout(Duration::from_secs(1), ws_b.next()).await;
    assert!(silence.is_err(), "subscriber of y must stay silent");

    stack.stop().await;
}

#[tokio::test]
async fn posted_agent_message_fans_out_with_its_id() {
    let stack = start_stack(|_| {}).await;
    let token = login(&stack).await;

    let mut ws = connect_ws(&stack, &token).await;
    subscribe(&mut ws, "agent-7").await;

    let response = reqwest::Client::new()
        .post(stack.url("/agents/agent-7/messages"))
        .bearer_auth(&token)
        .json(&serde_json::json!({"content": "run the tests"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let message_id = body["data"]["message_id"].as_str().unwrap().to_string();

    let envelope = expect_json(&mut ws).await;
    assert_eq!(envelope["type"], "message_update");
    assert_eq!(envelope["data"]["message_id"], message_id.as_str());
    assert_eq!(envelope["data"]["content"], "run the tests");

    stack.stop().await;
}

#[tokio::test]
async fn session_forward_retries_through_5xx() {
    let (endpoint, hits) = canned_backend(vec![502, 200]).await;
    let stack = start_stack(|config| {
        config.session.api_endpoint = endpoint.clone();
        config.session.max_retries = 2;
    })
    .await;
    let token = login(&stack).await;

    let response = reqwest::Client::new()
        .post(stack.url("/claude/message"))
        .bearer_auth(&token)
        .json(&serde_json::json!({"message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["message"], "reply from the agent");
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    stack.stop().await;
}

#[tokio::test]
async fn session_lifecycle_inspect_and_delete() {
    let (endpoint, _hits) = canned_backend(vec![200]).await;
    let stack = start_stack(|config| {
        config.session.api_endpoint = endpoint.clone();
    })
    .await;
    let token = login(&stack).await;
    let client = reqwest::Client::new();

    // Create via forward with an explicit session ID.
    let response = client
        .post(stack.url("/claude/message"))
        .bearer_auth(&token)
        .json(&serde_json::json!({"session_id": "sess-test", "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Inspect it.
    let response = client
        .get(stack.url("/claude/session?session_id=sess-test"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["session_id"], "sess-test");

    // Delete twice: 204 both times.
    for _ in 0..2 {
        let response = client
            .delete(stack.url("/claude/session/sess-test"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
    }

    // Gone now.
    let response = client
        .get(stack.url("/claude/session?session_id=sess-test"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    stack.stop().await;
}

#[tokio::test]
async fn idle_sessions_are_garbage_collected() {
    let (endpoint, _hits) = canned_backend(vec![200]).await;
    let stack = start_stack(|config| {
        config.session.api_endpoint = endpoint.clone();
        config.session.idle_timeout_secs = 1;
        config.session.gc_interval_secs = 1;
    })
    .await;
    let token = login(&stack).await;
    let client = reqwest::Client::new();

    let response = client
        .post(stack.url("/claude/message"))
        .bearer_auth(&token)
        .json(&serde_json::json!({"session_id": "sess-idle", "message": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(stack.orchestrator.sessions().count(), 1);

    // Wait past the idle threshold plus one sweep.
    let mut waited = 0;
    while stack.orchestrator.sessions().count() != 0 && waited < 50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += 1;
    }
    assert_eq!(stack.orchestrator.sessions().count(), 0);

    let response = client
        .get(stack.url("/claude/session?session_id=sess-idle"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    stack.stop().await;
}

#[tokio::test]
async fn oversize_body_is_rejected_before_forwarding() {
    let (endpoint, hits) = canned_backend(vec![200]).await;
    let stack = start_stack(|config| {
        config.session.api_endpoint = endpoint.clone();
        config.validation.max_request_size = 256;
    })
    .await;
    let token = login(&stack).await;

    let huge = "z".repeat(1024);
    let response = reqwest::Client::new()
        .post(stack.url("/claude/message"))
        .bearer_auth(&token)
        .json(&serde_json::json!({"message": huge}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(hits.load(Ordering::SeqCst), 0, "body must never be forwarded");

    stack.stop().await;
}

#[tokio::test]
async fn event_stream_delivers_matching_envelopes() {
    let stack = start_stack(|_| {}).await;
    let token = login(&stack).await;

    let response = reqwest::Client::new()
        .get(stack.url("/events?subject_id=agent-sse"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );

    // Wait for the connection to register before broadcasting.
    let mut waited = 0;
    while stack.orchestrator.hub().client_count() != 1 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }

    stack
        .orchestrator
        .hub()
        .broadcast_agent_status("agent-sse", "running", "ok")
        .await
        .unwrap();

    let mut stream = response.bytes_stream();
    let mut collected = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                collected.push_str(&String::from_utf8_lossy(&chunk));
                if collected.contains("agent_status") {
                    break;
                }
            }
            _ => break,
        }
    }

    // Frames are `data: <json>` separated by blank lines; find ours.
    let frame = collected
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .find(|json| json.contains("agent_status"))
        .expect("agent_status frame should arrive");
    let envelope: serde_json::Value = serde_json::from_str(frame).unwrap();
    assert_eq!(envelope["data"]["subject_id"], "agent-sse");

    stack.stop().await;
}

#[tokio::test]
async fn shutdown_completes_within_deadline_with_open_sockets() {
    let stack = start_stack(|_| {}).await;
    let token = login(&stack).await;

    let _ws = connect_ws(&stack, &token).await;
    assert!(stack.orchestrator.hub().client_count() >= 1);

    let started = tokio::time::Instant::now();
    stack.stop().await;
    assert!(started.elapsed() < Duration::from_secs(5));
}
