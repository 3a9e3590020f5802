//! Integration tests for the HTTP surface
//!
//! Requests go through the full router (auth middleware included) with
//! `tower::ServiceExt::oneshot`, backed by the in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chatdesk_api::routes::create_router;
use chatdesk_api::store::MemoryStore;
use chatdesk_api::{AppState, Config};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-test-secret-at-least-32-characters";
const WIDGET_KEY: &str = "wk_acme_live";

struct TestServer {
    app: Router,
    state: AppState,
    store: Arc<MemoryStore>,
    tenant_id: Uuid,
    agent_id: Uuid,
}

async fn setup() -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let tenant_id = store.add_tenant("Acme").await;
    let inbox_id = store.add_inbox(tenant_id, "Website", true).await;
    store.add_widget_key(tenant_id, WIDGET_KEY).await;
    let agent_id = store.add_agent(tenant_id, "Alice", "alice@acme.test").await;
    store.grant_inbox(tenant_id, agent_id, inbox_id).await;

    let state = AppState::new(
        Config::with_defaults("postgres://unused", SECRET),
        store.clone(),
        store.clone(),
    );
    TestServer {
        app: create_router(state.clone()),
        state,
        store,
        tenant_id,
        agent_id,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
}

async fn register_visitor(server: &TestServer, session_id: &str) -> (StatusCode, Value) {
    let body = json!({ "session_id": session_id });
    send(
        &server.app,
        json_request(Method::POST, "/api/v1/sdk/visitors")
            .header("x-api-key", WIDGET_KEY)
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_health_reports_store_and_realtime() {
    let server = setup().await;
    let (status, body) = send(
        &server.app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "healthy");
    assert_eq!(body["realtime"]["active_connections"], 0);
}

#[tokio::test]
async fn test_agent_routes_require_token() {
    let server = setup().await;
    let (status, body) = send(
        &server.app,
        Request::builder()
            .uri("/api/v1/conversations")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTHENTICATION_REQUIRED");
}

#[tokio::test]
async fn test_sdk_requires_widget_key() {
    let server = setup().await;
    let body = json!({ "session_id": "sess-1" });
    let (status, _) = send(
        &server.app,
        json_request(Method::POST, "/api/v1/sdk/visitors")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_visitor_registration_is_idempotent_per_session() {
    let server = setup().await;

    let (status, first) = register_visitor(&server, "sess-idem").await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(first["visitor_token"].as_str().is_some());

    let (status, second) = register_visitor(&server, "sess-idem").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["visitor"]["id"], second["visitor"]["id"]);
}

#[tokio::test]
async fn test_visitor_chat_over_http() {
    let server = setup().await;
    let (_, registered) = register_visitor(&server, "sess-chat").await;
    let token = registered["visitor_token"].as_str().unwrap().to_string();

    let body = json!({ "message": "Hello from the widget" });
    let (status, started) = send(
        &server.app,
        json_request(Method::POST, "/api/v1/sdk/chat")
            .header("x-api-key", WIDGET_KEY)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["created"], true);
    assert_eq!(started["messages"][0]["content"], "Hello from the widget");

    let (status, listed) = send(
        &server.app,
        Request::builder()
            .uri("/api/v1/sdk/messages")
            .header("x-api-key", WIDGET_KEY)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["messages"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_agent_lists_visitor_conversation() {
    let server = setup().await;
    let (_, registered) = register_visitor(&server, "sess-agent-view").await;
    let visitor_token = registered["visitor_token"].as_str().unwrap().to_string();

    let body = json!({ "message": "Is anyone there?" });
    let (_, started) = send(
        &server.app,
        json_request(Method::POST, "/api/v1/sdk/chat")
            .header("x-api-key", WIDGET_KEY)
            .header(header::AUTHORIZATION, format!("Bearer {visitor_token}"))
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await;

    let token = agent_token(&server);
    let (status, listed) = send(
        &server.app,
        Request::builder()
            .uri("/api/v1/conversations?filter=unattended")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&Value> = listed["conversations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| &c["id"])
        .collect();
    assert!(ids.contains(&&started["conversation"]["id"]));
}

fn agent_token(server: &TestServer) -> String {
    server
        .state
        .jwt
        .generate_access_token(server.agent_id, server.tenant_id, "alice@acme.test")
        .unwrap()
}

async fn search_users(server: &TestServer, term: &str) -> (StatusCode, Value) {
    send(
        &server.app,
        Request::builder()
            .uri(format!("/api/v1/conversations/users/search?q={term}"))
            .header(header::AUTHORIZATION, format!("Bearer {}", agent_token(server)))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_user_search_is_scoped_to_tenant() {
    let server = setup().await;
    let bob = server
        .store
        .add_agent(server.tenant_id, "Bob", "bob@acme.test")
        .await;
    let globex = server.store.add_tenant("Globex").await;
    server
        .store
        .add_agent(globex, "Alan", "alan@acme.test")
        .await;

    let (status, body) = search_users(&server, "acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["search_term"], "acme");
    assert_eq!(body["users"][0]["id"], bob.to_string());
    assert_eq!(body["users"][0]["is_online"], false);

    let (status, body) = search_users(&server, "a").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

async fn validate_site(host: Option<&str>, server: &TestServer) -> (StatusCode, Value) {
    let body = match host {
        Some(host) => json!({ "site": { "host": host, "origin": format!("https://{host}") } }),
        None => json!({}),
    };
    send(
        &server.app,
        json_request(Method::POST, "/api/v1/sdk/validate")
            .header("x-api-key", WIDGET_KEY)
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_widget_validation_checks_embedding_host() {
    let server = setup().await;
    server
        .store
        .set_widget_domains(WIDGET_KEY, "acme.test, *.acme.test")
        .await;

    let (status, body) = validate_site(Some("help.acme.test"), &server).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["tenant_id"], server.tenant_id.to_string());
    assert_eq!(body["site"]["host"], "help.acme.test");

    let (status, body) = validate_site(Some("phish.example"), &server).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "ACCESS_DENIED");

    let (status, _) = validate_site(None, &server).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Serve the router on an ephemeral port with peer addresses attached
async fn spawn_server(server: &TestServer) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.app.clone();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Send a bare WebSocket upgrade and return the response status line
async fn upgrade_status(addr: SocketAddr, forwarded_for: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         X-Forwarded-For: {forwarded_for}\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = vec![0u8; 1024];
    let n = stream.read(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf[..n])
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_upgrade_gate_ignores_rotating_forwarded_for() {
    let server = setup().await;
    let addr = spawn_server(&server).await;

    let mut statuses = Vec::new();
    for i in 0..6 {
        statuses.push(upgrade_status(addr, &format!("10.0.0.{i}")).await);
    }

    for status in &statuses[..5] {
        assert!(status.contains("401"), "unexpected status: {status}");
    }
    assert!(statuses[5].contains("429"), "unexpected status: {}", statuses[5]);
}
