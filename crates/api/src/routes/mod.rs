//! API routes

pub mod conversations;
pub mod health;
pub mod sdk;

use std::net::{IpAddr, SocketAddr};

use axum::{
    http::{HeaderMap, HeaderValue},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{require_agent, require_visitor, require_widget},
    state::AppState,
    websocket::ws_handler,
};

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    // Check common proxy headers in order of preference
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Address a request is attributed to.
///
/// Forwarding headers are honored only with `trust_proxy_headers`; otherwise
/// the socket peer is used.
pub fn client_addr(headers: &HeaderMap, peer: SocketAddr, trust_proxy_headers: bool) -> IpAddr {
    if !trust_proxy_headers {
        return peer.ip();
    }
    extract_client_ip(headers)
        .and_then(|ip| ip.parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
}

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match allow_origin {
        "*" => layer.allow_origin(Any),
        origins => layer.allow_origin(
            origins
                .split(',')
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
                .collect::<Vec<_>>(),
        ),
    }
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Agent routes (access token required) - under /api/v1
    let agent_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/start", post(conversations::start_conversation))
        .route("/conversations/users/search", get(conversations::search_users))
        .route(
            "/conversations/:id/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route("/conversations/:id/read", put(conversations::mark_read))
        .route("/conversations/:id/status", put(conversations::update_status))
        .route("/conversations/:id/assignee", put(conversations::assign))
        .layer(middleware::from_fn_with_state(state.clone(), require_agent));

    // Widget routes (x-api-key required, chat routes also need a visitor token)
    let sdk_routes = Router::new()
        .route("/chat", post(sdk::start_chat))
        .route("/messages", get(sdk::list_messages))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_visitor))
        .route("/visitors", post(sdk::init_visitor))
        .route("/validate", post(sdk::validate))
        .layer(middleware::from_fn_with_state(state.clone(), require_widget));

    // Realtime upgrade authenticates from its own query parameters
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    let api_v1_routes = Router::new()
        .merge(agent_routes)
        .nest("/sdk", sdk_routes);

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(cors_layer(&state.config.cors_allow_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_client_ip_preference() {
        let mut headers = HeaderMap::new();
        assert!(extract_client_ip(&headers).is_none());

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.9"));

        headers.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("198.51.100.4"));
    }

    #[test]
    fn test_client_addr_ignores_headers_unless_trusted() {
        let peer: SocketAddr = "192.0.2.10:51000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        assert_eq!(client_addr(&headers, peer, false), peer.ip());
        assert_eq!(
            client_addr(&headers, peer, true),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );

        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_addr(&headers, peer, true), peer.ip());
    }
}
