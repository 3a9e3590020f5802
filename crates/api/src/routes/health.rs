//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;
use crate::websocket::state::WebSocketStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub realtime: WebSocketStats,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Check store connectivity
    let db_status = match state.service.store().health_check().await {
        Ok(()) => "healthy".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check: store unavailable");
            "unhealthy".to_string()
        }
    };

    let overall_status = if db_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        overall_status,
        Json(HealthResponse {
            status: if overall_status == StatusCode::OK {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status,
            realtime: state.ws_state.get_stats().await,
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (checks if the service is ready to accept traffic)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.service.store().health_check().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
