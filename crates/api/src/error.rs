//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chatdesk_shared::ChatError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
    #[error("Tenant is not active")]
    TenantInactive,
    #[error("Access denied")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Resource errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Rate limiting
    #[error("Too many requests")]
    RateLimited,

    // Internal errors
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_REQUIRED", self.to_string())
            }
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::InvalidCredential(_) => {
                (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIAL", self.to_string())
            }
            ApiError::TenantInactive => {
                (StatusCode::FORBIDDEN, "TENANT_INACTIVE", self.to_string())
            }
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "ACCESS_DENIED", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),

            // Resources
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            // Rate limiting
            ApiError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", self.to_string())
            }

            // Internal
            ApiError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_FAILURE", self.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::AuthenticationRequired => ApiError::Unauthorized,
            ChatError::InvalidCredential(reason) => ApiError::InvalidCredential(reason),
            ChatError::TenantInactive => ApiError::TenantInactive,
            ChatError::AccessDenied => ApiError::Forbidden,
            ChatError::NotFound(what) => ApiError::NotFound(what),
            ChatError::Validation(msg) => ApiError::Validation(msg),
            ChatError::RateLimited => ApiError::RateLimited,
            ChatError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal failure");
                ApiError::Internal
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::from(err).into()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_status_mapping() {
        let cases = [
            (ChatError::AuthenticationRequired, StatusCode::UNAUTHORIZED),
            (ChatError::InvalidCredential("bad".into()), StatusCode::UNAUTHORIZED),
            (ChatError::TenantInactive, StatusCode::FORBIDDEN),
            (ChatError::AccessDenied, StatusCode::FORBIDDEN),
            (ChatError::NotFound("conversation".into()), StatusCode::NOT_FOUND),
            (ChatError::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (ChatError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (ChatError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
