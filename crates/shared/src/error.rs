//! Error types for Chatdesk

use thiserror::Error;

/// Errors surfaced by the conversation core
///
/// Every failure a caller can observe maps onto one of these variants; the
/// realtime layer forwards [`ChatError::code`] to the client, HTTP maps the
/// variant onto a status code.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Tenant is not active")]
    TenantInactive,

    #[error("Access denied")]
    AccessDenied,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many connection attempts. Please try again later.")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            Self::InvalidCredential(_) => "INVALID_CREDENTIAL",
            Self::TenantInactive => "TENANT_INACTIVE",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL_FAILURE",
        }
    }

    /// Message that is safe to show to a client
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ChatError::NotFound("row".to_string()),
            other => {
                tracing::error!(error = ?other, "Database error");
                ChatError::Internal(other.to_string())
            }
        }
    }
}

/// Result alias for conversation-core operations
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_details_are_hidden() {
        let err = ChatError::Internal("connection reset by peer".to_string());
        assert_eq!(err.code(), "INTERNAL_FAILURE");
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: ChatError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ChatError::NotFound(_)));
    }
}
