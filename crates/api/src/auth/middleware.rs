//! Authentication middleware for the HTTP API
//!
//! Each layer verifies one kind of credential and inserts the resulting
//! identity as a request extension for handlers to pick up.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chatdesk_shared::ChatError;
use uuid::Uuid;

use super::jwt::JwtError;
use crate::conversations::Actor;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the widget identity key
pub const WIDGET_KEY_HEADER: &str = "x-api-key";

/// Agent authenticated with an access token
#[derive(Debug, Clone)]
pub struct AuthAgent {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
}

impl AuthAgent {
    pub fn actor(&self) -> Actor {
        Actor::agent(self.tenant_id, self.user_id, self.name.clone())
    }
}

/// Tenant resolved from a widget identity key
#[derive(Debug, Clone, Copy)]
pub struct WidgetContext {
    pub tenant_id: Uuid,
}

/// Visitor authenticated with a visitor token issued to this tenant
#[derive(Debug, Clone)]
pub struct AuthVisitor {
    pub visitor_id: Uuid,
    pub tenant_id: Uuid,
    pub inbox_id: Uuid,
    pub name: String,
}

impl AuthVisitor {
    pub fn actor(&self) -> Actor {
        Actor::visitor(self.tenant_id, self.visitor_id, self.name.clone())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn token_error(err: JwtError) -> ApiError {
    tracing::debug!(error = %err, "Bearer token rejected");
    ApiError::InvalidToken
}

/// Require a valid agent access token
pub async fn require_agent(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let claims = state.jwt.validate_access_token(token).map_err(token_error)?;

    let agent = state
        .service
        .directory()
        .find_agent(claims.sub)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    if agent.tenant_id != claims.tenant_id {
        tracing::warn!(
            user_id = %agent.id,
            token_tenant = %claims.tenant_id,
            "Token tenant does not match user tenant"
        );
        return Err(ApiError::InvalidToken);
    }
    state.tenants.require_active(agent.tenant_id).await?;

    request.extensions_mut().insert(AuthAgent {
        user_id: agent.id,
        tenant_id: agent.tenant_id,
        name: agent.name,
        email: agent.email,
    });

    Ok(next.run(request).await)
}

/// Require a widget identity key belonging to an active tenant
pub async fn require_widget(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get(WIDGET_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let tenant_id = state.tenants.resolve_widget_key(api_key).await?;
    request.extensions_mut().insert(WidgetContext { tenant_id });

    Ok(next.run(request).await)
}

/// Require a visitor token for the tenant resolved by [`require_widget`].
///
/// Must be layered inside `require_widget`.
pub async fn require_visitor(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let widget = request
        .extensions()
        .get::<WidgetContext>()
        .copied()
        .ok_or(ApiError::Unauthorized)?;

    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let claims = state.jwt.validate_visitor_token(token).map_err(token_error)?;

    if claims.tenant_id != widget.tenant_id {
        tracing::warn!(
            visitor_id = %claims.sub,
            widget_tenant = %widget.tenant_id,
            "Visitor token issued to another tenant"
        );
        return Err(ApiError::InvalidToken);
    }

    let inbox_id = claims
        .inbox_id
        .ok_or_else(|| ApiError::from(ChatError::InvalidCredential("Invalid token".to_string())))?;

    let visitor = state
        .service
        .directory()
        .find_visitor(widget.tenant_id, claims.sub)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    request.extensions_mut().insert(AuthVisitor {
        visitor_id: visitor.id,
        tenant_id: visitor.tenant_id,
        inbox_id,
        name: visitor.name,
    });

    Ok(next.run(request).await)
}
