//! Website widget (SDK) routes
//!
//! Every route here sits behind `require_widget`; chat routes additionally
//! require the visitor token issued by `POST /sdk/visitors`.

use axum::{
    extract::{Extension, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chatdesk_shared::{ChatError, Message, NewVisitor, Visitor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversations::{ChatStartResponse, MessagesResponse, PageQuery};
use super::extract_client_ip;
use crate::{
    auth::{middleware::WIDGET_KEY_HEADER, AuthVisitor, WidgetContext},
    error::{ApiError, ApiResult},
    state::AppState,
    tenancy::host_allowed,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct InitVisitorRequest {
    pub session_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub inbox_id: Option<Uuid>,
    pub referrer_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitVisitorResponse {
    pub visitor: Visitor,
    pub inbox_id: Uuid,
    pub visitor_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartChatRequest {
    pub message: Option<String>,
}

/// Page the widget is embedded in, as reported by the widget script
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SiteInfo {
    #[serde(default)]
    pub host: String,
    pub origin: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub site: SiteInfo,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub tenant_id: Uuid,
    pub site: SiteInfo,
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn generated_visitor_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("visitor-{}", &suffix[..6])
}

// =============================================================================
// Handlers
// =============================================================================

/// Confirm the widget key is live and may be embedded on the reporting site
pub async fn validate(
    State(state): State<AppState>,
    Extension(widget): Extension<WidgetContext>,
    headers: HeaderMap,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    let host = req.site.host.trim();
    if host.is_empty() {
        return Err(ApiError::Validation(
            "Site information (host) is required".to_string(),
        ));
    }

    let api_key = headers
        .get(WIDGET_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .ok_or(ApiError::Unauthorized)?;
    let allowed = state
        .service
        .directory()
        .widget_allowed_domains(api_key)
        .await?;

    if !host_allowed(allowed.as_deref(), host) {
        tracing::warn!(
            tenant_id = %widget.tenant_id,
            host = %host,
            "Widget embedded on a host outside its allow-list"
        );
        return Err(ApiError::Forbidden);
    }

    Ok(Json(ValidateResponse {
        valid: true,
        tenant_id: widget.tenant_id,
        site: req.site,
    }))
}

/// Initialize (or resume) a visitor session and issue a visitor token
pub async fn init_visitor(
    State(state): State<AppState>,
    Extension(widget): Extension<WidgetContext>,
    headers: HeaderMap,
    Json(req): Json<InitVisitorRequest>,
) -> ApiResult<(StatusCode, Json<InitVisitorResponse>)> {
    let session_id = req.session_id.trim();
    if session_id.is_empty() {
        return Err(ApiError::Validation("Session ID is required".to_string()));
    }

    let directory = state.service.directory();
    let inbox = match req.inbox_id {
        Some(inbox_id) => directory
            .find_active_inbox(widget.tenant_id, inbox_id)
            .await?
            .ok_or_else(|| ApiError::Validation("Invalid inbox".to_string()))?,
        None => directory
            .default_inbox(widget.tenant_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("inbox".to_string()))?,
    };

    let (visitor, status) = match directory
        .find_visitor_by_session(widget.tenant_id, session_id)
        .await?
    {
        Some(existing) => (existing, StatusCode::OK),
        None => {
            let visitor = directory
                .create_visitor(
                    widget.tenant_id,
                    NewVisitor {
                        name: req
                            .name
                            .filter(|n| !n.trim().is_empty())
                            .unwrap_or_else(generated_visitor_name),
                        email: req.email,
                        phone: req.phone,
                        session_id: session_id.to_string(),
                        ip_address: state
                            .config
                            .trust_proxy_headers
                            .then(|| extract_client_ip(&headers))
                            .flatten(),
                        user_agent: header_value(&headers, header::USER_AGENT),
                        referrer_url: req
                            .referrer_url
                            .or_else(|| header_value(&headers, header::REFERER)),
                    },
                )
                .await?;
            (visitor, StatusCode::CREATED)
        }
    };

    let visitor_token = state
        .jwt
        .generate_visitor_token(visitor.id, widget.tenant_id, inbox.id)
        .map_err(|e| ApiError::from(ChatError::Internal(e.to_string())))?;

    tracing::info!(
        visitor_id = %visitor.id,
        tenant_id = %widget.tenant_id,
        inbox_id = %inbox.id,
        "Visitor session initialized"
    );

    Ok((
        status,
        Json(InitVisitorResponse {
            visitor,
            inbox_id: inbox.id,
            visitor_token,
        }),
    ))
}

/// Start or continue the visitor's chat in the token's inbox
pub async fn start_chat(
    State(state): State<AppState>,
    Extension(auth_visitor): Extension<AuthVisitor>,
    Json(req): Json<StartChatRequest>,
) -> ApiResult<Json<ChatStartResponse>> {
    let start = state
        .router
        .start_visitor_chat(
            &auth_visitor.actor(),
            Some(auth_visitor.inbox_id),
            req.message.as_deref(),
        )
        .await?;

    if start.created {
        tracing::info!(
            conversation_id = %start.conversation.id,
            visitor_id = %auth_visitor.visitor_id,
            "Visitor conversation created"
        );
    }

    Ok(Json(start.into()))
}

/// Messages of the visitor's open conversation in the token's inbox
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth_visitor): Extension<AuthVisitor>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<MessagesResponse>> {
    let actor = auth_visitor.actor();
    let conversation = state
        .service
        .store()
        .find_open_conversation(actor.tenant_id, auth_visitor.inbox_id, actor.participant)
        .await?;

    let messages: Vec<Message> = match conversation {
        Some(conversation) => {
            state
                .service
                .list_messages(&actor, conversation.id, page.into())
                .await?
        }
        None => Vec::new(),
    };

    Ok(Json(MessagesResponse { messages }))
}
