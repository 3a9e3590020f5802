//! Agent conversation routes
//!
//! Thin HTTP wrappers over the room router and conversation service. Writes
//! go through the router so they reach live rooms exactly like realtime sends.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chatdesk_shared::{
    AgentProfile, Conversation, ConversationStatus, InboxFilter, Message, MessageType, Page,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthAgent,
    conversations::{ChatStart, SendOutcome},
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub filter: InboxFilter,
    pub inbox_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

impl From<PageQuery> for Page {
    fn from(query: PageQuery) -> Self {
        Page::new(query.page, query.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub email: String,
    pub inbox_id: Option<Uuid>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ConversationStatus,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ChatStartResponse {
    pub conversation: Conversation,
    pub created: bool,
    pub messages: Vec<Message>,
}

impl From<ChatStart> for ChatStartResponse {
    fn from(start: ChatStart) -> Self {
        Self {
            conversation: start.conversation,
            created: start.created,
            messages: start
                .sent
                .map(|outcome| outcome.messages().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

impl From<SendOutcome> for MessagesResponse {
    fn from(outcome: SendOutcome) -> Self {
        Self {
            messages: outcome.messages().cloned().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message_ids: Vec<Uuid>,
}

/// Shortest accepted user search term
const MIN_SEARCH_LEN: usize = 2;
const SEARCH_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct SearchUsersQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchUsersResponse {
    pub users: Vec<AgentProfile>,
    pub search_term: String,
    pub count: usize,
}

// =============================================================================
// Handlers
// =============================================================================

/// List conversations in the agent's inboxes
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Query(query): Query<ListConversationsQuery>,
) -> ApiResult<Json<ConversationsResponse>> {
    let conversations = state
        .service
        .list_inbox_conversations(&auth_agent.actor(), query.filter, query.inbox_id)
        .await?;

    Ok(Json(ConversationsResponse { conversations }))
}

/// Start (or reuse) a conversation with another agent
pub async fn start_conversation(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Json(req): Json<StartConversationRequest>,
) -> ApiResult<Json<ChatStartResponse>> {
    let (start, target) = state
        .router
        .start_agent_conversation(
            &auth_agent.actor(),
            &req.email,
            req.inbox_id,
            req.message.as_deref(),
        )
        .await?;

    tracing::info!(
        conversation_id = %start.conversation.id,
        user_id = %auth_agent.user_id,
        target_id = %target.id,
        created = start.created,
        "Agent conversation started"
    );

    Ok(Json(start.into()))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<MessagesResponse>> {
    let messages = state
        .service
        .list_messages(&auth_agent.actor(), conversation_id, page.into())
        .await?;

    Ok(Json(MessagesResponse { messages }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<MessagesResponse>> {
    let outcome = state
        .router
        .send_message(
            &auth_agent.actor(),
            conversation_id,
            &req.content,
            req.message_type,
            None,
        )
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<MarkReadResponse>> {
    let message_ids = state
        .router
        .mark_read(&auth_agent.actor(), conversation_id, None)
        .await?;

    Ok(Json(MarkReadResponse { message_ids }))
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .router
        .update_status(&auth_agent.actor(), conversation_id, req.status)
        .await?;

    tracing::info!(
        conversation_id = %conversation_id,
        user_id = %auth_agent.user_id,
        status = req.status.as_str(),
        "Conversation status updated"
    );

    Ok(Json(conversation))
}

pub async fn assign(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .router
        .assign_agent(&auth_agent.actor(), conversation_id, req.user_id)
        .await?;

    tracing::info!(
        conversation_id = %conversation_id,
        user_id = %auth_agent.user_id,
        assignee = ?req.user_id,
        "Conversation assignment changed"
    );

    Ok(Json(conversation))
}

/// Find teammates in the caller's tenant by name or email
pub async fn search_users(
    State(state): State<AppState>,
    Extension(auth_agent): Extension<AuthAgent>,
    Query(query): Query<SearchUsersQuery>,
) -> ApiResult<Json<SearchUsersResponse>> {
    let term = query.q.trim();
    if term.chars().count() < MIN_SEARCH_LEN {
        return Err(ApiError::Validation(format!(
            "Search term must be at least {MIN_SEARCH_LEN} characters"
        )));
    }

    let users = state
        .service
        .directory()
        .search_agents(auth_agent.tenant_id, term, auth_agent.user_id, SEARCH_LIMIT)
        .await?;

    Ok(Json(SearchUsersResponse {
        count: users.len(),
        search_term: term.to_string(),
        users,
    }))
}
