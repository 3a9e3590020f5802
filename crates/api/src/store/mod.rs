//! Persistence contracts for the conversation core
//!
//! Two async traits sit at the storage seam:
//! - [`ConversationStore`] owns conversations, membership and messages.
//! - [`Directory`] answers lookups about tenants, agents, visitors, inboxes and bots.
//!
//! Every method takes the tenant id as a mandatory filter. Callers must only
//! pass tenant ids derived from verified identity.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chatdesk_shared::{
    AgentProfile, Bot, ChatResult, Conversation, ConversationStatus, Feature, Inbox, InboxFilter,
    Message, MessageStatus, NewMessage, NewVisitor, Page, ParticipantRef, Tenant, Visitor,
    WidgetTenant,
};
use uuid::Uuid;

/// Conversation, membership and message records
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Cheap round-trip used by readiness probes
    async fn health_check(&self) -> ChatResult<()>;

    async fn is_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<bool>;

    async fn get_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<Option<Conversation>>;

    /// Create a conversation with one membership row per distinct participant.
    ///
    /// `participants` must not be empty.
    async fn create_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        participants: &[ParticipantRef],
        assigned_user_id: Option<Uuid>,
    ) -> ChatResult<Conversation>;

    /// Ensure membership. Returns `true` when a row was inserted, `false` if
    /// the participant was already a member.
    async fn add_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<bool>;

    async fn list_participants(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<Vec<ParticipantRef>>;

    /// Persist a message with status `sent` and bump the conversation's
    /// `last_message_at`.
    async fn append_message(&self, message: NewMessage) -> ChatResult<Message>;

    /// Messages oldest first
    async fn list_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        page: Page,
    ) -> ChatResult<Vec<Message>>;

    /// Advance a message's status. Returns `false` when the message is
    /// missing or already at or past `status`.
    async fn set_message_status(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> ChatResult<bool>;

    /// Mark every unread message not sent by `reader` as read and return the
    /// ids that changed.
    async fn mark_read(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        reader: ParticipantRef,
    ) -> ChatResult<Vec<Uuid>>;

    async fn update_status(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> ChatResult<Conversation>;

    async fn assign_agent(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> ChatResult<Conversation>;

    /// Newest open conversation in `inbox_id` that `participant` belongs to
    async fn find_open_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<Option<Conversation>>;

    /// Any conversation in `inbox_id` where both agents are members
    async fn find_direct_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        first_agent: Uuid,
        second_agent: Uuid,
    ) -> ChatResult<Option<Conversation>>;

    /// Conversations in the given inboxes, most recently active first
    async fn list_inbox_conversations(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        filter: InboxFilter,
        inbox_ids: &[Uuid],
    ) -> ChatResult<Vec<Conversation>>;
}

/// Lookups about the actors and routing configuration of a tenant
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_agent(&self, agent_id: Uuid) -> ChatResult<Option<AgentProfile>>;

    async fn find_agent_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> ChatResult<Option<AgentProfile>>;

    /// Agents of the tenant whose name or email contains `term`
    /// (case-insensitive), never including `exclude`. Ordered by name.
    async fn search_agents(
        &self,
        tenant_id: Uuid,
        term: &str,
        exclude: Uuid,
        limit: i64,
    ) -> ChatResult<Vec<AgentProfile>>;

    /// Record an online/offline transition (also stamps `last_seen`)
    async fn set_agent_online(&self, agent_id: Uuid, online: bool) -> ChatResult<()>;

    async fn resolve_widget_key(&self, api_key: &str) -> ChatResult<Option<WidgetTenant>>;

    /// Host allow-list configured for an active widget key, if any
    async fn widget_allowed_domains(&self, api_key: &str) -> ChatResult<Option<String>>;

    async fn find_tenant(&self, tenant_id: Uuid) -> ChatResult<Option<Tenant>>;

    async fn find_visitor(&self, tenant_id: Uuid, visitor_id: Uuid)
        -> ChatResult<Option<Visitor>>;

    async fn find_visitor_by_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> ChatResult<Option<Visitor>>;

    async fn create_visitor(&self, tenant_id: Uuid, visitor: NewVisitor) -> ChatResult<Visitor>;

    async fn is_feature_enabled(&self, tenant_id: Uuid, feature: Feature) -> ChatResult<bool>;

    /// Active bot linked to the inbox, else the inbox's configured `bot_id`
    async fn find_inbox_bot(&self, tenant_id: Uuid, inbox_id: Uuid) -> ChatResult<Option<Bot>>;

    /// Active tenant-level bot (not bound to any inbox)
    async fn find_tenant_bot(&self, tenant_id: Uuid) -> ChatResult<Option<Bot>>;

    async fn default_inbox(&self, tenant_id: Uuid) -> ChatResult<Option<Inbox>>;

    async fn find_active_inbox(&self, tenant_id: Uuid, inbox_id: Uuid)
        -> ChatResult<Option<Inbox>>;

    /// Inbox ids the agent has been granted, oldest grant first
    async fn agent_inboxes(&self, tenant_id: Uuid, agent_id: Uuid) -> ChatResult<Vec<Uuid>>;

    async fn agent_has_inbox_access(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        inbox_id: Uuid,
    ) -> ChatResult<bool> {
        Ok(self
            .agent_inboxes(tenant_id, agent_id)
            .await?
            .contains(&inbox_id))
    }

    async fn first_agent_inbox(&self, tenant_id: Uuid, agent_id: Uuid) -> ChatResult<Option<Uuid>> {
        Ok(self
            .agent_inboxes(tenant_id, agent_id)
            .await?
            .into_iter()
            .next())
    }
}
