//! In-memory store for tests and local development
//!
//! Mirrors the Postgres semantics closely enough that the conversation core
//! can be exercised without a database: tenant filters on every lookup,
//! idempotent membership and forward-only message status.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chatdesk_shared::{
    AgentProfile, Bot, ChatError, ChatResult, Conversation, ConversationStatus, Feature, Inbox,
    InboxFilter, Message, MessageStatus, NewMessage, NewVisitor, Page, ParticipantRef, Tenant,
    Visitor, WidgetTenant,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ConversationStore, Directory};

#[derive(Default)]
struct MemoryState {
    tenants: HashMap<Uuid, Tenant>,
    features: HashSet<(Uuid, &'static str)>,
    widget_keys: HashMap<String, Uuid>,
    widget_domains: HashMap<String, String>,
    agents: HashMap<Uuid, AgentProfile>,
    agent_inboxes: Vec<(Uuid, Uuid, Uuid)>,
    inboxes: HashMap<Uuid, (Inbox, bool)>,
    bots: Vec<Bot>,
    visitors: HashMap<Uuid, Visitor>,
    conversations: HashMap<Uuid, Conversation>,
    participants: HashMap<Uuid, Vec<ParticipantRef>>,
    messages: Vec<Message>,
}

impl MemoryState {
    fn conversation(&self, tenant_id: Uuid, conversation_id: Uuid) -> Option<&Conversation> {
        self.conversations
            .get(&conversation_id)
            .filter(|c| c.tenant_id == tenant_id)
    }

    fn conversation_mut(
        &mut self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<&mut Conversation> {
        self.conversations
            .get_mut(&conversation_id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| ChatError::NotFound("conversation".to_string()))
    }

    fn is_member(&self, conversation_id: Uuid, participant: &ParticipantRef) -> bool {
        self.participants
            .get(&conversation_id)
            .is_some_and(|members| members.contains(participant))
    }
}

/// Process-local implementation of [`ConversationStore`] and [`Directory`]
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Seeding
    // ---------------------------------------------------------------------

    pub async fn add_tenant(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.tenants.insert(
            id,
            Tenant {
                id,
                name: name.to_string(),
                domain: None,
                is_active: true,
                created_at: OffsetDateTime::now_utc(),
            },
        );
        id
    }

    pub async fn set_tenant_active(&self, tenant_id: Uuid, active: bool) {
        if let Some(tenant) = self.state.write().await.tenants.get_mut(&tenant_id) {
            tenant.is_active = active;
        }
    }

    pub async fn set_feature(&self, tenant_id: Uuid, feature: Feature, enabled: bool) {
        let mut state = self.state.write().await;
        if enabled {
            state.features.insert((tenant_id, feature.as_str()));
        } else {
            state.features.remove(&(tenant_id, feature.as_str()));
        }
    }

    pub async fn add_widget_key(&self, tenant_id: Uuid, api_key: &str) {
        self.state
            .write()
            .await
            .widget_keys
            .insert(api_key.to_string(), tenant_id);
    }

    pub async fn set_widget_domains(&self, api_key: &str, domains: &str) {
        self.state
            .write()
            .await
            .widget_domains
            .insert(api_key.to_string(), domains.to_string());
    }

    pub async fn add_inbox(&self, tenant_id: Uuid, name: &str, is_default: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.inboxes.insert(
            id,
            (
                Inbox {
                    id,
                    tenant_id,
                    name: name.to_string(),
                    is_active: true,
                    bot_id: None,
                },
                is_default,
            ),
        );
        id
    }

    pub async fn add_agent(&self, tenant_id: Uuid, name: &str, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.agents.insert(
            id,
            AgentProfile {
                id,
                tenant_id,
                name: name.to_string(),
                email: email.to_string(),
                is_online: false,
            },
        );
        id
    }

    pub async fn remove_agent(&self, agent_id: Uuid) {
        self.state.write().await.agents.remove(&agent_id);
    }

    pub async fn grant_inbox(&self, tenant_id: Uuid, agent_id: Uuid, inbox_id: Uuid) {
        self.state
            .write()
            .await
            .agent_inboxes
            .push((tenant_id, agent_id, inbox_id));
    }

    /// Register a bot; `inbox_id = None` makes it the tenant-level fallback
    pub async fn add_bot(&self, tenant_id: Uuid, inbox_id: Option<Uuid>, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().await.bots.push(Bot {
            id,
            tenant_id,
            inbox_id,
            name: name.to_string(),
            is_active: true,
        });
        id
    }

    pub async fn set_inbox_bot(&self, inbox_id: Uuid, bot_id: Option<Uuid>) {
        if let Some((inbox, _)) = self.state.write().await.inboxes.get_mut(&inbox_id) {
            inbox.bot_id = bot_id;
        }
    }

    /// Snapshot of a single message (test helper)
    pub async fn message(&self, message_id: Uuid) -> Option<Message> {
        self.state
            .read()
            .await
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn health_check(&self) -> ChatResult<()> {
        Ok(())
    }

    async fn is_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<bool> {
        let state = self.state.read().await;
        Ok(state.conversation(tenant_id, conversation_id).is_some()
            && state.is_member(conversation_id, &participant))
    }

    async fn get_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<Option<Conversation>> {
        Ok(self
            .state
            .read()
            .await
            .conversation(tenant_id, conversation_id)
            .cloned())
    }

    async fn create_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        participants: &[ParticipantRef],
        assigned_user_id: Option<Uuid>,
    ) -> ChatResult<Conversation> {
        if participants.is_empty() {
            return Err(ChatError::Validation(
                "A conversation needs at least one participant".to_string(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            tenant_id,
            inbox_id,
            status: ConversationStatus::Open,
            assigned_user_id,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut members: Vec<ParticipantRef> = Vec::with_capacity(participants.len());
        for participant in participants {
            if !members.contains(participant) {
                members.push(*participant);
            }
        }

        let mut state = self.state.write().await;
        state.participants.insert(conversation.id, members);
        state
            .conversations
            .insert(conversation.id, conversation.clone());

        Ok(conversation)
    }

    async fn add_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<bool> {
        let mut state = self.state.write().await;
        if state.conversation(tenant_id, conversation_id).is_none() {
            return Ok(false);
        }

        let members = state.participants.entry(conversation_id).or_default();
        if members.contains(&participant) {
            return Ok(false);
        }
        members.push(participant);
        Ok(true)
    }

    async fn list_participants(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<Vec<ParticipantRef>> {
        let state = self.state.read().await;
        if state.conversation(tenant_id, conversation_id).is_none() {
            return Ok(Vec::new());
        }
        Ok(state
            .participants
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_message(&self, message: NewMessage) -> ChatResult<Message> {
        let mut state = self.state.write().await;
        let now = OffsetDateTime::now_utc();

        let conversation = state.conversation_mut(message.tenant_id, message.conversation_id)?;
        conversation.last_message_at = Some(now);
        conversation.updated_at = now;

        let stored = Message {
            id: Uuid::new_v4(),
            tenant_id: message.tenant_id,
            conversation_id: message.conversation_id,
            sender_type: message.sender.participant_type,
            sender_id: message.sender.participant_id,
            content: message.content,
            message_type: message.message_type,
            status: MessageStatus::Sent,
            created_at: now,
        };
        state.messages.push(stored.clone());

        Ok(stored)
    }

    async fn list_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        page: Page,
    ) -> ChatResult<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.conversation_id == conversation_id)
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn set_message_status(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> ChatResult<bool> {
        let mut state = self.state.write().await;
        match state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.tenant_id == tenant_id)
        {
            Some(message) if message.status.can_advance_to(status) => {
                message.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_read(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        reader: ParticipantRef,
    ) -> ChatResult<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let mut changed = Vec::new();

        for message in state.messages.iter_mut().filter(|m| {
            m.tenant_id == tenant_id
                && m.conversation_id == conversation_id
                && !(m.sender_type == reader.participant_type
                    && m.sender_id == reader.participant_id)
        }) {
            if message.status.can_advance_to(MessageStatus::Read) {
                message.status = MessageStatus::Read;
                changed.push(message.id);
            }
        }

        Ok(changed)
    }

    async fn update_status(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> ChatResult<Conversation> {
        let mut state = self.state.write().await;
        let conversation = state.conversation_mut(tenant_id, conversation_id)?;
        conversation.status = status;
        conversation.updated_at = OffsetDateTime::now_utc();
        Ok(conversation.clone())
    }

    async fn assign_agent(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> ChatResult<Conversation> {
        let mut state = self.state.write().await;
        let conversation = state.conversation_mut(tenant_id, conversation_id)?;
        conversation.assigned_user_id = agent_id;
        conversation.updated_at = OffsetDateTime::now_utc();
        Ok(conversation.clone())
    }

    async fn find_open_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && c.inbox_id == inbox_id
                    && c.status == ConversationStatus::Open
                    && state.is_member(c.id, &participant)
            })
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn find_direct_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        first_agent: Uuid,
        second_agent: Uuid,
    ) -> ChatResult<Option<Conversation>> {
        let state = self.state.read().await;
        let first = ParticipantRef::agent(first_agent);
        let second = ParticipantRef::agent(second_agent);
        Ok(state
            .conversations
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && c.inbox_id == inbox_id
                    && state.is_member(c.id, &first)
                    && state.is_member(c.id, &second)
            })
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn list_inbox_conversations(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        filter: InboxFilter,
        inbox_ids: &[Uuid],
    ) -> ChatResult<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.tenant_id == tenant_id && inbox_ids.contains(&c.inbox_id))
            .filter(|c| match filter {
                InboxFilter::Mine => c.assigned_user_id == Some(agent_id),
                InboxFilter::Others => c.assigned_user_id.is_some_and(|id| id != agent_id),
                InboxFilter::Unattended => c.assigned_user_id.is_none(),
            })
            .cloned()
            .collect();

        conversations.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(conversations)
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn find_agent(&self, agent_id: Uuid) -> ChatResult<Option<AgentProfile>> {
        Ok(self.state.read().await.agents.get(&agent_id).cloned())
    }

    async fn find_agent_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> ChatResult<Option<AgentProfile>> {
        Ok(self
            .state
            .read()
            .await
            .agents
            .values()
            .find(|a| a.tenant_id == tenant_id && a.email == email)
            .cloned())
    }

    async fn search_agents(
        &self,
        tenant_id: Uuid,
        term: &str,
        exclude: Uuid,
        limit: i64,
    ) -> ChatResult<Vec<AgentProfile>> {
        let needle = term.to_lowercase();
        let state = self.state.read().await;
        let mut agents: Vec<AgentProfile> = state
            .agents
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.id != exclude)
            .filter(|a| {
                a.name.to_lowercase().contains(&needle) || a.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(agents)
    }

    async fn set_agent_online(&self, agent_id: Uuid, online: bool) -> ChatResult<()> {
        if let Some(agent) = self.state.write().await.agents.get_mut(&agent_id) {
            agent.is_online = online;
        }
        Ok(())
    }

    async fn resolve_widget_key(&self, api_key: &str) -> ChatResult<Option<WidgetTenant>> {
        let state = self.state.read().await;
        Ok(state.widget_keys.get(api_key).and_then(|tenant_id| {
            state.tenants.get(tenant_id).map(|tenant| WidgetTenant {
                tenant_id: tenant.id,
                tenant_active: tenant.is_active,
            })
        }))
    }

    async fn widget_allowed_domains(&self, api_key: &str) -> ChatResult<Option<String>> {
        Ok(self.state.read().await.widget_domains.get(api_key).cloned())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> ChatResult<Option<Tenant>> {
        Ok(self.state.read().await.tenants.get(&tenant_id).cloned())
    }

    async fn find_visitor(
        &self,
        tenant_id: Uuid,
        visitor_id: Uuid,
    ) -> ChatResult<Option<Visitor>> {
        Ok(self
            .state
            .read()
            .await
            .visitors
            .get(&visitor_id)
            .filter(|v| v.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_visitor_by_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> ChatResult<Option<Visitor>> {
        Ok(self
            .state
            .read()
            .await
            .visitors
            .values()
            .filter(|v| v.tenant_id == tenant_id && v.session_id == session_id)
            .max_by_key(|v| v.created_at)
            .cloned())
    }

    async fn create_visitor(&self, tenant_id: Uuid, visitor: NewVisitor) -> ChatResult<Visitor> {
        let created = Visitor {
            id: Uuid::new_v4(),
            tenant_id,
            name: visitor.name,
            email: visitor.email,
            session_id: visitor.session_id,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state
            .write()
            .await
            .visitors
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn is_feature_enabled(&self, tenant_id: Uuid, feature: Feature) -> ChatResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .features
            .contains(&(tenant_id, feature.as_str())))
    }

    async fn find_inbox_bot(&self, tenant_id: Uuid, inbox_id: Uuid) -> ChatResult<Option<Bot>> {
        let state = self.state.read().await;
        let active = |b: &&Bot| b.tenant_id == tenant_id && b.is_active;

        if let Some(bot) = state
            .bots
            .iter()
            .filter(active)
            .find(|b| b.inbox_id == Some(inbox_id))
        {
            return Ok(Some(bot.clone()));
        }

        let configured = state
            .inboxes
            .get(&inbox_id)
            .filter(|(inbox, _)| inbox.tenant_id == tenant_id)
            .and_then(|(inbox, _)| inbox.bot_id);

        Ok(configured.and_then(|bot_id| {
            state
                .bots
                .iter()
                .filter(active)
                .find(|b| b.id == bot_id)
                .cloned()
        }))
    }

    async fn find_tenant_bot(&self, tenant_id: Uuid) -> ChatResult<Option<Bot>> {
        Ok(self
            .state
            .read()
            .await
            .bots
            .iter()
            .find(|b| b.tenant_id == tenant_id && b.inbox_id.is_none() && b.is_active)
            .cloned())
    }

    async fn default_inbox(&self, tenant_id: Uuid) -> ChatResult<Option<Inbox>> {
        Ok(self
            .state
            .read()
            .await
            .inboxes
            .values()
            .find(|(inbox, is_default)| {
                *is_default && inbox.tenant_id == tenant_id && inbox.is_active
            })
            .map(|(inbox, _)| inbox.clone()))
    }

    async fn find_active_inbox(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
    ) -> ChatResult<Option<Inbox>> {
        Ok(self
            .state
            .read()
            .await
            .inboxes
            .get(&inbox_id)
            .filter(|(inbox, _)| inbox.tenant_id == tenant_id && inbox.is_active)
            .map(|(inbox, _)| inbox.clone()))
    }

    async fn agent_inboxes(&self, tenant_id: Uuid, agent_id: Uuid) -> ChatResult<Vec<Uuid>> {
        Ok(self
            .state
            .read()
            .await
            .agent_inboxes
            .iter()
            .filter(|(t, a, _)| *t == tenant_id && *a == agent_id)
            .map(|(_, _, inbox)| *inbox)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdesk_shared::MessageType;

    #[tokio::test]
    async fn test_membership_is_idempotent() {
        let store = MemoryStore::new();
        let tenant_id = store.add_tenant("Acme").await;
        let inbox_id = store.add_inbox(tenant_id, "Web", true).await;
        let visitor = ParticipantRef::visitor(Uuid::new_v4());

        let conversation = store
            .create_conversation(tenant_id, inbox_id, &[visitor, visitor], None)
            .await
            .unwrap();

        assert!(!store
            .add_participant(tenant_id, conversation.id, visitor)
            .await
            .unwrap());
        assert_eq!(
            store
                .list_participants(tenant_id, conversation.id)
                .await
                .unwrap(),
            vec![visitor]
        );
        assert!(store
            .is_participant(tenant_id, conversation.id, visitor)
            .await
            .unwrap());
        assert!(!store
            .is_participant(Uuid::new_v4(), conversation.id, visitor)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_status_never_regresses() {
        let store = MemoryStore::new();
        let tenant_id = store.add_tenant("Acme").await;
        let inbox_id = store.add_inbox(tenant_id, "Web", true).await;
        let visitor = ParticipantRef::visitor(Uuid::new_v4());
        let agent = ParticipantRef::agent(Uuid::new_v4());

        let conversation = store
            .create_conversation(tenant_id, inbox_id, &[visitor, agent], None)
            .await
            .unwrap();
        let message = store
            .append_message(NewMessage {
                tenant_id,
                conversation_id: conversation.id,
                sender: visitor,
                content: "hello".to_string(),
                message_type: MessageType::Text,
            })
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Sent);

        // Sender's own read does not touch its messages
        assert!(store
            .mark_read(tenant_id, conversation.id, visitor)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(
            store.mark_read(tenant_id, conversation.id, agent).await.unwrap(),
            vec![message.id]
        );

        // A late delivered update must not move it back
        assert!(!store
            .set_message_status(tenant_id, message.id, MessageStatus::Delivered)
            .await
            .unwrap());
        assert_eq!(
            store.message(message.id).await.unwrap().status,
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn test_inbox_bot_takes_priority_over_configured_bot() {
        let store = MemoryStore::new();
        let tenant_id = store.add_tenant("Acme").await;
        let inbox_id = store.add_inbox(tenant_id, "Web", true).await;

        let tenant_bot = store.add_bot(tenant_id, None, "Fallback").await;
        assert!(store.find_inbox_bot(tenant_id, inbox_id).await.unwrap().is_none());

        store.set_inbox_bot(inbox_id, Some(tenant_bot)).await;
        assert_eq!(
            store.find_inbox_bot(tenant_id, inbox_id).await.unwrap().map(|b| b.id),
            Some(tenant_bot)
        );

        let linked = store.add_bot(tenant_id, Some(inbox_id), "Greeter").await;
        assert_eq!(
            store.find_inbox_bot(tenant_id, inbox_id).await.unwrap().map(|b| b.id),
            Some(linked)
        );
    }

    #[tokio::test]
    async fn test_agent_search_stays_in_tenant_and_skips_caller() {
        let store = MemoryStore::new();
        let tenant_id = store.add_tenant("Acme").await;
        let other_tenant = store.add_tenant("Globex").await;
        let caller = store.add_agent(tenant_id, "Alice", "alice@acme.test").await;
        let bob = store.add_agent(tenant_id, "Bob", "bob@acme.test").await;
        store.add_agent(tenant_id, "Carol", "carol@example.org").await;
        store.add_agent(other_tenant, "Alan", "alan@acme.test").await;

        let found = store.search_agents(tenant_id, "ACME", caller, 20).await.unwrap();
        assert_eq!(found.iter().map(|a| a.id).collect::<Vec<_>>(), vec![bob]);

        assert!(store.search_agents(tenant_id, "acme", caller, 0).await.unwrap().is_empty());
    }
}
