//! Conversation operations shared by the realtime and HTTP transports
//!
//! Every access-control decision about a conversation is made here, so the
//! two transports cannot drift apart.

use std::sync::Arc;

use chatdesk_shared::{
    AgentProfile, ChatError, ChatResult, Conversation, ConversationStatus, InboxFilter, Message,
    MessageType, NewMessage, Page, ParticipantRef, ParticipantType,
};
use uuid::Uuid;

use super::bot::{find_bot, BotResponder};
use super::locks::{ConversationGuard, ConversationLocks};
use crate::store::{ConversationStore, Directory};

/// Authenticated principal acting on conversations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub tenant_id: Uuid,
    pub participant: ParticipantRef,
    pub display_name: String,
}

impl Actor {
    pub fn agent(tenant_id: Uuid, user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            participant: ParticipantRef::agent(user_id),
            display_name: name.into(),
        }
    }

    pub fn visitor(tenant_id: Uuid, visitor_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            participant: ParticipantRef::visitor(visitor_id),
            display_name: name.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.participant.participant_id
    }

    pub fn is_agent(&self) -> bool {
        self.participant.participant_type == ParticipantType::Agent
    }

    fn require_agent(&self) -> ChatResult<()> {
        if self.is_agent() {
            Ok(())
        } else {
            Err(ChatError::AccessDenied)
        }
    }
}

/// Result of a send: the message plus an optional bot reply
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub bot_reply: Option<Message>,
}

impl SendOutcome {
    /// Persisted messages in the order they were written
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        std::iter::once(&self.message).chain(self.bot_reply.iter())
    }
}

/// Result of starting (or continuing) a chat
#[derive(Debug, Clone)]
pub struct ChatStart {
    pub conversation: Conversation,
    pub created: bool,
    pub sent: Option<SendOutcome>,
}

pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    directory: Arc<dyn Directory>,
    bot: BotResponder,
    locks: ConversationLocks,
    max_message_length: usize,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        directory: Arc<dyn Directory>,
        bot: BotResponder,
        max_message_length: usize,
    ) -> Self {
        Self {
            store,
            directory,
            bot,
            locks: ConversationLocks::new(),
            max_message_length,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    /// Enter the critical section for a conversation
    pub async fn lock(&self, conversation_id: Uuid) -> ConversationGuard {
        self.locks.acquire(conversation_id).await
    }

    /// Membership + tenant check. Always queries the store.
    ///
    /// Non-members get `AccessDenied` whether or not the conversation exists
    /// in another tenant.
    pub async fn authorize(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
    ) -> ChatResult<Conversation> {
        if !self
            .store
            .is_participant(actor.tenant_id, conversation_id, actor.participant)
            .await?
        {
            tracing::debug!(
                conversation_id = %conversation_id,
                tenant_id = %actor.tenant_id,
                participant_id = %actor.id(),
                "Conversation access denied"
            );
            return Err(ChatError::AccessDenied);
        }

        self.store
            .get_conversation(actor.tenant_id, conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("conversation".to_string()))
    }

    /// Reject empty, oversized, or system-typed content
    pub fn validate_content(&self, content: &str, message_type: MessageType) -> ChatResult<()> {
        if content.trim().is_empty() {
            return Err(ChatError::Validation(
                "Message content cannot be empty".to_string(),
            ));
        }
        if content.chars().count() > self.max_message_length {
            return Err(ChatError::Validation(format!(
                "Message content exceeds {} characters",
                self.max_message_length
            )));
        }
        if message_type == MessageType::System {
            return Err(ChatError::Validation(
                "System messages cannot be sent by participants".to_string(),
            ));
        }
        Ok(())
    }

    /// Persist a message from `actor` and run the bot policy.
    ///
    /// Nothing is written when authorization or validation fails.
    pub async fn send_message(
        &self,
        guard: &ConversationGuard,
        actor: &Actor,
        content: &str,
        message_type: MessageType,
    ) -> ChatResult<SendOutcome> {
        self.validate_content(content, message_type)?;
        let conversation = self.authorize(actor, guard.conversation_id()).await?;

        let message = self
            .store
            .append_message(NewMessage {
                tenant_id: actor.tenant_id,
                conversation_id: conversation.id,
                sender: actor.participant,
                content: content.to_string(),
                message_type,
            })
            .await?;

        tracing::debug!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            sender_type = message.sender_type.as_str(),
            "Message persisted"
        );

        let bot_reply = if actor.participant.participant_type == ParticipantType::Visitor {
            self.bot_reply(&conversation, &message).await?
        } else {
            None
        };

        Ok(SendOutcome { message, bot_reply })
    }

    /// Bot auto-response for a visitor message.
    ///
    /// Runs under the caller's conversation guard, which `assign_agent` also
    /// takes, so assignment cannot interleave between check and reply.
    async fn bot_reply(
        &self,
        conversation: &Conversation,
        trigger: &Message,
    ) -> ChatResult<Option<Message>> {
        if conversation.assigned_user_id.is_some() {
            return Ok(None);
        }

        let Some(bot) =
            find_bot(self.directory.as_ref(), conversation.tenant_id, conversation.inbox_id).await?
        else {
            return Ok(None);
        };

        let sender = ParticipantRef::bot(bot.id);
        self.store
            .add_participant(conversation.tenant_id, conversation.id, sender)
            .await?;

        let reply = self
            .store
            .append_message(NewMessage {
                tenant_id: conversation.tenant_id,
                conversation_id: conversation.id,
                sender,
                content: self.bot.compose_reply(trigger),
                message_type: MessageType::Text,
            })
            .await?;

        tracing::info!(
            conversation_id = %conversation.id,
            bot_id = %bot.id,
            "Bot replied"
        );

        Ok(Some(reply))
    }

    /// Mark everything the other participants sent as read
    pub async fn mark_read(
        &self,
        guard: &ConversationGuard,
        actor: &Actor,
    ) -> ChatResult<Vec<Uuid>> {
        let conversation = self.authorize(actor, guard.conversation_id()).await?;
        self.store
            .mark_read(actor.tenant_id, conversation.id, actor.participant)
            .await
    }

    pub async fn list_messages(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        page: Page,
    ) -> ChatResult<Vec<Message>> {
        self.authorize(actor, conversation_id).await?;
        self.store
            .list_messages(actor.tenant_id, conversation_id, page)
            .await
    }

    /// Agent inbox view, restricted to inboxes the agent was granted
    pub async fn list_inbox_conversations(
        &self,
        actor: &Actor,
        filter: InboxFilter,
        inbox_id: Option<Uuid>,
    ) -> ChatResult<Vec<Conversation>> {
        actor.require_agent()?;

        let granted = self
            .directory
            .agent_inboxes(actor.tenant_id, actor.id())
            .await?;

        let inboxes = match inbox_id {
            Some(inbox_id) if granted.contains(&inbox_id) => vec![inbox_id],
            Some(_) => return Err(ChatError::AccessDenied),
            None => granted,
        };

        self.store
            .list_inbox_conversations(actor.tenant_id, actor.id(), filter, &inboxes)
            .await
    }

    /// Start or continue the visitor's chat in an inbox.
    ///
    /// Reuses the newest open conversation the visitor belongs to in that
    /// inbox; otherwise creates one with the visitor (and the bot, when
    /// enabled) as participants.
    pub async fn start_visitor_chat(
        &self,
        actor: &Actor,
        inbox_id: Option<Uuid>,
        first_message: Option<&str>,
    ) -> ChatResult<ChatStart> {
        if actor.participant.participant_type != ParticipantType::Visitor {
            return Err(ChatError::AccessDenied);
        }
        if let Some(content) = first_message {
            self.validate_content(content, MessageType::Text)?;
        }

        let inbox = match inbox_id {
            Some(inbox_id) => self
                .directory
                .find_active_inbox(actor.tenant_id, inbox_id)
                .await?,
            None => self.directory.default_inbox(actor.tenant_id).await?,
        }
        .ok_or_else(|| ChatError::NotFound("inbox".to_string()))?;

        // Serialize find-or-create per visitor so parallel tabs share one conversation
        let visitor_guard = self.locks.acquire(actor.id()).await;

        let (conversation, created) = match self
            .store
            .find_open_conversation(actor.tenant_id, inbox.id, actor.participant)
            .await?
        {
            Some(existing) => (existing, false),
            None => {
                let mut participants = vec![actor.participant];
                if let Some(bot) =
                    find_bot(self.directory.as_ref(), actor.tenant_id, inbox.id).await?
                {
                    participants.push(ParticipantRef::bot(bot.id));
                }
                let conversation = self
                    .store
                    .create_conversation(actor.tenant_id, inbox.id, &participants, None)
                    .await?;
                (conversation, true)
            }
        };
        drop(visitor_guard);

        let sent = match first_message {
            Some(content) => {
                let guard = self.lock(conversation.id).await;
                Some(
                    self.send_message(&guard, actor, content, MessageType::Text)
                        .await?,
                )
            }
            None => None,
        };

        Ok(ChatStart {
            conversation,
            created,
            sent,
        })
    }

    /// Open (or reuse) a conversation between two agents in an inbox both
    /// can reach through the initiator's grants.
    pub async fn start_agent_conversation(
        &self,
        actor: &Actor,
        target_email: &str,
        inbox_id: Option<Uuid>,
        first_message: Option<&str>,
    ) -> ChatResult<(ChatStart, AgentProfile)> {
        actor.require_agent()?;
        if let Some(content) = first_message {
            self.validate_content(content, MessageType::Text)?;
        }

        let inbox_id = match inbox_id {
            Some(inbox_id) => inbox_id,
            None => self
                .directory
                .first_agent_inbox(actor.tenant_id, actor.id())
                .await?
                .ok_or_else(|| ChatError::Validation("No inbox available".to_string()))?,
        };

        if !self
            .directory
            .agent_has_inbox_access(actor.tenant_id, actor.id(), inbox_id)
            .await?
        {
            return Err(ChatError::AccessDenied);
        }

        let target = self
            .directory
            .find_agent_by_email(actor.tenant_id, target_email.trim())
            .await?
            .ok_or_else(|| ChatError::NotFound("user".to_string()))?;

        if target.id == actor.id() {
            return Err(ChatError::Validation(
                "Cannot start a conversation with yourself".to_string(),
            ));
        }

        let initiator_guard = self.locks.acquire(actor.id()).await;
        let (conversation, created) = match self
            .store
            .find_direct_conversation(actor.tenant_id, inbox_id, actor.id(), target.id)
            .await?
        {
            Some(existing) => (existing, false),
            None => {
                let participants = [actor.participant, ParticipantRef::agent(target.id)];
                let conversation = self
                    .store
                    .create_conversation(actor.tenant_id, inbox_id, &participants, None)
                    .await?;
                (conversation, true)
            }
        };
        drop(initiator_guard);

        let sent = match first_message {
            Some(content) => {
                let guard = self.lock(conversation.id).await;
                Some(
                    self.send_message(&guard, actor, content, MessageType::Text)
                        .await?,
                )
            }
            None => None,
        };

        Ok((
            ChatStart {
                conversation,
                created,
                sent,
            },
            target,
        ))
    }

    /// Caller-directed status change (agents only)
    pub async fn update_status(
        &self,
        guard: &ConversationGuard,
        actor: &Actor,
        status: ConversationStatus,
    ) -> ChatResult<Conversation> {
        actor.require_agent()?;
        let conversation = self.authorize(actor, guard.conversation_id()).await?;
        self.store
            .update_status(actor.tenant_id, conversation.id, status)
            .await
    }

    /// Assign (or unassign with `None`) a human agent.
    ///
    /// Any agent with access to the conversation's inbox may assign. The
    /// assignee becomes a participant so it can join the room.
    pub async fn assign_agent(
        &self,
        guard: &ConversationGuard,
        actor: &Actor,
        agent_id: Option<Uuid>,
    ) -> ChatResult<Conversation> {
        actor.require_agent()?;
        let conversation_id = guard.conversation_id();

        let conversation = self
            .store
            .get_conversation(actor.tenant_id, conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("conversation".to_string()))?;

        if !self
            .directory
            .agent_has_inbox_access(actor.tenant_id, actor.id(), conversation.inbox_id)
            .await?
        {
            return Err(ChatError::AccessDenied);
        }

        if let Some(agent_id) = agent_id {
            let assignee = self
                .directory
                .find_agent(agent_id)
                .await?
                .filter(|a| a.tenant_id == actor.tenant_id)
                .ok_or_else(|| ChatError::NotFound("user".to_string()))?;

            self.store
                .add_participant(
                    actor.tenant_id,
                    conversation_id,
                    ParticipantRef::agent(assignee.id),
                )
                .await?;
        }

        let updated = self
            .store
            .assign_agent(actor.tenant_id, conversation_id, agent_id)
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            assigned_user_id = ?agent_id,
            "Conversation assignment changed"
        );

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BOT_REPLY;
    use crate::store::MemoryStore;
    use chatdesk_shared::Feature;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: ConversationService,
        tenant_id: Uuid,
        inbox_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = store.add_tenant("Acme").await;
        let inbox_id = store.add_inbox(tenant_id, "Web", true).await;
        let service = ConversationService::new(
            store.clone(),
            store.clone(),
            BotResponder::new(DEFAULT_BOT_REPLY),
            50,
        );
        Fixture {
            store,
            service,
            tenant_id,
            inbox_id,
        }
    }

    #[tokio::test]
    async fn test_send_validation_writes_nothing() {
        let f = fixture().await;
        let visitor = Actor::visitor(f.tenant_id, Uuid::new_v4(), "Visitor");
        let start = f.service.start_visitor_chat(&visitor, None, None).await.unwrap();
        let guard = f.service.lock(start.conversation.id).await;

        for (content, kind) in [
            ("   ", MessageType::Text),
            (&"x".repeat(51)[..], MessageType::Text),
            ("hello", MessageType::System),
        ] {
            assert!(matches!(
                f.service.send_message(&guard, &visitor, content, kind).await,
                Err(ChatError::Validation(_))
            ));
        }

        let messages = f
            .service
            .list_messages(&visitor, start.conversation.id, Page::default())
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_non_member_cannot_send() {
        let f = fixture().await;
        let visitor = Actor::visitor(f.tenant_id, Uuid::new_v4(), "Visitor");
        let stranger = Actor::visitor(f.tenant_id, Uuid::new_v4(), "Stranger");
        let start = f.service.start_visitor_chat(&visitor, None, None).await.unwrap();

        let guard = f.service.lock(start.conversation.id).await;
        assert!(matches!(
            f.service.send_message(&guard, &stranger, "hi", MessageType::Text).await,
            Err(ChatError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn test_visitor_chat_is_reused() {
        let f = fixture().await;
        let visitor = Actor::visitor(f.tenant_id, Uuid::new_v4(), "Visitor");

        let first = f
            .service
            .start_visitor_chat(&visitor, Some(f.inbox_id), Some("hello"))
            .await
            .unwrap();
        assert!(first.created);

        let second = f
            .service
            .start_visitor_chat(&visitor, Some(f.inbox_id), Some("again"))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(first.conversation.id, second.conversation.id);
    }

    #[tokio::test]
    async fn test_bot_skipped_once_assigned() {
        let f = fixture().await;
        f.store.set_feature(f.tenant_id, Feature::Bots, true).await;
        f.store.add_bot(f.tenant_id, Some(f.inbox_id), "Greeter").await;
        let agent_id = f.store.add_agent(f.tenant_id, "Ana", "ana@acme.test").await;
        f.store.grant_inbox(f.tenant_id, agent_id, f.inbox_id).await;
        let agent = Actor::agent(f.tenant_id, agent_id, "Ana");
        let visitor = Actor::visitor(f.tenant_id, Uuid::new_v4(), "Visitor");

        let start = f
            .service
            .start_visitor_chat(&visitor, None, Some("hello"))
            .await
            .unwrap();
        let sent = start.sent.unwrap();
        assert_eq!(
            sent.bot_reply.as_ref().map(|m| m.content.as_str()),
            Some(DEFAULT_BOT_REPLY)
        );

        let guard = f.service.lock(start.conversation.id).await;
        f.service
            .assign_agent(&guard, &agent, Some(agent_id))
            .await
            .unwrap();
        let outcome = f
            .service
            .send_message(&guard, &visitor, "still there?", MessageType::Text)
            .await
            .unwrap();
        assert!(outcome.bot_reply.is_none());

        // Assignment made the agent a member
        assert!(f.service.authorize(&agent, start.conversation.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_agent_conversation_requires_inbox_access() {
        let f = fixture().await;
        let ana = f.store.add_agent(f.tenant_id, "Ana", "ana@acme.test").await;
        let ben = f.store.add_agent(f.tenant_id, "Ben", "ben@acme.test").await;
        let actor = Actor::agent(f.tenant_id, ana, "Ana");

        assert!(matches!(
            f.service
                .start_agent_conversation(&actor, "ben@acme.test", Some(f.inbox_id), None)
                .await,
            Err(ChatError::AccessDenied)
        ));

        f.store.grant_inbox(f.tenant_id, ana, f.inbox_id).await;
        let (first, target) = f
            .service
            .start_agent_conversation(&actor, "ben@acme.test", None, Some("ping"))
            .await
            .unwrap();
        assert_eq!(target.id, ben);
        assert!(first.created);

        let (again, _) = f
            .service
            .start_agent_conversation(&actor, "ben@acme.test", None, None)
            .await
            .unwrap();
        assert_eq!(again.conversation.id, first.conversation.id);
    }

    #[tokio::test]
    async fn test_inbox_filters() {
        let f = fixture().await;
        let ana = f.store.add_agent(f.tenant_id, "Ana", "ana@acme.test").await;
        let ben = f.store.add_agent(f.tenant_id, "Ben", "ben@acme.test").await;
        f.store.grant_inbox(f.tenant_id, ana, f.inbox_id).await;
        let actor = Actor::agent(f.tenant_id, ana, "Ana");

        let mine = f
            .store
            .create_conversation(f.tenant_id, f.inbox_id, &[ParticipantRef::agent(ana)], Some(ana))
            .await
            .unwrap();
        let others = f
            .store
            .create_conversation(f.tenant_id, f.inbox_id, &[ParticipantRef::agent(ben)], Some(ben))
            .await
            .unwrap();
        let open = f
            .store
            .create_conversation(
                f.tenant_id,
                f.inbox_id,
                &[ParticipantRef::visitor(Uuid::new_v4())],
                None,
            )
            .await
            .unwrap();

        for (filter, expected) in [
            (InboxFilter::Mine, mine.id),
            (InboxFilter::Others, others.id),
            (InboxFilter::Unattended, open.id),
        ] {
            let listed = f
                .service
                .list_inbox_conversations(&actor, filter, None)
                .await
                .unwrap();
            assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![expected]);
        }

        assert!(matches!(
            f.service
                .list_inbox_conversations(&actor, InboxFilter::Mine, Some(Uuid::new_v4()))
                .await,
            Err(ChatError::AccessDenied)
        ));
    }
}
