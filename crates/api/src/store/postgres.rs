//! Postgres-backed store

use async_trait::async_trait;
use chatdesk_shared::{
    AgentProfile, Bot, ChatError, ChatResult, Conversation, ConversationStatus, Feature, Inbox,
    InboxFilter, Message, MessageStatus, NewMessage, NewVisitor, Page, ParticipantRef, Tenant,
    Visitor, WidgetTenant,
};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ConversationStore, Directory};

const CONVERSATION_COLUMNS: &str = "c.id, c.tenant_id, c.inbox_id, c.status, c.assigned_user_id, \
                                    c.last_message_at, c.created_at, c.updated_at";

const MESSAGE_COLUMNS: &str = "id, tenant_id, conversation_id, sender_type, sender_id, content, \
                               message_type, status, created_at";

/// Store implementation over a shared connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn health_check(&self) -> ChatResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn is_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
              SELECT 1 FROM conversation_participants
              WHERE tenant_id = $1
                AND conversation_id = $2
                AND participant_type = $3
                AND participant_id = $4
            )
            "#,
        )
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(participant.participant_type)
        .bind(participant.participant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn get_conversation(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1 AND c.tenant_id = $2"
        ))
        .bind(conversation_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
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

        let mut tx = self.pool.begin().await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, tenant_id, inbox_id, status, assigned_user_id, created_at, updated_at)
            VALUES ($1, $2, $3, 'open', $4, NOW(), NOW())
            RETURNING id, tenant_id, inbox_id, status, assigned_user_id, last_message_at, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(inbox_id)
        .bind(assigned_user_id)
        .fetch_one(&mut *tx)
        .await?;

        for participant in participants {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants
                  (id, tenant_id, conversation_id, participant_type, participant_id, joined_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (tenant_id, conversation_id, participant_type, participant_id) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(tenant_id)
            .bind(conversation.id)
            .bind(participant.participant_type)
            .bind(participant.participant_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation.id,
            tenant_id = %tenant_id,
            inbox_id = %inbox_id,
            participants = participants.len(),
            "Conversation created"
        );

        Ok(conversation)
    }

    async fn add_participant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<bool> {
        // The SELECT guards against attaching members to another tenant's conversation
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_participants
              (id, tenant_id, conversation_id, participant_type, participant_id, joined_at)
            SELECT $1, c.tenant_id, c.id, $4, $5, NOW()
            FROM conversations c
            WHERE c.id = $3 AND c.tenant_id = $2
            ON CONFLICT (tenant_id, conversation_id, participant_type, participant_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(participant.participant_type)
        .bind(participant.participant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_participants(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<Vec<ParticipantRef>> {
        let participants = sqlx::query_as::<_, ParticipantRef>(
            r#"
            SELECT participant_type, participant_id
            FROM conversation_participants
            WHERE tenant_id = $1 AND conversation_id = $2
            ORDER BY joined_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }

    async fn append_message(&self, message: NewMessage) -> ChatResult<Message> {
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query_as::<_, Message>(&format!(
            r#"
            INSERT INTO messages
              (id, tenant_id, conversation_id, sender_type, sender_id, content, message_type, status, created_at)
            SELECT $1, c.tenant_id, c.id, $4, $5, $6, $7, 'sent', NOW()
            FROM conversations c
            WHERE c.id = $3 AND c.tenant_id = $2
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(message.tenant_id)
        .bind(message.conversation_id)
        .bind(message.sender.participant_type)
        .bind(message.sender.participant_id)
        .bind(&message.content)
        .bind(message.message_type)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ChatError::NotFound("conversation".to_string()))?;

        sqlx::query(
            "UPDATE conversations SET last_message_at = $3, updated_at = NOW() WHERE id = $1 AND tenant_id = $2",
        )
        .bind(message.conversation_id)
        .bind(message.tenant_id)
        .bind(stored.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(stored)
    }

    async fn list_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        page: Page,
    ) -> ChatResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE tenant_id = $1 AND conversation_id = $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(i64::from(page.limit))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn set_message_status(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> ChatResult<bool> {
        let predecessors = status.predecessors();
        if predecessors.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            "UPDATE messages SET status = $3 WHERE id = $1 AND tenant_id = $2 AND status = ANY($4)",
        )
        .bind(message_id)
        .bind(tenant_id)
        .bind(status)
        .bind(predecessors)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_read(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        reader: ParticipantRef,
    ) -> ChatResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE messages SET status = 'read'
            WHERE tenant_id = $1
              AND conversation_id = $2
              AND status <> 'read'
              AND NOT (sender_type = $3 AND sender_id = $4)
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(conversation_id)
        .bind(reader.participant_type)
        .bind(reader.participant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn update_status(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> ChatResult<Conversation> {
        sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET status = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, inbox_id, status, assigned_user_id, last_message_at, created_at, updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ChatError::NotFound("conversation".to_string()))
    }

    async fn assign_agent(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> ChatResult<Conversation> {
        sqlx::query_as::<_, Conversation>(
            r#"
            UPDATE conversations SET assigned_user_id = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, inbox_id, status, assigned_user_id, last_message_at, created_at, updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ChatError::NotFound("conversation".to_string()))
    }

    async fn find_open_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        participant: ParticipantRef,
    ) -> ChatResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            JOIN conversation_participants cp
              ON cp.conversation_id = c.id AND cp.tenant_id = c.tenant_id
            WHERE c.tenant_id = $1
              AND c.inbox_id = $2
              AND c.status = 'open'
              AND cp.participant_type = $3
              AND cp.participant_id = $4
            ORDER BY c.created_at DESC
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .bind(inbox_id)
        .bind(participant.participant_type)
        .bind(participant.participant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn find_direct_conversation(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
        first_agent: Uuid,
        second_agent: Uuid,
    ) -> ChatResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            JOIN conversation_participants cp1
              ON cp1.conversation_id = c.id AND cp1.tenant_id = c.tenant_id
             AND cp1.participant_type = 'user' AND cp1.participant_id = $3
            JOIN conversation_participants cp2
              ON cp2.conversation_id = c.id AND cp2.tenant_id = c.tenant_id
             AND cp2.participant_type = 'user' AND cp2.participant_id = $4
            WHERE c.tenant_id = $1 AND c.inbox_id = $2
            ORDER BY c.created_at DESC
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .bind(inbox_id)
        .bind(first_agent)
        .bind(second_agent)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn list_inbox_conversations(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        filter: InboxFilter,
        inbox_ids: &[Uuid],
    ) -> ChatResult<Vec<Conversation>> {
        if inbox_ids.is_empty() {
            return Ok(Vec::new());
        }

        let assignment = match filter {
            InboxFilter::Mine => "c.assigned_user_id = $3",
            InboxFilter::Others => "c.assigned_user_id IS NOT NULL AND c.assigned_user_id <> $3",
            InboxFilter::Unattended => "c.assigned_user_id IS NULL",
        };

        let conversations = sqlx::query_as::<_, Conversation>(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            WHERE c.tenant_id = $1
              AND c.inbox_id = ANY($2)
              AND {assignment}
            ORDER BY c.last_message_at DESC NULLS LAST, c.created_at DESC
            "#
        ))
        .bind(tenant_id)
        .bind(inbox_ids)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn find_agent(&self, agent_id: Uuid) -> ChatResult<Option<AgentProfile>> {
        let agent = sqlx::query_as::<_, AgentProfile>(
            "SELECT id, tenant_id, name, email, is_online FROM users WHERE id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(agent)
    }

    async fn find_agent_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> ChatResult<Option<AgentProfile>> {
        let agent = sqlx::query_as::<_, AgentProfile>(
            "SELECT id, tenant_id, name, email, is_online FROM users WHERE tenant_id = $1 AND email = $2",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(agent)
    }

    async fn search_agents(
        &self,
        tenant_id: Uuid,
        term: &str,
        exclude: Uuid,
        limit: i64,
    ) -> ChatResult<Vec<AgentProfile>> {
        let pattern = format!("%{}%", escape_like(term));
        let agents = sqlx::query_as::<_, AgentProfile>(
            r#"
            SELECT id, tenant_id, name, email, is_online FROM users
            WHERE tenant_id = $1 AND id <> $2
              AND (name ILIKE $3 ESCAPE '\' OR email ILIKE $3 ESCAPE '\')
            ORDER BY name ASC
            LIMIT $4
            "#,
        )
        .bind(tenant_id)
        .bind(exclude)
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(agents)
    }

    async fn set_agent_online(&self, agent_id: Uuid, online: bool) -> ChatResult<()> {
        sqlx::query("UPDATE users SET is_online = $2, last_seen = NOW() WHERE id = $1")
            .bind(agent_id)
            .bind(online)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn resolve_widget_key(&self, api_key: &str) -> ChatResult<Option<WidgetTenant>> {
        let row = sqlx::query_as::<_, (Uuid, bool)>(
            r#"
            SELECT t.id, t.is_active
            FROM chat_sdk_settings s
            JOIN tenants t ON t.id = s.tenant_id
            WHERE s.api_key = $1 AND s.is_active = TRUE
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(tenant_id, tenant_active)| WidgetTenant {
            tenant_id,
            tenant_active,
        }))
    }

    async fn widget_allowed_domains(&self, api_key: &str) -> ChatResult<Option<String>> {
        let domains = sqlx::query_scalar::<_, Option<String>>(
            "SELECT allowed_domains FROM chat_sdk_settings WHERE api_key = $1 AND is_active = TRUE",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(domains.flatten())
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> ChatResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, domain, is_active, created_at FROM tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn find_visitor(
        &self,
        tenant_id: Uuid,
        visitor_id: Uuid,
    ) -> ChatResult<Option<Visitor>> {
        let visitor = sqlx::query_as::<_, Visitor>(
            r#"
            SELECT id, tenant_id, name, email, session_id, created_at
            FROM external_visitors
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(visitor_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(visitor)
    }

    async fn find_visitor_by_session(
        &self,
        tenant_id: Uuid,
        session_id: &str,
    ) -> ChatResult<Option<Visitor>> {
        let visitor = sqlx::query_as::<_, Visitor>(
            r#"
            SELECT id, tenant_id, name, email, session_id, created_at
            FROM external_visitors
            WHERE tenant_id = $1 AND session_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(visitor)
    }

    async fn create_visitor(&self, tenant_id: Uuid, visitor: NewVisitor) -> ChatResult<Visitor> {
        let created = sqlx::query_as::<_, Visitor>(
            r#"
            INSERT INTO external_visitors
              (id, tenant_id, name, email, phone, session_id, ip_address, user_agent, referrer_url,
               status, created_at, last_activity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active', NOW(), NOW())
            RETURNING id, tenant_id, name, email, session_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&visitor.name)
        .bind(&visitor.email)
        .bind(&visitor.phone)
        .bind(&visitor.session_id)
        .bind(&visitor.ip_address)
        .bind(&visitor.user_agent)
        .bind(&visitor.referrer_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn is_feature_enabled(&self, tenant_id: Uuid, feature: Feature) -> ChatResult<bool> {
        let enabled = sqlx::query_scalar::<_, bool>(
            "SELECT is_enabled FROM tenant_features WHERE tenant_id = $1 AND feature_name = $2",
        )
        .bind(tenant_id)
        .bind(feature.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(enabled.unwrap_or(false))
    }

    async fn find_inbox_bot(&self, tenant_id: Uuid, inbox_id: Uuid) -> ChatResult<Option<Bot>> {
        let bot = sqlx::query_as::<_, Bot>(
            r#"
            SELECT b.id, b.tenant_id, b.inbox_id, b.name, b.is_active
            FROM bots b
            LEFT JOIN inboxes i ON i.id = $2 AND i.tenant_id = b.tenant_id
            WHERE b.tenant_id = $1
              AND b.is_active = TRUE
              AND (b.inbox_id = $2 OR b.id = i.bot_id)
            ORDER BY (b.inbox_id = $2) DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(inbox_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bot)
    }

    async fn find_tenant_bot(&self, tenant_id: Uuid) -> ChatResult<Option<Bot>> {
        let bot = sqlx::query_as::<_, Bot>(
            r#"
            SELECT id, tenant_id, inbox_id, name, is_active
            FROM bots
            WHERE tenant_id = $1 AND inbox_id IS NULL AND is_active = TRUE
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bot)
    }

    async fn default_inbox(&self, tenant_id: Uuid) -> ChatResult<Option<Inbox>> {
        let inbox = sqlx::query_as::<_, Inbox>(
            r#"
            SELECT id, tenant_id, name, is_active, bot_id
            FROM inboxes
            WHERE tenant_id = $1 AND is_default = TRUE AND is_active = TRUE
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inbox)
    }

    async fn find_active_inbox(
        &self,
        tenant_id: Uuid,
        inbox_id: Uuid,
    ) -> ChatResult<Option<Inbox>> {
        let inbox = sqlx::query_as::<_, Inbox>(
            r#"
            SELECT id, tenant_id, name, is_active, bot_id
            FROM inboxes
            WHERE id = $1 AND tenant_id = $2 AND is_active = TRUE
            "#,
        )
        .bind(inbox_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inbox)
    }

    async fn agent_inboxes(&self, tenant_id: Uuid, agent_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let inboxes = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT inbox_id FROM user_inboxes
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(inboxes)
    }
}

/// Escape LIKE metacharacters so user input only matches literally
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = chatdesk_shared::create_pool(&url, 2)
            .await
            .expect("Failed to create pool");
        chatdesk_shared::run_migrations(&pool)
            .await
            .expect("Failed to migrate");
        PgStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_membership_insert_is_idempotent() {
        let store = test_store().await;
        let tenant_id = Uuid::new_v4();
        let inbox_id = Uuid::new_v4();
        let visitor = ParticipantRef::visitor(Uuid::new_v4());

        sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, 'Acme')")
            .bind(tenant_id)
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO inboxes (id, tenant_id, name, is_default) VALUES ($1, $2, 'Web', TRUE)")
            .bind(inbox_id)
            .bind(tenant_id)
            .execute(store.pool())
            .await
            .unwrap();

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

        // Wrong tenant sees nothing
        assert!(!store
            .is_participant(Uuid::new_v4(), conversation.id, visitor)
            .await
            .unwrap());
    }

    #[test]
    fn test_escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("alice"), "alice");
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }
}
