//! Room router: conversation operations plus their realtime fan-out
//!
//! Both transports go through here for anything that changes a
//! conversation. Each mutating call holds the conversation guard from the
//! store write until its broadcasts are queued, so subscribers observe
//! messages in persisted order.

use std::sync::Arc;

use chatdesk_shared::{
    AgentProfile, ChatError, ChatResult, Conversation, ConversationStatus, MessageType,
};
use uuid::Uuid;

use super::connection::Connection;
use super::delivery::DeliveryScheduler;
use super::events::{RoomParticipant, ServerEvent};
use super::state::WebSocketState;
use crate::conversations::{Actor, ChatStart, ConversationService, SendOutcome};

/// Where to send the `message_sent` acknowledgement for a realtime send
pub struct MessageAck<'a> {
    pub connection: &'a Connection,
    pub client_message_id: Option<String>,
}

pub struct RoomRouter {
    service: Arc<ConversationService>,
    ws_state: WebSocketState,
    delivery: DeliveryScheduler,
}

impl RoomRouter {
    pub fn new(
        service: Arc<ConversationService>,
        ws_state: WebSocketState,
        delivery: DeliveryScheduler,
    ) -> Self {
        Self {
            service,
            ws_state,
            delivery,
        }
    }

    pub fn service(&self) -> &Arc<ConversationService> {
        &self.service
    }

    pub fn delivery(&self) -> &DeliveryScheduler {
        &self.delivery
    }

    /// Subscribe a connection to a conversation room.
    ///
    /// Membership is checked against the store on every join. The joiner
    /// receives the live participant list; everyone else is told only when
    /// the connection was not already subscribed.
    pub async fn join(
        &self,
        conn: &Arc<Connection>,
        conversation_id: Uuid,
    ) -> ChatResult<Vec<RoomParticipant>> {
        let actor = conn.actor().ok_or(ChatError::AccessDenied)?;
        let participant = RoomParticipant::from(&actor);

        let _guard = self.service.lock(conversation_id).await;
        let conversation = self.service.authorize(&actor, conversation_id).await?;
        if conversation.tenant_id != conn.tenant_id {
            return Err(ChatError::AccessDenied);
        }

        let rooms = &self.ws_state.rooms;
        let newly_joined = rooms.join(conversation_id, Arc::clone(conn)).await;
        conn.subscribe(conversation_id).await;

        let participants = rooms.participants(&conversation_id).await;
        let _ = conn.send(ServerEvent::RoomParticipants {
            conversation_id,
            participants: participants.clone(),
        });

        if newly_joined {
            rooms
                .broadcast_except(
                    &conversation_id,
                    ServerEvent::ParticipantJoined {
                        conversation_id,
                        participant,
                    },
                    &conn.session_id,
                )
                .await;
        }

        tracing::info!(
            session_id = %conn.session_id,
            conversation_id = %conversation_id,
            "Joined conversation room"
        );

        Ok(participants)
    }

    /// Unsubscribe a connection. Returns whether it was subscribed.
    pub async fn leave(&self, conn: &Connection, conversation_id: Uuid) -> bool {
        let removed = self
            .ws_state
            .rooms
            .leave(&conversation_id, &conn.session_id)
            .await;
        conn.unsubscribe(conversation_id).await;

        if let (true, Some(participant)) = (removed, conn.room_participant()) {
            self.ws_state
                .rooms
                .broadcast(
                    &conversation_id,
                    ServerEvent::ParticipantLeft {
                        conversation_id,
                        participant,
                    },
                )
                .await;
        }

        removed
    }

    /// Persist a message, acknowledge the sender, and fan it out.
    ///
    /// Every subscriber (the sender's own connections included) receives
    /// exactly one `new_message` per persisted message.
    pub async fn send_message(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        content: &str,
        message_type: MessageType,
        ack: Option<MessageAck<'_>>,
    ) -> ChatResult<SendOutcome> {
        let guard = self.service.lock(conversation_id).await;
        let outcome = self
            .service
            .send_message(&guard, actor, content, message_type)
            .await?;

        if let Some(ack) = ack {
            let _ = ack.connection.send(ServerEvent::MessageSent {
                conversation_id,
                message_id: outcome.message.id,
                client_message_id: ack.client_message_id,
                created_at: outcome.message.created_at,
            });
        }

        self.publish(&outcome).await;
        Ok(outcome)
    }

    async fn publish(&self, outcome: &SendOutcome) {
        for message in outcome.messages() {
            self.ws_state
                .rooms
                .broadcast(
                    &message.conversation_id,
                    ServerEvent::NewMessage {
                        conversation_id: message.conversation_id,
                        message: message.clone(),
                    },
                )
                .await;
            self.delivery
                .schedule(message.tenant_id, message.conversation_id, message.id);
        }
    }

    /// Relay a typing indicator to the other subscribers. Nothing is stored.
    pub async fn typing(
        &self,
        conn: &Connection,
        conversation_id: Uuid,
        is_typing: bool,
    ) -> ChatResult<()> {
        if !conn.is_subscribed(&conversation_id).await {
            return Err(ChatError::AccessDenied);
        }
        let participant = conn.room_participant().ok_or(ChatError::AccessDenied)?;

        self.ws_state
            .rooms
            .broadcast_except(
                &conversation_id,
                ServerEvent::TypingStateChanged {
                    conversation_id,
                    participant,
                    is_typing,
                },
                &conn.session_id,
            )
            .await;
        Ok(())
    }

    /// Mark the other participants' messages read and notify subscribers,
    /// except `origin_session` when the request came over a socket.
    pub async fn mark_read(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        origin_session: Option<Uuid>,
    ) -> ChatResult<Vec<Uuid>> {
        let guard = self.service.lock(conversation_id).await;
        let message_ids = self.service.mark_read(&guard, actor).await?;

        if !message_ids.is_empty() {
            let event = ServerEvent::MessagesMarkedRead {
                conversation_id,
                reader: RoomParticipant::from(actor),
                message_ids: message_ids.clone(),
            };
            let rooms = &self.ws_state.rooms;
            match origin_session {
                Some(session_id) => {
                    rooms
                        .broadcast_except(&conversation_id, event, &session_id)
                        .await
                }
                None => rooms.broadcast(&conversation_id, event).await,
            };
        }

        Ok(message_ids)
    }

    /// Live subscribers of a room the connection has joined
    pub async fn room_participants(
        &self,
        conn: &Connection,
        conversation_id: Uuid,
    ) -> ChatResult<Vec<RoomParticipant>> {
        if !conn.is_subscribed(&conversation_id).await {
            return Err(ChatError::AccessDenied);
        }
        Ok(self.ws_state.rooms.participants(&conversation_id).await)
    }

    pub async fn update_status(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> ChatResult<Conversation> {
        let guard = self.service.lock(conversation_id).await;
        let conversation = self.service.update_status(&guard, actor, status).await?;

        if status == ConversationStatus::Closed {
            self.delivery.cancel_conversation(conversation_id);
        }

        Ok(conversation)
    }

    /// Assign a conversation and notify the assignee's sessions
    pub async fn assign_agent(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> ChatResult<Conversation> {
        let guard = self.service.lock(conversation_id).await;
        let conversation = self.service.assign_agent(&guard, actor, agent_id).await?;

        if let Some(agent_id) = agent_id.filter(|id| *id != actor.id()) {
            self.ws_state
                .send_to_user(
                    &agent_id,
                    ServerEvent::ConversationAssigned {
                        conversation_id,
                        inbox_id: conversation.inbox_id,
                        assigned_by: RoomParticipant::from(actor),
                    },
                )
                .await;
        }

        Ok(conversation)
    }

    /// Start or continue a visitor chat, publishing the first message
    pub async fn start_visitor_chat(
        &self,
        actor: &Actor,
        inbox_id: Option<Uuid>,
        first_message: Option<&str>,
    ) -> ChatResult<ChatStart> {
        if let Some(content) = first_message {
            self.service.validate_content(content, MessageType::Text)?;
        }

        let mut start = self.service.start_visitor_chat(actor, inbox_id, None).await?;
        if let Some(content) = first_message {
            start.sent = Some(
                self.send_message(actor, start.conversation.id, content, MessageType::Text, None)
                    .await?,
            );
        }

        Ok(start)
    }

    /// Open a conversation with another agent and notify them when it is new
    pub async fn start_agent_conversation(
        &self,
        actor: &Actor,
        target_email: &str,
        inbox_id: Option<Uuid>,
        first_message: Option<&str>,
    ) -> ChatResult<(ChatStart, AgentProfile)> {
        if let Some(content) = first_message {
            self.service.validate_content(content, MessageType::Text)?;
        }

        let (mut start, target) = self
            .service
            .start_agent_conversation(actor, target_email, inbox_id, None)
            .await?;

        if start.created {
            self.ws_state
                .send_to_user(
                    &target.id,
                    ServerEvent::ConversationCreated {
                        conversation_id: start.conversation.id,
                        inbox_id: start.conversation.inbox_id,
                        initiator: RoomParticipant::from(actor),
                    },
                )
                .await;
        }

        if let Some(content) = first_message {
            start.sent = Some(
                self.send_message(actor, start.conversation.id, content, MessageType::Text, None)
                    .await?,
            );
        }

        Ok((start, target))
    }
}
