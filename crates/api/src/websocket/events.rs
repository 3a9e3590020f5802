//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization.

use chatdesk_shared::{ChatError, Message, MessageStatus, MessageType, ParticipantType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::conversations::Actor;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to a conversation room
    JoinConversation { conversation_id: Uuid },

    /// Unsubscribe from a conversation room
    LeaveConversation { conversation_id: Uuid },

    /// Persist and broadcast a message
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: MessageType,
        /// Opaque client correlation id echoed in the `message_sent` ack
        #[serde(default)]
        client_message_id: Option<String>,
    },

    TypingStart { conversation_id: Uuid },

    TypingStop { conversation_id: Uuid },

    /// Mark messages from other participants as read
    MarkRead { conversation_id: Uuid },

    /// Live subscriber list of a room
    GetRoomParticipants { conversation_id: Uuid },

    /// Heartbeat ping to keep connection alive
    Ping,
}

impl ClientEvent {
    /// Operation name reported back in error events
    pub fn operation(&self) -> &'static str {
        match self {
            Self::JoinConversation { .. } => "join_conversation",
            Self::LeaveConversation { .. } => "leave_conversation",
            Self::SendMessage { .. } => "send_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::MarkRead { .. } => "mark_read",
            Self::GetRoomParticipants { .. } => "get_room_participants",
            Self::Ping => "ping",
        }
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::JoinConversation { conversation_id }
            | Self::LeaveConversation { conversation_id }
            | Self::SendMessage { conversation_id, .. }
            | Self::TypingStart { conversation_id }
            | Self::TypingStop { conversation_id }
            | Self::MarkRead { conversation_id }
            | Self::GetRoomParticipants { conversation_id } => Some(*conversation_id),
            Self::Ping => None,
        }
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected {
        session_id: Uuid,
        tenant_id: Uuid,
        role: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        participant: Option<RoomParticipant>,
    },

    ParticipantJoined {
        conversation_id: Uuid,
        participant: RoomParticipant,
    },

    ParticipantLeft {
        conversation_id: Uuid,
        participant: RoomParticipant,
    },

    /// A subscriber's connection went away
    ParticipantOffline {
        conversation_id: Uuid,
        participant: RoomParticipant,
    },

    NewMessage {
        conversation_id: Uuid,
        message: Message,
    },

    /// Acknowledgement to the sending connection only
    MessageSent {
        conversation_id: Uuid,
        message_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_message_id: Option<String>,
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
    },

    MessageStatusUpdate {
        conversation_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    },

    TypingStateChanged {
        conversation_id: Uuid,
        participant: RoomParticipant,
        is_typing: bool,
    },

    MessagesMarkedRead {
        conversation_id: Uuid,
        reader: RoomParticipant,
        message_ids: Vec<Uuid>,
    },

    RoomParticipants {
        conversation_id: Uuid,
        participants: Vec<RoomParticipant>,
    },

    /// Direct `user:{id}` notice that someone opened a conversation with them
    ConversationCreated {
        conversation_id: Uuid,
        inbox_id: Uuid,
        initiator: RoomParticipant,
    },

    /// Direct `user:{id}` notice that a conversation was assigned to them
    ConversationAssigned {
        conversation_id: Uuid,
        inbox_id: Uuid,
        assigned_by: RoomParticipant,
    },

    /// Heartbeat response
    Pong,

    /// Per-operation failure, sent only to the invoking connection
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Uuid>,
    },
}

impl ServerEvent {
    pub fn error(
        err: &ChatError,
        operation: Option<&'static str>,
        conversation_id: Option<Uuid>,
    ) -> Self {
        Self::Error {
            code: err.code(),
            message: err.public_message(),
            operation,
            conversation_id,
        }
    }

    /// Wire name of the event, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::ParticipantOffline { .. } => "participant_offline",
            Self::NewMessage { .. } => "new_message",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageStatusUpdate { .. } => "message_status_update",
            Self::TypingStateChanged { .. } => "typing_state_changed",
            Self::MessagesMarkedRead { .. } => "messages_marked_read",
            Self::RoomParticipants { .. } => "room_participants",
            Self::ConversationCreated { .. } => "conversation_created",
            Self::ConversationAssigned { .. } => "conversation_assigned",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Principal as shown to other room subscribers
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RoomParticipant {
    pub participant_type: ParticipantType,
    pub participant_id: Uuid,
    pub name: String,
}

impl From<&Actor> for RoomParticipant {
    fn from(actor: &Actor) -> Self {
        Self {
            participant_type: actor.participant.participant_type,
            participant_id: actor.participant.participant_id,
            name: actor.display_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_defaults() {
        let json = r#"{"type":"send_message","conversation_id":"550e8400-e29b-41d4-a716-446655440000","content":"hi"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SendMessage {
                content,
                message_type,
                client_message_id,
                ..
            } => {
                assert_eq!(content, "hi");
                assert_eq!(message_type, MessageType::Text);
                assert!(client_message_id.is_none());
            }
            _ => panic!("Expected SendMessage event"),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"set_presence"}"#).is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let json = serde_json::to_string(&ServerEvent::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_error_event_hides_internal_detail() {
        let event = ServerEvent::error(
            &ChatError::Internal("pool timed out".to_string()),
            Some("send_message"),
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "INTERNAL_FAILURE");
        assert_eq!(json["operation"], "send_message");
        assert!(!json["message"].as_str().unwrap().contains("pool"));
        assert!(json.get("conversation_id").is_none());
    }

    #[test]
    fn test_participant_type_wire_names() {
        let participant = RoomParticipant {
            participant_type: ParticipantType::Agent,
            participant_id: Uuid::nil(),
            name: "Ana".to_string(),
        };
        let json = serde_json::to_value(&participant).unwrap();
        assert_eq!(json["participant_type"], "user");
    }
}
