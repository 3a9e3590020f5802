//! WebSocket connection management
//!
//! Represents an authenticated realtime session with room subscription tracking.

use std::collections::HashSet;
use std::sync::Arc;

use chatdesk_shared::ParticipantRef;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::{RoomParticipant, ServerEvent};
use crate::conversations::Actor;

/// Display name used for visitors in room events
const VISITOR_DISPLAY_NAME: &str = "Visitor";

/// Authenticated identity behind a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Human agent authenticated with an access token
    Agent {
        user_id: Uuid,
        name: String,
        email: String,
    },
    /// Website widget session. `visitor_id` is known once the widget has
    /// registered a visitor; anonymous widget sessions cannot join rooms.
    Visitor {
        widget_key: Option<String>,
        visitor_id: Option<Uuid>,
        session_id: Option<String>,
    },
}

impl Principal {
    pub fn role(&self) -> &'static str {
        match self {
            Self::Agent { .. } => "agent",
            Self::Visitor { .. } => "visitor",
        }
    }
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique session ID for this connection
    pub session_id: Uuid,

    /// Tenant derived from verified identity
    pub tenant_id: Uuid,

    pub principal: Principal,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Set of conversation IDs this connection has joined
    pub subscriptions: Arc<RwLock<HashSet<Uuid>>>,
}

impl Connection {
    pub fn new(
        tenant_id: Uuid,
        principal: Principal,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            tenant_id,
            principal,
            sender,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Conversation participant this connection acts as, if identified
    pub fn participant(&self) -> Option<ParticipantRef> {
        match &self.principal {
            Principal::Agent { user_id, .. } => Some(ParticipantRef::agent(*user_id)),
            Principal::Visitor { visitor_id, .. } => visitor_id.map(ParticipantRef::visitor),
        }
    }

    pub fn display_name(&self) -> &str {
        match &self.principal {
            Principal::Agent { name, .. } => name,
            Principal::Visitor { .. } => VISITOR_DISPLAY_NAME,
        }
    }

    /// Agent user id, for `user:{id}` addressing
    pub fn agent_id(&self) -> Option<Uuid> {
        match &self.principal {
            Principal::Agent { user_id, .. } => Some(*user_id),
            Principal::Visitor { .. } => None,
        }
    }

    pub fn actor(&self) -> Option<Actor> {
        self.participant().map(|participant| Actor {
            tenant_id: self.tenant_id,
            participant,
            display_name: self.display_name().to_string(),
        })
    }

    /// Public room representation of this connection's principal
    pub fn room_participant(&self) -> Option<RoomParticipant> {
        self.participant().map(|participant| RoomParticipant {
            participant_type: participant.participant_type,
            participant_id: participant.participant_id,
            name: self.display_name().to_string(),
        })
    }

    pub async fn subscribe(&self, conversation_id: Uuid) {
        let mut subs = self.subscriptions.write().await;
        subs.insert(conversation_id);
        tracing::debug!(
            session_id = %self.session_id,
            conversation_id = %conversation_id,
            "Subscribed to conversation"
        );
    }

    pub async fn unsubscribe(&self, conversation_id: Uuid) {
        let mut subs = self.subscriptions.write().await;
        subs.remove(&conversation_id);
        tracing::debug!(
            session_id = %self.session_id,
            conversation_id = %conversation_id,
            "Unsubscribed from conversation"
        );
    }

    pub async fn is_subscribed(&self, conversation_id: &Uuid) -> bool {
        let subs = self.subscriptions.read().await;
        subs.contains(conversation_id)
    }

    pub async fn get_subscriptions(&self) -> HashSet<Uuid> {
        let subs = self.subscriptions.read().await;
        subs.clone()
    }
}
