//! Conversation room management for pub/sub
//!
//! Room membership is live and in-memory only. It is rebuilt from scratch
//! as clients reconnect and re-join; authorization is never inferred from it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::{RoomParticipant, ServerEvent};

/// Manages conversation "rooms" for broadcasting events
pub struct RoomManager {
    /// Map of conversation_id -> list of connections
    rooms: Arc<RwLock<HashMap<Uuid, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a conversation room.
    ///
    /// Returns `false` if the session was already subscribed.
    pub async fn join(&self, conversation_id: Uuid, conn: Arc<Connection>) -> bool {
        let mut rooms = self.rooms.write().await;
        let conns = rooms.entry(conversation_id).or_default();

        if conns.iter().any(|c| c.session_id == conn.session_id) {
            return false;
        }
        conns.push(Arc::clone(&conn));

        tracing::debug!(
            conversation_id = %conversation_id,
            session_id = %conn.session_id,
            room_size = conns.len(),
            "Connection joined conversation room"
        );
        true
    }

    /// Remove a connection from a room. Returns whether it was a member.
    pub async fn leave(&self, conversation_id: &Uuid, session_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(conns) = rooms.get_mut(conversation_id) else {
            return false;
        };

        let before_len = conns.len();
        conns.retain(|c| c.session_id != *session_id);
        let removed = conns.len() < before_len;

        if conns.is_empty() {
            rooms.remove(conversation_id);
            tracing::debug!(conversation_id = %conversation_id, "Removed empty conversation room");
        } else if removed {
            tracing::debug!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                room_size = conns.len(),
                "Connection left conversation room"
            );
        }

        removed
    }

    /// Broadcast an event to all connections in a room
    ///
    /// Silently ignores send errors (closed connections will be cleaned up).
    /// Returns the number of connections reached.
    pub async fn broadcast(&self, conversation_id: &Uuid, event: ServerEvent) -> usize {
        self.broadcast_filtered(conversation_id, event, None).await
    }

    /// Broadcast to every connection in a room except `session_id`
    pub async fn broadcast_except(
        &self,
        conversation_id: &Uuid,
        event: ServerEvent,
        session_id: &Uuid,
    ) -> usize {
        self.broadcast_filtered(conversation_id, event, Some(session_id))
            .await
    }

    async fn broadcast_filtered(
        &self,
        conversation_id: &Uuid,
        event: ServerEvent,
        skip: Option<&Uuid>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(conversation_id) else {
            tracing::trace!(
                conversation_id = %conversation_id,
                event_type = event.kind(),
                "No subscribers for conversation"
            );
            return 0;
        };

        let mut success_count = 0;
        let mut failed_count = 0;

        for conn in conns.iter().filter(|c| Some(&c.session_id) != skip) {
            match conn.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            event_type = event.kind(),
            recipients = success_count,
            failed = failed_count,
            "Broadcast event to conversation room"
        );

        success_count
    }

    /// Live subscribers, one entry per principal even with several connections
    pub async fn participants(&self, conversation_id: &Uuid) -> Vec<RoomParticipant> {
        let rooms = self.rooms.read().await;
        let mut participants: Vec<RoomParticipant> = Vec::new();

        for participant in rooms
            .get(conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|c| c.room_participant())
        {
            if !participants.iter().any(|p| {
                p.participant_type == participant.participant_type
                    && p.participant_id == participant.participant_id
            }) {
                participants.push(participant);
            }
        }

        participants
    }

    /// Remove a connection from all rooms, returning the rooms it left
    pub async fn remove_connection(&self, session_id: &Uuid) -> Vec<Uuid> {
        let mut rooms = self.rooms.write().await;
        let mut removed_from = Vec::new();

        for (conversation_id, conns) in rooms.iter_mut() {
            let before_len = conns.len();
            conns.retain(|c| c.session_id != *session_id);
            if conns.len() < before_len {
                removed_from.push(*conversation_id);
            }
        }

        // Clean up empty rooms
        rooms.retain(|_, conns| !conns.is_empty());

        if !removed_from.is_empty() {
            tracing::debug!(
                session_id = %session_id,
                room_count = removed_from.len(),
                "Removed connection from rooms"
            );
        }

        removed_from
    }

    pub async fn get_room_size(&self, conversation_id: &Uuid) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(conversation_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Principal;
    use tokio::sync::mpsc;

    fn agent_conn(
        user_id: Uuid,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            Uuid::new_v4(),
            Principal::Agent {
                user_id,
                name: "Ana".to_string(),
                email: "ana@acme.test".to_string(),
            },
            tx,
        );
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn test_room_join_and_leave() {
        let room_manager = RoomManager::new();
        let conversation_id = Uuid::new_v4();
        let (conn, _rx) = agent_conn(Uuid::new_v4());

        assert_eq!(room_manager.get_room_size(&conversation_id).await, 0);

        assert!(room_manager.join(conversation_id, Arc::clone(&conn)).await);
        assert!(!room_manager.join(conversation_id, Arc::clone(&conn)).await);
        assert_eq!(room_manager.get_room_size(&conversation_id).await, 1);

        assert!(room_manager.leave(&conversation_id, &conn.session_id).await);
        assert!(!room_manager.leave(&conversation_id, &conn.session_id).await);
        assert_eq!(room_manager.get_room_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_origin() {
        let room_manager = RoomManager::new();
        let conversation_id = Uuid::new_v4();
        let (conn1, mut rx1) = agent_conn(Uuid::new_v4());
        let (conn2, mut rx2) = agent_conn(Uuid::new_v4());

        room_manager.join(conversation_id, Arc::clone(&conn1)).await;
        room_manager.join(conversation_id, conn2).await;

        let reached = room_manager
            .broadcast_except(&conversation_id, ServerEvent::Pong, &conn1.session_id)
            .await;
        assert_eq!(reached, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_participants_deduplicated_by_principal() {
        let room_manager = RoomManager::new();
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let (tab1, _rx1) = agent_conn(user_id);
        let (tab2, _rx2) = agent_conn(user_id);

        room_manager.join(conversation_id, tab1).await;
        room_manager.join(conversation_id, tab2).await;

        assert_eq!(room_manager.get_room_size(&conversation_id).await, 2);
        let participants = room_manager.participants(&conversation_id).await;
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].participant_id, user_id);
    }

    #[tokio::test]
    async fn test_remove_connection_from_all_rooms() {
        let room_manager = RoomManager::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let (conn, _rx) = agent_conn(Uuid::new_v4());

        room_manager.join(first, Arc::clone(&conn)).await;
        room_manager.join(second, Arc::clone(&conn)).await;

        let mut left = room_manager.remove_connection(&conn.session_id).await;
        left.sort();
        let mut expected = vec![first, second];
        expected.sort();

        assert_eq!(left, expected);
        assert_eq!(room_manager.get_room_count().await, 0);
    }
}
