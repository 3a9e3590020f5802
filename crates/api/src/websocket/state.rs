//! Global WebSocket state management
//!
//! Owns every live connection and the room map. Constructed once at startup
//! and shared by handle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;
use super::room::RoomManager;

/// WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    /// Room manager for conversation subscriptions
    pub rooms: Arc<RoomManager>,
}

impl WebSocketState {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
        }
    }

    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            tenant_id = %conn.tenant_id,
            role = conn.principal.role(),
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        conn
    }

    /// Remove a connection and drop it from every room.
    ///
    /// Returns the connection and the rooms it was subscribed to.
    pub async fn remove_connection(
        &self,
        session_id: &Uuid,
    ) -> Option<(Arc<Connection>, Vec<Uuid>)> {
        let conn = {
            let mut connections = self.connections.write().await;
            let conn = connections.remove(session_id)?;
            tracing::info!(
                session_id = %session_id,
                tenant_id = %conn.tenant_id,
                remaining_connections = connections.len(),
                "WebSocket connection removed"
            );
            conn
        };

        let rooms = self.rooms.remove_connection(session_id).await;
        Some((conn, rooms))
    }

    pub async fn get_connection(&self, session_id: &Uuid) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(session_id).cloned()
    }

    /// All live connections of an agent
    pub async fn get_user_connections(&self, user_id: &Uuid) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.agent_id() == Some(*user_id))
            .cloned()
            .collect()
    }

    /// Deliver to every connection of an agent (the `user:{id}` address)
    pub async fn send_to_user(&self, user_id: &Uuid, event: ServerEvent) -> usize {
        self.get_user_connections(user_id)
            .await
            .iter()
            .filter(|conn| conn.send(event.clone()).is_ok())
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            active_connections: self.connection_count().await,
            active_rooms: self.rooms.get_room_count().await,
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebSocketStats {
    pub active_connections: usize,
    pub active_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Principal;
    use tokio::sync::mpsc;

    fn agent(user_id: Uuid) -> Principal {
        Principal::Agent {
            user_id,
            name: "Ana".to_string(),
            email: "ana@acme.test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_connection() {
        let state = WebSocketState::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn = state
            .add_connection(Connection::new(Uuid::new_v4(), agent(Uuid::new_v4()), tx))
            .await;
        let conversation_id = Uuid::new_v4();
        state.rooms.join(conversation_id, Arc::clone(&conn)).await;
        assert_eq!(state.connection_count().await, 1);

        let (_, rooms) = state.remove_connection(&conn.session_id).await.unwrap();
        assert_eq!(rooms, vec![conversation_id]);
        assert_eq!(state.connection_count().await, 0);
        assert!(state.remove_connection(&conn.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_every_tab() {
        let state = WebSocketState::new();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        state.add_connection(Connection::new(tenant_id, agent(user_id), tx1)).await;
        state.add_connection(Connection::new(tenant_id, agent(user_id), tx2)).await;
        state
            .add_connection(Connection::new(tenant_id, agent(Uuid::new_v4()), tx3))
            .await;

        assert_eq!(state.send_to_user(&user_id, ServerEvent::Pong).await, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stats() {
        let state = WebSocketState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        state
            .add_connection(Connection::new(Uuid::new_v4(), agent(Uuid::new_v4()), tx))
            .await;

        let stats = state.get_stats().await;
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.active_rooms, 0);
    }
}
