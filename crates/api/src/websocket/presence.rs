//! Agent online flag and disconnect notices

use std::sync::Arc;

use super::connection::Connection;
use super::events::ServerEvent;
use super::state::WebSocketState;
use crate::store::Directory;

pub struct PresenceTracker {
    directory: Arc<dyn Directory>,
    ws_state: WebSocketState,
}

impl PresenceTracker {
    pub fn new(directory: Arc<dyn Directory>, ws_state: WebSocketState) -> Self {
        Self {
            directory,
            ws_state,
        }
    }

    /// Mark an agent online when one of its sessions connects.
    ///
    /// Store failures are logged and never fail the connection.
    pub async fn connected(&self, conn: &Connection) {
        let Some(user_id) = conn.agent_id() else {
            return;
        };

        if let Err(e) = self.directory.set_agent_online(user_id, true).await {
            tracing::warn!(error = %e, user_id = %user_id, "Failed to mark agent online");
        }
    }

    /// Tear down a closed session: drop it from every room, tell the
    /// remaining subscribers, and mark the agent offline once its last
    /// session is gone.
    pub async fn disconnected(&self, conn: &Connection) {
        let Some((_, rooms)) = self.ws_state.remove_connection(&conn.session_id).await else {
            return;
        };

        if let Some(participant) = conn.room_participant() {
            for conversation_id in rooms {
                self.ws_state
                    .rooms
                    .broadcast(
                        &conversation_id,
                        ServerEvent::ParticipantOffline {
                            conversation_id,
                            participant: participant.clone(),
                        },
                    )
                    .await;
            }
        }

        let Some(user_id) = conn.agent_id() else {
            return;
        };
        if !self.ws_state.get_user_connections(&user_id).await.is_empty() {
            return;
        }

        if let Err(e) = self.directory.set_agent_online(user_id, false).await {
            tracing::warn!(error = %e, user_id = %user_id, "Failed to mark agent offline");
        }
    }
}
