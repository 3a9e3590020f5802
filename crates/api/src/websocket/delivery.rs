//! Deferred "delivered" status for freshly broadcast messages
//!
//! After a short delay a `sent` message is advanced to `delivered` and the
//! room is told. The update is conditional on the current status, so a
//! message already read is never moved backwards. Pending updates for a
//! conversation are aborted when it closes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chatdesk_shared::{ConversationStatus, MessageStatus};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::ServerEvent;
use super::room::RoomManager;
use crate::store::ConversationStore;

struct Pending {
    conversation_id: Uuid,
    handle: JoinHandle<()>,
}

type PendingMap = HashMap<Uuid, Pending>;

#[derive(Clone)]
pub struct DeliveryScheduler {
    store: Arc<dyn ConversationStore>,
    rooms: Arc<RoomManager>,
    delay: Duration,
    pending: Arc<Mutex<PendingMap>>,
}

impl DeliveryScheduler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        rooms: Arc<RoomManager>,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            rooms,
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedule the `sent -> delivered` update for one message
    pub fn schedule(&self, tenant_id: Uuid, conversation_id: Uuid, message_id: Uuid) {
        let store = Arc::clone(&self.store);
        let rooms = Arc::clone(&self.rooms);
        let delay = self.delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            mark_delivered(store.as_ref(), &rooms, tenant_id, conversation_id, message_id).await;
        });

        let mut pending = self.lock();
        pending.retain(|_, p| !p.handle.is_finished());
        pending.insert(
            message_id,
            Pending {
                conversation_id,
                handle,
            },
        );
    }

    /// Abort every pending update of a conversation. Returns how many were aborted.
    pub fn cancel_conversation(&self, conversation_id: Uuid) -> usize {
        let mut pending = self.lock();
        let mut cancelled = 0;
        pending.retain(|_, p| {
            if p.conversation_id != conversation_id {
                return true;
            }
            if !p.handle.is_finished() {
                p.handle.abort();
                cancelled += 1;
            }
            false
        });

        if cancelled > 0 {
            tracing::debug!(
                conversation_id = %conversation_id,
                cancelled,
                "Cancelled pending delivery updates"
            );
        }
        cancelled
    }

    /// Updates scheduled and not yet finished
    pub fn pending_count(&self) -> usize {
        let mut pending = self.lock();
        pending.retain(|_, p| !p.handle.is_finished());
        pending.len()
    }
}

async fn mark_delivered(
    store: &dyn ConversationStore,
    rooms: &RoomManager,
    tenant_id: Uuid,
    conversation_id: Uuid,
    message_id: Uuid,
) {
    match store.get_conversation(tenant_id, conversation_id).await {
        Ok(Some(conversation)) if conversation.status != ConversationStatus::Closed => {}
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(
                error = %e,
                conversation_id = %conversation_id,
                "Delivery update skipped"
            );
            return;
        }
    }

    match store
        .set_message_status(tenant_id, message_id, MessageStatus::Delivered)
        .await
    {
        Ok(true) => {
            rooms
                .broadcast(
                    &conversation_id,
                    ServerEvent::MessageStatusUpdate {
                        conversation_id,
                        message_id,
                        status: MessageStatus::Delivered,
                    },
                )
                .await;
        }
        Ok(false) => {
            tracing::trace!(message_id = %message_id, "Message already past delivered");
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                message_id = %message_id,
                "Failed to mark message delivered"
            );
        }
    }
}
