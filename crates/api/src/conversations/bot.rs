//! Automated first-line responder

use chatdesk_shared::{Bot, ChatResult, Feature, Message};
use uuid::Uuid;

use crate::config::DEFAULT_BOT_REPLY;
use crate::store::Directory;

/// Produces the canned reply posted while no human agent is assigned
#[derive(Debug, Clone)]
pub struct BotResponder {
    reply_text: String,
}

impl BotResponder {
    pub fn new(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
        }
    }

    /// Reply content for a visitor message
    pub fn compose_reply(&self, _trigger: &Message) -> String {
        self.reply_text.clone()
    }
}

impl Default for BotResponder {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_REPLY)
    }
}

/// Bot that should answer in `inbox_id`, if the tenant has bots enabled.
///
/// Inbox-level bots win over the tenant-level fallback.
pub async fn find_bot(
    directory: &dyn Directory,
    tenant_id: Uuid,
    inbox_id: Uuid,
) -> ChatResult<Option<Bot>> {
    if !directory.is_feature_enabled(tenant_id, Feature::Bots).await? {
        return Ok(None);
    }

    if let Some(bot) = directory.find_inbox_bot(tenant_id, inbox_id).await? {
        return Ok(Some(bot));
    }

    directory.find_tenant_bot(tenant_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_feature_flag_gates_bot() {
        let store = MemoryStore::new();
        let tenant_id = store.add_tenant("Acme").await;
        let inbox_id = store.add_inbox(tenant_id, "Web", true).await;
        store.add_bot(tenant_id, Some(inbox_id), "Greeter").await;

        assert!(find_bot(&store, tenant_id, inbox_id).await.unwrap().is_none());

        store.set_feature(tenant_id, Feature::Bots, true).await;
        assert!(find_bot(&store, tenant_id, inbox_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tenant_bot_is_fallback() {
        let store = MemoryStore::new();
        let tenant_id = store.add_tenant("Acme").await;
        let inbox_id = store.add_inbox(tenant_id, "Web", true).await;
        store.set_feature(tenant_id, Feature::Bots, true).await;

        let fallback = store.add_bot(tenant_id, None, "Fallback").await;
        assert_eq!(
            find_bot(&store, tenant_id, inbox_id).await.unwrap().map(|b| b.id),
            Some(fallback)
        );

        let linked = store.add_bot(tenant_id, Some(inbox_id), "Greeter").await;
        assert_eq!(
            find_bot(&store, tenant_id, inbox_id).await.unwrap().map(|b| b.id),
            Some(linked)
        );
    }
}
