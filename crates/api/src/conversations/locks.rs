//! Per-conversation critical sections
//!
//! Join, send, read and assignment for one conversation are serialized;
//! different conversations never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Proof that the holder owns the critical section for one conversation
pub struct ConversationGuard {
    conversation_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl ConversationGuard {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }
}

/// Lazily-created async mutex per key
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `key`
    pub async fn acquire(&self, key: Uuid) -> ConversationGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key).or_default())
        };

        ConversationGuard {
            conversation_id: key,
            _guard: lock.lock_owned().await,
        }
    }

    /// Drop locks nobody holds or waits on
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(ConversationLocks::new());
        let key = Uuid::new_v4();

        let guard = locks.acquire(key).await;
        assert_eq!(guard.conversation_id(), key);

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(key).await.conversation_id() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = ConversationLocks::new();
        let _first = locks.acquire(Uuid::new_v4()).await;
        let _second = locks.acquire(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = ConversationLocks::new();
        let held = locks.acquire(Uuid::new_v4()).await;
        drop(locks.acquire(Uuid::new_v4()).await);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
    }
}
