//! Widget key to tenant resolution

use std::sync::Arc;

use chatdesk_shared::{ChatError, ChatResult, WidgetTenant};
use uuid::Uuid;

use super::TenantCache;
use crate::store::Directory;

/// Resolves widget identity keys to active tenants, with caching
#[derive(Clone)]
pub struct TenantResolver {
    directory: Arc<dyn Directory>,
    cache: Arc<TenantCache>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn Directory>, cache: Arc<TenantCache>) -> Self {
        Self { directory, cache }
    }

    pub fn cache(&self) -> &TenantCache {
        &self.cache
    }

    /// Resolve a widget key to its tenant.
    ///
    /// Unknown keys fail with `InvalidCredential`, inactive tenants with
    /// `TenantInactive`.
    pub async fn resolve_widget_key(&self, api_key: &str) -> ChatResult<Uuid> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ChatError::AuthenticationRequired);
        }

        let resolved = match self.cache.get(api_key) {
            Some(cached) => cached,
            None => {
                let fresh = self.directory.resolve_widget_key(api_key).await?;
                self.cache.set(api_key, fresh);
                fresh
            }
        };

        match resolved {
            Some(WidgetTenant {
                tenant_id,
                tenant_active: true,
            }) => Ok(tenant_id),
            Some(WidgetTenant { tenant_id, .. }) => {
                tracing::debug!(tenant_id = %tenant_id, "Widget key belongs to inactive tenant");
                Err(ChatError::TenantInactive)
            }
            None => Err(ChatError::InvalidCredential("Invalid API key".to_string())),
        }
    }

    /// Fail unless the tenant exists and is active
    pub async fn require_active(&self, tenant_id: Uuid) -> ChatResult<()> {
        match self.directory.find_tenant(tenant_id).await? {
            Some(tenant) if tenant.is_active => Ok(()),
            Some(_) => Err(ChatError::TenantInactive),
            None => Err(ChatError::NotFound("tenant".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, TenantResolver, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = store.add_tenant("Acme").await;
        store.add_widget_key(tenant_id, "wk_acme").await;
        let resolver = TenantResolver::new(store.clone(), Arc::new(TenantCache::default()));
        (store, resolver, tenant_id)
    }

    #[tokio::test]
    async fn test_resolves_known_key() {
        let (_, resolver, tenant_id) = setup().await;
        assert_eq!(resolver.resolve_widget_key("wk_acme").await.unwrap(), tenant_id);
        assert!(resolver.require_active(tenant_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_key_is_invalid_and_cached() {
        let (_, resolver, _) = setup().await;
        assert!(matches!(
            resolver.resolve_widget_key("wk_nope").await,
            Err(ChatError::InvalidCredential(_))
        ));
        assert_eq!(resolver.cache().get("wk_nope"), Some(None));
    }

    #[tokio::test]
    async fn test_inactive_tenant_rejected() {
        let (store, resolver, tenant_id) = setup().await;
        store.set_tenant_active(tenant_id, false).await;

        assert!(matches!(
            resolver.resolve_widget_key("wk_acme").await,
            Err(ChatError::TenantInactive)
        ));
        assert!(matches!(
            resolver.require_active(tenant_id).await,
            Err(ChatError::TenantInactive)
        ));
    }
}
