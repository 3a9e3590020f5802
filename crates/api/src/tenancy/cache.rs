//! In-memory widget key cache with TTL
//!
//! Caches widget-key-to-tenant lookups so reconnect storms from embedded
//! widgets do not each hit the database.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chatdesk_shared::WidgetTenant;
use uuid::Uuid;

/// Default cache TTL (5 minutes)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct CacheEntry {
    tenant: Option<WidgetTenant>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(tenant: Option<WidgetTenant>, ttl: Duration) -> Self {
        Self {
            tenant,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe widget key cache
pub struct TenantCache {
    /// Maps widget key -> tenant (None means the key does not resolve)
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for TenantCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }
}

impl TenantCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns Some(Some(tenant)) on a hit, Some(None) for a cached miss,
    /// None if absent or expired
    pub fn get(&self, api_key: &str) -> Option<Option<WidgetTenant>> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(api_key)?;

        if entry.is_expired() {
            None
        } else {
            Some(entry.tenant)
        }
    }

    pub fn set(&self, api_key: &str, tenant: Option<WidgetTenant>) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(api_key.to_string(), CacheEntry::new(tenant, self.ttl));
        }
    }

    /// Drop every entry for a tenant (activation flag changed)
    pub fn invalidate_tenant(&self, tenant_id: Uuid) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| entry.tenant.map(|t| t.tenant_id) != Some(tenant_id));
        }
    }

    /// Clear expired entries
    pub fn cleanup(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn tenant() -> WidgetTenant {
        WidgetTenant {
            tenant_id: Uuid::new_v4(),
            tenant_active: true,
        }
    }

    #[test]
    fn test_cache_get_set() {
        let cache = TenantCache::default();
        let resolved = tenant();

        assert!(cache.get("wk_live").is_none());

        cache.set("wk_live", Some(resolved));
        assert_eq!(cache.get("wk_live"), Some(Some(resolved)));

        cache.set("wk_unknown", None);
        assert_eq!(cache.get("wk_unknown"), Some(None));
    }

    #[test]
    fn test_cache_expiration_and_cleanup() {
        let cache = TenantCache::with_ttl(Duration::from_millis(50));
        cache.set("wk_live", Some(tenant()));

        sleep(Duration::from_millis(60));
        assert!(cache.get("wk_live").is_none());

        cache.cleanup();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_tenant() {
        let cache = TenantCache::default();
        let first = tenant();
        let second = tenant();

        cache.set("a", Some(first));
        cache.set("b", Some(first));
        cache.set("c", Some(second));

        cache.invalidate_tenant(first.tenant_id);

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("c"), Some(Some(second)));
    }
}
