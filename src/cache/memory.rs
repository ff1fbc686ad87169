//! In-process cache, used for single-instance deployments and tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::auth::AuthError;
use crate::cache::EphemeralCache;
use crate::types::{BoxFuture, CacheKey};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory TTL cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `key` expires.
    #[cfg(test)]
    pub(crate) async fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let entries = self.entries.read().await;
        entries
            .get(key.as_str())
            .and_then(|e| e.expires_at.checked_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }

    /// Drop `key`, simulating store-side expiry.
    #[cfg(test)]
    pub(crate) async fn evict(&self, key: &CacheKey) {
        self.entries.write().await.remove(key.as_str());
    }

    async fn lookup(&self, key: &CacheKey) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key.as_str()) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.entries.write().await.remove(key.as_str());
        None
    }

    async fn store(&self, key: &CacheKey, value: String, ttl_seconds: u64) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        };
        self.entries
            .write()
            .await
            .insert(key.as_str().to_string(), entry);
    }
}

impl EphemeralCache for MemoryCache {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<String>, AuthError>> {
        Box::pin(async move { Ok(self.lookup(key).await) })
    }

    fn set<'a>(
        &'a self,
        key: &'a CacheKey,
        value: String,
        ttl_seconds: u64,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            if ttl_seconds == 0 {
                return Err(AuthError::CacheUnavailable(
                    "invalid expire time in set".to_string(),
                ));
            }
            self.store(key, value, ttl_seconds).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("k");

        cache.set(&key, "v".to_string(), 60).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("v"));

        let ttl = cache.ttl(&key).await.unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(58));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = MemoryCache::new();
        assert!(cache.get(&CacheKey::new("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_none() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("k");
        cache
            .entries
            .write()
            .await
            .insert(
                "k".to_string(),
                Entry {
                    value: "v".to_string(),
                    expires_at: Instant::now(),
                },
            );

        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("k");
        assert!(cache.set(&key, "v".to_string(), 0).await.is_err());
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = MemoryCache::new();
        let key = CacheKey::new("k");
        cache.set(&key, "old".to_string(), 60).await.unwrap();
        cache.set(&key, "new".to_string(), 60).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("new"));
    }
}
