//! In-memory token cache backed by moka.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use std::time::{Duration, Instant};

use super::{CacheError, TokenCache};

/// Maximum number of cached entries (two per credential).
const MAX_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expire_at: DateTime<Utc>,
}

impl Entry {
    fn time_to_live(&self) -> Duration {
        (self.expire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Expires every entry at its own absolute `expire_at`.
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.time_to_live())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.time_to_live())
    }
}

/// Process-local cache with per-entry expiry.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, Entry>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        let entries = Cache::builder()
            .max_capacity(MAX_CAPACITY)
            .expire_after(EntryExpiry)
            .build();

        Self { entries }
    }

    /// Expiry of a live entry, if any.
    pub async fn expire_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.live_entry(key).await.map(|entry| entry.expire_at)
    }

    /// Number of live entries.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn live_entry(&self, key: &str) -> Option<Entry> {
        // moka's clock is coarser than chrono's; never hand out a lapsed token.
        self.entries
            .get(key)
            .await
            .filter(|entry| Utc::now() < entry.expire_at)
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl TokenCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live_entry(key).await.map(|entry| entry.value))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        expire_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        if expire_at <= Utc::now() {
            self.entries.invalidate(key).await;
            return Ok(());
        }

        self.entries
            .insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expire_at,
                },
            )
            .await;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_memory_cache_put_get() {
        let cache = MemoryCache::new();
        let expire_at = Utc::now() + Duration::minutes(15);

        cache.put("walmart-api.access_token.1", "tok", expire_at).await.unwrap();

        assert_eq!(
            cache.get("walmart-api.access_token.1").await.unwrap().as_deref(),
            Some("tok")
        );
        assert_eq!(cache.expire_at("walmart-api.access_token.1").await, Some(expire_at));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_cache_get_missing() {
        let cache = MemoryCache::new();
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_past_expiry_stores_nothing() {
        let cache = MemoryCache::new();
        cache.put("key", "old", Utc::now() + Duration::minutes(1)).await.unwrap();
        cache.put("key", "value", Utc::now() - Duration::seconds(1)).await.unwrap();

        assert!(cache.get("key").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_cache_overwrite_takes_new_expiry() {
        let cache = MemoryCache::new();
        let later = Utc::now() + Duration::hours(2);
        cache.put("key", "first", Utc::now() + Duration::minutes(1)).await.unwrap();
        cache.put("key", "second", later).await.unwrap();

        assert_eq!(cache.get("key").await.unwrap().as_deref(), Some("second"));
        assert_eq!(cache.expire_at("key").await, Some(later));
    }

    #[tokio::test]
    async fn test_memory_cache_entry_expires() {
        let cache = MemoryCache::new();
        cache
            .put("key", "value", Utc::now() + Duration::milliseconds(20))
            .await
            .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(60));

        assert!(cache.get("key").await.unwrap().is_none());
        assert!(cache.expire_at("key").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_forget() {
        let cache = MemoryCache::new();
        cache.put("key", "value", Utc::now() + Duration::hours(1)).await.unwrap();

        cache.forget("key").await.unwrap();
        cache.forget("never-existed").await.unwrap();

        assert!(cache.get("key").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }
}
