use crate::key::CacheKey;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::time::Duration;

/// Bounded in-process tier with TTL expiry and LRU eviction.
///
/// Pure accelerator: evicting from here never touches the persistent tier.
pub struct MemoryCache<E> {
    inner: Cache<CacheKey, E>,
}

impl<E> Clone for MemoryCache<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> MemoryCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { inner }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<E> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, entry: E) {
        self.inner.insert(key, entry).await;
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.contains_key(key)
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate; moka updates the count lazily.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{build_key, Category, KeyParts, Language};

    fn key(subject: &str) -> CacheKey {
        build_key(&KeyParts::text("v1", subject, Category::Any, Language::En))
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = MemoryCache::new(10, Duration::from_secs(60));
        cache.insert(key("goku"), "kamehameha".to_string()).await;
        assert_eq!(cache.get(&key("goku")).await.as_deref(), Some("kamehameha"));
        assert!(cache.contains(&key("goku")));
        assert_eq!(cache.get(&key("vegeta")).await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = MemoryCache::new(10, Duration::from_millis(20));
        cache.insert(key("goku"), 1u32).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get(&key("goku")).await, None);
    }

    #[tokio::test]
    async fn capacity_bounds_entry_count() {
        let cache = MemoryCache::new(2, Duration::from_secs(60));
        for name in ["goku", "vegeta", "gohan", "piccolo"] {
            cache.insert(key(name), name.len()).await;
        }
        cache.inner.run_pending_tasks().await;
        assert!(cache.entry_count() <= 2);
    }

    #[tokio::test]
    async fn clear_invalidates_everything() {
        let cache = MemoryCache::new(10, Duration::from_secs(60));
        cache.insert(key("a"), 1u32).await;
        cache.insert(key("b"), 2u32).await;
        cache.clear();
        assert_eq!(cache.get(&key("a")).await, None);
        assert_eq!(cache.get(&key("b")).await, None);
    }
}
