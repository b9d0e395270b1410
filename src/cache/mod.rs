//! Three-tier lookup: curated seeds, in-process memory, persistent store.
//!
//! The order is fixed. Seeds win over everything so that curated content is
//! never shadowed by a generated entry persisted under an older prompt.

pub mod memory;
pub mod persistent;
pub mod seed;
pub mod sled_store;
pub mod upstash;

pub use memory::MemoryCache;
pub use persistent::{GuardedStore, KvStore, MemoryKv, StoreStats};
pub use seed::{SeedStats, SeedStore};
pub use sled_store::SledStore;
pub use upstash::UpstashStore;

use crate::key::{CacheKey, Category, Language};
use crate::metrics::METRICS;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Provider label recorded on entries that came from the seed tier.
pub const SEED_PROVIDER: &str = "seed";

/// Where a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Seed,
    Memory,
    Persistent,
    Miss,
}

impl Tier {
    pub fn is_hit(self) -> bool {
        self != Tier::Miss
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Seed => "seed",
            Tier::Memory => "memory",
            Tier::Persistent => "persistent",
            Tier::Miss => "miss",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Lookup<E> {
    pub value: Option<E>,
    pub tier: Tier,
}

impl<E> Lookup<E> {
    fn hit(value: E, tier: Tier) -> Self {
        Self { value: Some(value), tier }
    }

    fn miss() -> Self {
        Self { value: None, tier: Tier::Miss }
    }
}

/// What the seed tier needs to answer a request. Seeds are addressed by
/// subject and language only; `names` are tried in order.
#[derive(Debug, Clone, Copy)]
pub struct SeedProbe<'a> {
    pub names: &'a [&'a str],
    pub category: Category,
    pub language: Language,
    pub prompt_version: &'a str,
}

/// A value the tiered cache can hold.
pub trait CacheEntry: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn from_seed(seed: &SeedStore, probe: &SeedProbe<'_>) -> Option<Self>;

    /// Persisted payloads that fail this check are treated as misses.
    fn is_usable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEntry {
    pub text: String,
    pub subject_name: String,
    pub category: Category,
    pub language: Language,
    pub prompt_version: String,
    pub provider: String,
    pub created_at: i64,
}

impl CacheEntry for TextEntry {
    fn from_seed(seed: &SeedStore, probe: &SeedProbe<'_>) -> Option<Self> {
        probe.names.iter().find_map(|name| {
            let (official, text) = seed.text(name, probe.language)?;
            Some(TextEntry {
                text: text.to_string(),
                subject_name: official.to_string(),
                category: probe.category,
                language: probe.language,
                prompt_version: probe.prompt_version.to_string(),
                provider: SEED_PROVIDER.to_string(),
                created_at: now_millis(),
            })
        })
    }

    fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub image_url: String,
    pub provider: String,
    pub prompt_version: String,
    pub created_at: i64,
}

impl CacheEntry for ImageEntry {
    fn from_seed(seed: &SeedStore, probe: &SeedProbe<'_>) -> Option<Self> {
        probe.names.iter().find_map(|name| {
            let url = seed.image(name, probe.language)?;
            Some(ImageEntry {
                image_url: url.to_string(),
                provider: SEED_PROVIDER.to_string(),
                prompt_version: probe.prompt_version.to_string(),
                created_at: now_millis(),
            })
        })
    }

    fn is_usable(&self) -> bool {
        !self.image_url.trim().is_empty()
    }
}

/// Unix time in milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Seed → memory → persistent lookup with write-through `put`.
pub struct TieredCache<E> {
    seed: Arc<SeedStore>,
    memory: MemoryCache<E>,
    persistent: Option<GuardedStore>,
}

impl<E> Clone for TieredCache<E> {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed.clone(),
            memory: self.memory.clone(),
            persistent: self.persistent.clone(),
        }
    }
}

impl<E: CacheEntry> TieredCache<E> {
    pub fn new(seed: Arc<SeedStore>, memory: MemoryCache<E>, persistent: Option<GuardedStore>) -> Self {
        Self { seed, memory, persistent }
    }

    pub async fn lookup(&self, key: &CacheKey, probe: &SeedProbe<'_>) -> Lookup<E> {
        let found = self.lookup_tiers(key, probe).await;
        METRICS.record_lookup(found.tier);
        found
    }

    async fn lookup_tiers(&self, key: &CacheKey, probe: &SeedProbe<'_>) -> Lookup<E> {
        if let Some(entry) = E::from_seed(&self.seed, probe) {
            if !self.memory.contains(key) {
                self.spawn_write_back(key.clone(), entry.clone());
            }
            return Lookup::hit(entry, Tier::Seed);
        }

        if let Some(entry) = self.memory.get(key).await {
            return Lookup::hit(entry, Tier::Memory);
        }

        if let Some(store) = &self.persistent {
            match store.get_json::<E>(key.as_str()).await {
                Some(entry) if entry.is_usable() => {
                    self.memory.insert(key.clone(), entry.clone()).await;
                    return Lookup::hit(entry, Tier::Persistent);
                }
                Some(_) => tracing::warn!("[cache] ignoring unusable persistent entry for {}", key),
                None => {}
            }
        }

        Lookup::miss()
    }

    /// Memory tier only; used to re-check right before generating.
    pub async fn memory_get(&self, key: &CacheKey) -> Option<E> {
        self.memory.get(key).await
    }

    /// Writes memory and, when configured, persistent together. Returns
    /// `false` only when a configured persistent store did not take the write.
    pub async fn put(&self, key: &CacheKey, entry: &E) -> bool {
        self.memory.insert(key.clone(), entry.clone()).await;
        match &self.persistent {
            Some(store) => store.set_json(key.as_str(), entry).await,
            None => true,
        }
    }

    /// Seed promotion runs detached; the request that hit the seed never waits.
    fn spawn_write_back(&self, key: CacheKey, entry: E) {
        let cache = self.clone();
        tokio::spawn(async move {
            if !cache.put(&key, &entry).await {
                tracing::warn!("[cache] seed write-back not persisted for {}", key);
            }
        });
    }

    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    pub fn memory_entries(&self) -> u64 {
        self.memory.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{build_key, KeyParts};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn seeds() -> Arc<SeedStore> {
        let responses: HashMap<String, serde_json::Value> = serde_json::from_value(json!({
            "Naruto Uzumaki||en": "Name: Naruto Uzumaki\nCurated ramen and forest smoke.",
        }))
        .unwrap();
        Arc::new(SeedStore::from_parts(responses, HashMap::new()))
    }

    fn entry(text: &str) -> TextEntry {
        TextEntry {
            text: text.to_string(),
            subject_name: "Naruto Uzumaki".to_string(),
            category: Category::Anime,
            language: Language::En,
            prompt_version: "v1".to_string(),
            provider: "test".to_string(),
            created_at: now_millis(),
        }
    }

    fn cache(persistent: Option<GuardedStore>) -> TieredCache<TextEntry> {
        TieredCache::new(seeds(), MemoryCache::new(100, Duration::from_secs(60)), persistent)
    }

    fn probe<'a>(names: &'a [&'a str]) -> SeedProbe<'a> {
        SeedProbe {
            names,
            category: Category::Anime,
            language: Language::En,
            prompt_version: "v1",
        }
    }

    #[tokio::test]
    async fn seed_wins_over_persistent_and_is_written_back() {
        let raw = Arc::new(MemoryKv::new());
        let store = GuardedStore::new(raw.clone(), Duration::from_secs(1));
        let key = build_key(&KeyParts::text("v1", "Naruto Uzumaki", Category::Anime, Language::En));
        store.set_json(key.as_str(), &entry("generated and worse")).await;

        let cache = cache(Some(store.clone()));
        let found = cache.lookup(&key, &probe(&["Naruto Uzumaki"])).await;
        assert_eq!(found.tier, Tier::Seed);
        assert!(found.value.unwrap().text.contains("Curated"));

        // Write-back is detached; give it a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let persisted: TextEntry = store.get_json(key.as_str()).await.unwrap();
        assert_eq!(persisted.provider, SEED_PROVIDER);
        assert!(cache.memory_get(&key).await.is_some());
    }

    struct SlowWrites;

    #[async_trait::async_trait]
    impl KvStore for SlowWrites {
        fn backend(&self) -> &'static str {
            "slow-writes"
        }
        async fn get(&self, _key: &str) -> crate::Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &[u8]) -> crate::Result<()> {
            tokio::time::sleep(Duration::from_millis(800)).await;
            Ok(())
        }
        async fn delete(&self, _key: &str) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn seed_hits_do_not_wait_for_write_back() {
        let store = GuardedStore::new(Arc::new(SlowWrites), Duration::from_secs(2));
        let key = build_key(&KeyParts::text("v1", "Naruto Uzumaki", Category::Anime, Language::En));

        let started = std::time::Instant::now();
        let found = cache(Some(store)).lookup(&key, &probe(&["Naruto Uzumaki"])).await;
        assert_eq!(found.tier, Tier::Seed);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn persistent_hits_are_promoted_to_memory() {
        let store = GuardedStore::new(Arc::new(MemoryKv::new()), Duration::from_secs(1));
        let key = build_key(&KeyParts::text("v1", "Joel", Category::Games, Language::En));
        store.set_json(key.as_str(), &entry("sawdust")).await;

        let cache = cache(Some(store));
        let first = cache.lookup(&key, &probe(&["Joel"])).await;
        assert_eq!(first.tier, Tier::Persistent);
        let second = cache.lookup(&key, &probe(&["Joel"])).await;
        assert_eq!(second.tier, Tier::Memory);
    }

    #[tokio::test]
    async fn unusable_persistent_entries_miss() {
        let store = GuardedStore::new(Arc::new(MemoryKv::new()), Duration::from_secs(1));
        let key = build_key(&KeyParts::text("v1", "Joel", Category::Games, Language::En));
        store.set_json(key.as_str(), &entry("   ")).await;

        let found = cache(Some(store)).lookup(&key, &probe(&["Joel"])).await;
        assert_eq!(found.tier, Tier::Miss);
        assert!(found.value.is_none());
    }

    #[tokio::test]
    async fn put_without_persistent_is_memory_only() {
        let cache = cache(None);
        let key = build_key(&KeyParts::text("v1", "Joel", Category::Games, Language::En));
        assert!(cache.put(&key, &entry("sawdust")).await);
        assert_eq!(cache.lookup(&key, &probe(&["Joel"])).await.tier, Tier::Memory);

        cache.clear_memory();
        assert_eq!(cache.lookup(&key, &probe(&["Joel"])).await.tier, Tier::Miss);
    }
}
