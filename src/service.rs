//! The get-or-generate core.
//!
//! Request → canonical name → typed key → tiered lookup; on a full miss the
//! in-flight registry makes sure exactly one provider call runs per key, and
//! its result is written through to every configured tier before any
//! caller sees it.

use crate::blob::{strip_data_url, BlobStore, ImageBlob};
use crate::cache::{
    GuardedStore, ImageEntry, KvStore, MemoryCache, MemoryKv, SeedProbe, SeedStats,
    SeedStore, SledStore, StoreStats, TextEntry, Tier, TieredCache, UpstashStore,
};
use crate::canonical::{self, AliasIndex, InMemoryAliasIndex, NameCanonicalizer};
use crate::config::{PersistentBackend, ScentKitConfig};
use crate::dedupe::InFlight;
use crate::fetch::fetch_remote_image;
use crate::gateway::{build_image_prompt, timed, ImageGenerator, ImagePayload, TextGenerator};
use crate::key::{build_key, CacheKey, Category, ImageVariant, KeyParts, Language, Style};
use crate::metrics::METRICS;
use crate::{Result, ScentKitError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutcome {
    pub text: String,
    pub canonical_name: String,
    pub tier: Tier,
    pub language: Language,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOutcome {
    pub image_url: String,
    pub tier: Tier,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersistentHealth {
    pub backend: &'static str,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub persistent: Option<PersistentHealth>,
    pub seeds: SeedStats,
    pub aliases: usize,
    pub inflight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub memory_entries: u64,
    pub inflight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub text: TierStats,
    pub image: TierStats,
    pub seeds: SeedStats,
    pub aliases: usize,
    pub persistent_backend: Option<&'static str>,
    pub persistent: Option<StoreStats>,
}

struct Inner {
    config: ScentKitConfig,
    canonicalizer: NameCanonicalizer,
    seed_stats: SeedStats,
    texts: TieredCache<TextEntry>,
    images: TieredCache<ImageEntry>,
    text_jobs: InFlight<TextEntry>,
    image_jobs: InFlight<ImageEntry>,
    blobs: BlobStore,
    persistent: Option<GuardedStore>,
    text_gen: Arc<dyn TextGenerator>,
    image_gen: Arc<dyn ImageGenerator>,
    http: Client,
}

/// Cheap to clone; all clones share caches, registries and aliases.
#[derive(Clone)]
pub struct ScentService {
    inner: Arc<Inner>,
}

pub struct ScentServiceBuilder {
    config: ScentKitConfig,
    text_gen: Arc<dyn TextGenerator>,
    image_gen: Arc<dyn ImageGenerator>,
    seeds: Option<SeedStore>,
    alias_index: Option<Arc<dyn AliasIndex>>,
    store: Option<Arc<dyn KvStore>>,
    http: Option<Client>,
}

impl ScentServiceBuilder {
    /// Seeds to use instead of loading `config.seed_dir`.
    pub fn seeds(mut self, seeds: SeedStore) -> Self {
        self.seeds = Some(seeds);
        self
    }

    pub fn alias_index(mut self, index: Arc<dyn AliasIndex>) -> Self {
        self.alias_index = Some(index);
        self
    }

    /// Persistent backend to use instead of the one named in the config.
    pub fn persistent_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<ScentService> {
        self.config.validate()?;
        let config = self.config;
        let http = self.http.unwrap_or_default();

        let seeds = Arc::new(self.seeds.unwrap_or_else(|| SeedStore::load(&config.seed_dir)));
        let canonicalizer = NameCanonicalizer::new(
            self.alias_index
                .unwrap_or_else(|| Arc::new(InMemoryAliasIndex::new())),
        );
        let seeded = canonicalizer.seed(seeds.aliases());
        tracing::info!("Alias index seeded with {} entries", seeded);

        let backend = match self.store {
            Some(store) => Some(store),
            None => open_backend(&config.persistent, &http)?,
        };
        let persistent = backend.map(|b| GuardedStore::new(b, config.store_timeout));
        match &persistent {
            Some(store) => tracing::info!("Persistent tier: {}", store.backend()),
            None => tracing::info!("Persistent tier disabled; running memory-only"),
        }

        // Blobs need somewhere to live even without a persistent tier.
        let blobs = BlobStore::new(persistent.clone().unwrap_or_else(|| {
            GuardedStore::new(Arc::new(MemoryKv::new()), config.store_timeout)
        }));

        let texts = TieredCache::new(
            seeds.clone(),
            MemoryCache::new(config.text_memory.capacity, config.text_memory.ttl),
            persistent.clone(),
        );
        let images = TieredCache::new(
            seeds.clone(),
            MemoryCache::new(config.image_memory.capacity, config.image_memory.ttl),
            persistent.clone(),
        );

        Ok(ScentService {
            inner: Arc::new(Inner {
                seed_stats: seeds.stats(),
                config,
                canonicalizer,
                texts,
                images,
                text_jobs: InFlight::new(),
                image_jobs: InFlight::new(),
                blobs,
                persistent,
                text_gen: self.text_gen,
                image_gen: self.image_gen,
                http,
            }),
        })
    }
}

fn open_backend(backend: &PersistentBackend, http: &Client) -> Result<Option<Arc<dyn KvStore>>> {
    let store: Arc<dyn KvStore> = match backend {
        PersistentBackend::None => return Ok(None),
        PersistentBackend::Sled { path } => Arc::new(SledStore::open(path)?),
        PersistentBackend::Upstash { url, token } => {
            Arc::new(UpstashStore::new(http.clone(), url.as_str(), token.as_str()))
        }
    };
    Ok(Some(store))
}

/// Rejects names with nothing left after canonicalization.
fn validate_subject(raw: &str) -> Result<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScentKitError::InvalidInput("Missing subject name".into()));
    }
    if canonical::try_normalize(trimmed).is_none() {
        return Err(ScentKitError::InvalidInput(format!("Unusable subject name: {:?}", trimmed)));
    }
    Ok(trimmed)
}

fn record_failure<T>(outcome: Result<T>) -> Result<T> {
    if let Err(e) = &outcome {
        METRICS.generation_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("[service] generation failed: {}", e);
    }
    outcome
}

impl ScentService {
    pub fn builder(
        config: ScentKitConfig,
        text_gen: Arc<dyn TextGenerator>,
        image_gen: Arc<dyn ImageGenerator>,
    ) -> ScentServiceBuilder {
        ScentServiceBuilder {
            config,
            text_gen,
            image_gen,
            seeds: None,
            alias_index: None,
            store: None,
            http: None,
        }
    }

    pub fn config(&self) -> &ScentKitConfig {
        &self.inner.config
    }

    pub fn canonicalizer(&self) -> &NameCanonicalizer {
        &self.inner.canonicalizer
    }

    fn text_key(&self, subject: &str, category: Category, language: Language) -> CacheKey {
        build_key(&KeyParts::text(&self.inner.config.prompt_version, subject, category, language))
    }

    /// Scent profile for `raw` in `language`.
    ///
    /// Spanish profiles are translations of the English one, so a Spanish
    /// miss first gets (or generates) the English profile.
    pub async fn get_or_generate_text(&self, raw: &str, category: Category, language: Language) -> Result<TextOutcome> {
        let raw = validate_subject(raw)?;
        let resolved = self.inner.canonicalizer.resolve(raw, None);

        let (entry, tier) = match language {
            Language::En => self.english_profile(raw, &resolved, category).await?,
            Language::Es => self.translated_profile(raw, &resolved, category, language).await?,
        };

        Ok(TextOutcome {
            text: entry.text,
            canonical_name: entry.subject_name,
            tier,
            language,
            category,
        })
    }

    async fn english_profile(&self, raw: &str, resolved: &str, category: Category) -> Result<(TextEntry, Tier)> {
        let key = self.text_key(resolved, category, Language::En);
        if let Some(hit) = self.lookup_text(&key, raw, resolved, category, Language::En).await {
            return Ok(hit);
        }

        let svc = self.clone();
        let (job_key, raw, resolved) = (key.clone(), raw.to_string(), resolved.to_string());
        let entry = self
            .inner
            .text_jobs
            .dedupe(&key, move || async move {
                record_failure(svc.generate_english(job_key, raw, resolved, category).await)
            })
            .await?;
        Ok((entry, Tier::Miss))
    }

    async fn translated_profile(
        &self,
        raw: &str,
        resolved: &str,
        category: Category,
        language: Language,
    ) -> Result<(TextEntry, Tier)> {
        let key = self.text_key(resolved, category, language);
        if let Some(hit) = self.lookup_text(&key, raw, resolved, category, language).await {
            return Ok(hit);
        }

        let svc = self.clone();
        let (job_key, raw, resolved) = (key.clone(), raw.to_string(), resolved.to_string());
        let entry = self
            .inner
            .text_jobs
            .dedupe(&key, move || async move {
                record_failure(svc.generate_translation(job_key, raw, resolved, category, language).await)
            })
            .await?;
        Ok((entry, Tier::Miss))
    }

    async fn lookup_text(
        &self,
        key: &CacheKey,
        raw: &str,
        resolved: &str,
        category: Category,
        language: Language,
    ) -> Option<(TextEntry, Tier)> {
        let names = [resolved, raw];
        let probe = SeedProbe {
            names: &names,
            category,
            language,
            prompt_version: &self.inner.config.prompt_version,
        };
        let found = self.inner.texts.lookup(key, &probe).await;
        tracing::debug!("[text] {} -> {}", key, found.tier);
        found.value.map(|entry| (entry, found.tier))
    }

    async fn generate_english(self, key: CacheKey, raw: String, resolved: String, category: Category) -> Result<TextEntry> {
        let inner = &self.inner;
        if let Some(entry) = inner.texts.memory_get(&key).await {
            return Ok(entry);
        }

        METRICS.generations.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[text] generating profile for \"{}\" ({})", resolved, category);
        let text = timed(
            inner.config.text_timeout,
            "text generation",
            inner.text_gen.generate_text(&resolved, category),
        )
        .await?;

        // Sheet names go through the index too, so a curated alias keeps its target.
        let official = canonical::extract_sheet_name(&text)
            .map(|sheet| inner.canonicalizer.resolve(&sheet, Some(&raw)));
        let entry = TextEntry {
            subject_name: official.clone().unwrap_or_else(|| resolved.clone()),
            text,
            category,
            language: Language::En,
            prompt_version: inner.config.prompt_version.clone(),
            provider: inner.text_gen.name().to_string(),
            created_at: crate::cache::now_millis(),
        };

        if let Some(official) = &official {
            self.adopt_official_name(&raw, &resolved, official, category, Language::En, &key, &entry)
                .await;
        }
        self.store_text(&key, &entry).await;
        Ok(entry)
    }

    async fn generate_translation(
        self,
        key: CacheKey,
        raw: String,
        resolved: String,
        category: Category,
        language: Language,
    ) -> Result<TextEntry> {
        let inner = &self.inner;
        if let Some(entry) = inner.texts.memory_get(&key).await {
            return Ok(entry);
        }

        let (english, _) = self.english_profile(&raw, &resolved, category).await?;

        METRICS.generations.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[text] translating profile for \"{}\" to {}", english.subject_name, language);
        let text = timed(
            inner.config.text_timeout,
            "translation",
            inner.text_gen.translate(&english.text, language),
        )
        .await?;

        let entry = TextEntry {
            subject_name: english.subject_name.clone(),
            text,
            category,
            language,
            prompt_version: inner.config.prompt_version.clone(),
            provider: format!("{}-translate", inner.text_gen.name()),
            created_at: crate::cache::now_millis(),
        };

        let official = english.subject_name.as_str();
        let official_key = self.text_key(official, category, language);
        if official_key != key {
            self.store_text(&official_key, &entry).await;
        }
        self.store_text(&key, &entry).await;
        Ok(entry)
    }

    /// A generated sheet named the subject; remember that name and make the
    /// entry reachable under it too.
    #[allow(clippy::too_many_arguments)]
    async fn adopt_official_name(
        &self,
        raw: &str,
        resolved: &str,
        official: &str,
        category: Category,
        language: Language,
        key: &CacheKey,
        entry: &TextEntry,
    ) {
        if canonical::normalize(official) != canonical::normalize(resolved) {
            self.inner.canonicalizer.register(raw, official);
        }

        let official_key = self.text_key(official, category, language);
        if &official_key != key {
            self.store_text(&official_key, entry).await;
        }
    }

    async fn store_text(&self, key: &CacheKey, entry: &TextEntry) {
        if !self.inner.texts.put(key, entry).await {
            tracing::warn!("[text] {} served without persistence", key);
        }
    }

    /// Illustration for `raw`. The image URL is either external or a
    /// `/api/image/{id}` blob reference.
    pub async fn get_or_generate_image(
        &self,
        raw: &str,
        category: Category,
        style: &Style,
        language: Language,
        universe: Option<&str>,
    ) -> Result<ImageOutcome> {
        let raw = validate_subject(raw)?;
        let resolved = self.inner.canonicalizer.resolve(raw, None);
        let version = &self.inner.config.image_prompt_version;
        let key = build_key(&KeyParts::image(
            version,
            &resolved,
            category,
            language,
            ImageVariant {
                style: style.clone(),
                universe,
            },
        ));

        let names = [resolved.as_str(), raw];
        let probe = SeedProbe {
            names: &names,
            category,
            language,
            prompt_version: version,
        };
        let found = self.inner.images.lookup(&key, &probe).await;
        tracing::debug!("[image] {} -> {}", key, found.tier);
        if let Some(entry) = found.value {
            return Ok(ImageOutcome {
                image_url: entry.image_url,
                tier: found.tier,
                provider: entry.provider,
            });
        }

        let svc = self.clone();
        let job_key = key.clone();
        let style = style.clone();
        let universe = universe.map(str::to_string);
        let entry = self
            .inner
            .image_jobs
            .dedupe(&key, move || async move {
                record_failure(svc.generate_image(job_key, resolved, category, style, universe).await)
            })
            .await?;

        Ok(ImageOutcome {
            image_url: entry.image_url,
            tier: Tier::Miss,
            provider: entry.provider,
        })
    }

    async fn generate_image(
        self,
        key: CacheKey,
        resolved: String,
        category: Category,
        style: Style,
        universe: Option<String>,
    ) -> Result<ImageEntry> {
        let inner = &self.inner;
        if let Some(entry) = inner.images.memory_get(&key).await {
            return Ok(entry);
        }

        METRICS.generations.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[image] generating illustration for \"{}\" ({}, {})", resolved, category, style);
        let prompt = build_image_prompt(&resolved, category, &style, universe.as_deref());
        let generated = timed(
            inner.config.image_timeout,
            "image generation",
            inner.image_gen.generate_image(&prompt, category),
        )
        .await?;

        let image_url = match generated.payload {
            ImagePayload::Base64 { content_type, data } => {
                self.keep_inline_image(&key, content_type.as_deref(), &data).await?
            }
            ImagePayload::Url(url) if inner.config.inline_remote_images => self.inline_remote(&key, url).await,
            ImagePayload::Url(url) => url,
        };

        let entry = ImageEntry {
            image_url,
            provider: generated.provider,
            prompt_version: inner.config.image_prompt_version.clone(),
            created_at: crate::cache::now_millis(),
        };
        if !inner.images.put(&key, &entry).await {
            tracing::warn!("[image] {} served without persistence", key);
        }
        Ok(entry)
    }

    /// Stores a base64 payload as a blob. If the blob cannot be stored the
    /// image is kept inline as a `data:` URL; the paid generation is not lost.
    async fn keep_inline_image(&self, key: &CacheKey, content_type: Option<&str>, data: &str) -> Result<String> {
        match self.inner.blobs.store(key, content_type, data).await {
            Ok(id) => Ok(BlobStore::url_for(&id)),
            Err(ScentKitError::CacheUnavailable(reason)) => {
                tracing::warn!("[image] blob store unavailable ({}); inlining image for {}", reason, key);
                let (embedded, payload) = strip_data_url(data);
                let mime = content_type.or(embedded).unwrap_or("image/png");
                Ok(format!("data:{};base64,{}", mime, payload))
            }
            Err(e) => Err(e),
        }
    }

    /// Pulls a provider-hosted image into the blob store, keeping the
    /// external URL when that fails.
    async fn inline_remote(&self, key: &CacheKey, url: String) -> String {
        let fetched = fetch_remote_image(&self.inner.http, &url, self.inner.config.max_remote_image_size).await;
        let (bytes, content_type) = match fetched {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("[image] keeping external url for {}: {}", key, e);
                return url;
            }
        };
        match self
            .inner
            .blobs
            .store(key, Some(&content_type), &STANDARD.encode(&bytes))
            .await
        {
            Ok(id) => BlobStore::url_for(&id),
            Err(e) => {
                tracing::warn!("[image] keeping external url for {}: {}", key, e);
                url
            }
        }
    }

    /// Empties the memory tiers and the in-flight registries. Seed and
    /// persistent data are untouched.
    pub fn clear_volatile_caches(&self) {
        let inner = &self.inner;
        inner.texts.clear_memory();
        inner.images.clear_memory();
        inner.text_jobs.clear();
        inner.image_jobs.clear();
        tracing::info!("[admin] volatile caches cleared");
    }

    pub async fn retrieve_blob(&self, id: &str) -> Result<ImageBlob> {
        self.inner
            .blobs
            .retrieve(id)
            .await
            .ok_or_else(|| ScentKitError::NotFound(format!("Image {} not found", id)))
    }

    /// Removes aliases keyed by or pointing at `name`.
    pub fn purge_aliases(&self, name: &str) -> usize {
        let removed = self.inner.canonicalizer.purge(name);
        tracing::info!("[admin] purged {} aliases for \"{}\"", removed, name);
        removed
    }

    pub fn inflight(&self) -> usize {
        self.inner.text_jobs.len() + self.inner.image_jobs.len()
    }

    pub async fn health(&self) -> HealthReport {
        let persistent = match &self.inner.persistent {
            Some(store) => Some(PersistentHealth {
                backend: store.backend(),
                ok: store.probe().await,
            }),
            None => None,
        };
        let degraded = persistent.as_ref().is_some_and(|p| !p.ok);
        HealthReport {
            status: if degraded { "degraded" } else { "ok" },
            persistent,
            seeds: self.inner.seed_stats,
            aliases: self.inner.canonicalizer.len(),
            inflight: self.inflight(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        CacheStats {
            text: TierStats {
                memory_entries: inner.texts.memory_entries(),
                inflight: inner.text_jobs.len(),
            },
            image: TierStats {
                memory_entries: inner.images.memory_entries(),
                inflight: inner.image_jobs.len(),
            },
            seeds: inner.seed_stats,
            aliases: inner.canonicalizer.len(),
            persistent_backend: inner.persistent.as_ref().map(GuardedStore::backend),
            persistent: inner.persistent.as_ref().and_then(GuardedStore::stats),
        }
    }
}

impl std::fmt::Debug for ScentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScentService")
            .field("prompt_version", &self.inner.config.prompt_version)
            .field("image_prompt_version", &self.inner.config.image_prompt_version)
            .field("canonicalizer", &self.inner.canonicalizer)
            .field("persistent", &self.inner.persistent.as_ref().map(GuardedStore::backend))
            .finish()
    }
}
