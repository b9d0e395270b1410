#![allow(dead_code)]

use scentkit::cache::{KvStore, MemoryKv, SeedStore};
use scentkit::config::ScentKitConfig;
use scentkit::gateway::{GeneratedImage, ImageGenerator, ImagePayload, TextGenerator};
use scentkit::key::{Category, Language};
use scentkit::service::ScentService;
use scentkit::{Result, ScentKitError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 1x1 transparent PNG
pub const PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub const SEED_NARUTO_TEXT: &str =
    "Name: Naruto Uzumaki\nUniverse: Naruto\n\nCurated: miso ramen steam, sun-warmed orange cotton and cedar from the Hidden Leaf.";

/// Counting text provider. Sheets name the subject unless `sheet_name` is set.
pub struct FakeText {
    pub calls: AtomicUsize,
    pub translations: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Duration,
    pub sheet_name: Option<String>,
}

impl FakeText {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            translations: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay: Duration::from_millis(30),
            sheet_name: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn naming(mut self, sheet_name: &str) -> Self {
        self.sheet_name = Some(sheet_name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn translations(&self) -> usize {
        self.translations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TextGenerator for FakeText {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate_text(&self, subject: &str, category: Category) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScentKitError::GenerationFailed("provider down".into()));
        }
        let name = self.sheet_name.as_deref().unwrap_or(subject);
        Ok(format!(
            "Name: {}\nCategory: {}\n\nGenerated #{}: petrichor, worn leather and a trace of smoke.",
            name,
            category,
            self.calls()
        ))
    }

    async fn translate(&self, text: &str, _target: Language) -> Result<String> {
        self.translations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScentKitError::GenerationFailed("provider down".into()));
        }
        Ok(text.replace("Name:", "Nombre:").replace("Generated", "Generado"))
    }
}

pub enum ImageMode {
    Base64,
    Url(String),
}

pub struct FakeImage {
    pub calls: AtomicUsize,
    pub mode: ImageMode,
    pub delay: Duration,
}

impl FakeImage {
    pub fn base64() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            mode: ImageMode::Base64,
            delay: Duration::from_millis(30),
        }
    }

    pub fn url(url: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            mode: ImageMode::Url(url.to_string()),
            delay: Duration::from_millis(30),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageGenerator for FakeImage {
    async fn generate_image(&self, _prompt: &str, _category: Category) -> Result<GeneratedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let payload = match &self.mode {
            ImageMode::Base64 => ImagePayload::Base64 {
                content_type: Some("image/png".into()),
                data: format!("data:image/png;base64,{}", PNG_B64),
            },
            ImageMode::Url(url) => ImagePayload::Url(url.clone()),
        };
        Ok(GeneratedImage {
            payload,
            provider: "fake-image".into(),
        })
    }
}

/// Persistent backend that fails every call.
pub struct FailingStore;

#[async_trait::async_trait]
impl KvStore for FailingStore {
    fn backend(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(ScentKitError::CacheUnavailable("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
        Err(ScentKitError::CacheUnavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(ScentKitError::CacheUnavailable("connection refused".into()))
    }
}

pub fn test_config() -> ScentKitConfig {
    ScentKitConfig {
        rate_limit: None,
        store_timeout: Duration::from_millis(500),
        text_timeout: Duration::from_secs(2),
        image_timeout: Duration::from_secs(2),
        ..ScentKitConfig::default()
    }
}

pub fn seeds() -> SeedStore {
    let responses: HashMap<String, serde_json::Value> = serde_json::from_value(json!({
        "Naruto Uzumaki||en": SEED_NARUTO_TEXT,
        "Naruto Uzumaki||image||en": "/generated/naruto-uzumaki.png",
    }))
    .unwrap();
    let index = HashMap::from([
        ("naruto".to_string(), "Naruto Uzumaki".to_string()),
        ("goku".to_string(), "Son Goku".to_string()),
    ]);
    SeedStore::from_parts(responses, index)
}

pub struct Harness {
    pub service: ScentService,
    pub text: Arc<FakeText>,
    pub image: Arc<FakeImage>,
    pub store: Arc<MemoryKv>,
}

pub fn harness_with(config: ScentKitConfig, text: FakeText, image: FakeImage, seeds: SeedStore) -> Harness {
    let text = Arc::new(text);
    let image = Arc::new(image);
    let store = Arc::new(MemoryKv::new());
    let service = ScentService::builder(config, text.clone(), image.clone())
        .seeds(seeds)
        .persistent_store(store.clone())
        .build()
        .unwrap();
    Harness {
        service,
        text,
        image,
        store,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config(), FakeText::new(), FakeImage::base64(), seeds())
}
