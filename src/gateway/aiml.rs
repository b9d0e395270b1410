use crate::gateway::{GeneratedImage, ImageGenerator, ImagePayload, MAX_IMAGE_PROMPT_CHARS};
use crate::key::Category;
use crate::{Result, ScentKitError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PRIMARY_MODEL: &str = "openai/gpt-image-1-5";
pub const DEFAULT_FALLBACK_MODEL: &str = "bytedance/seedream-4-5";
const DEFAULT_BASE_URL: &str = "https://api.aimlapi.com/v1";

/// Image generation through the AIML API `images/generations` endpoint.
///
/// Each category has an ordered model chain; a model that errors or returns
/// nothing usable hands over to the next one. Base64 output is requested so
/// results never point at short-lived provider CDN URLs.
pub struct AimlImageClient {
    http: Client,
    api_key: String,
    primary_model: String,
    fallback_model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    response_format: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    images: Vec<Value>,
}

/// Accepts the short aliases people tend to put in env vars.
pub fn normalize_model_id(raw: &str) -> String {
    let raw = raw.trim();
    match raw.to_lowercase().as_str() {
        "gpt-image-1" => "openai/gpt-image-1".to_string(),
        "gpt-image-1-mini" => "openai/gpt-image-1-mini".to_string(),
        "gpt-image-1.5" | "gpt-image-1-5" => "openai/gpt-image-1-5".to_string(),
        _ => raw.to_string(),
    }
}

/// Pulls the first usable image out of a provider response.
fn parse_image(body: &ImageResponse) -> Option<ImagePayload> {
    let first = body.data.first().or_else(|| body.images.first())?;
    if let Value::String(url) = first {
        return Some(ImagePayload::Url(url.clone()));
    }

    let field = |name: &str| first.get(name).and_then(Value::as_str).filter(|s| !s.is_empty());
    if let Some(b64) = field("b64_json").or_else(|| field("b64")).or_else(|| field("base64")) {
        return Some(ImagePayload::Base64 {
            content_type: None,
            data: b64.to_string(),
        });
    }
    field("url").map(|url| ImagePayload::Url(url.to_string()))
}

impl AimlImageClient {
    pub fn new(http: Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_models(mut self, primary: &str, fallback: &str) -> Self {
        self.primary_model = normalize_model_id(primary);
        self.fallback_model = normalize_model_id(fallback);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Models to try for `category`, in order.
    pub fn model_chain(&self, category: Category) -> Vec<&str> {
        let primary = self.primary_model.as_str();
        let fallback = self.fallback_model.as_str();
        let mut chain = match category {
            Category::Anime => vec![primary],
            Category::Games | Category::Myth => vec![fallback, primary],
            _ => vec![primary, fallback],
        };
        chain.dedup();
        chain
    }

    async fn request(&self, model: &str, prompt: &str) -> Result<ImagePayload> {
        let body = ImageRequest {
            model,
            prompt,
            response_format: "b64_json",
        };
        let resp = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScentKitError::GenerationFailed(format!("{}: {}", model, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ScentKitError::GenerationFailed(format!(
                "{} status {}: {}",
                model,
                status,
                detail.chars().take(100).collect::<String>()
            )));
        }

        let parsed: ImageResponse = resp.json().await.unwrap_or_default();
        parse_image(&parsed).ok_or_else(|| ScentKitError::GenerationFailed(format!("{}: no image in response", model)))
    }
}

#[async_trait::async_trait]
impl ImageGenerator for AimlImageClient {
    async fn generate_image(&self, prompt: &str, category: Category) -> Result<GeneratedImage> {
        let prompt: String = prompt.trim().chars().take(MAX_IMAGE_PROMPT_CHARS).collect();
        let mut last_error = None;

        for model in self.model_chain(category) {
            tracing::info!("[aiml] trying model={} category={} prompt_len={}", model, category, prompt.len());
            match self.request(model, &prompt).await {
                Ok(payload) => {
                    return Ok(GeneratedImage {
                        payload,
                        provider: format!("aiml:{}", model),
                    })
                }
                Err(e) => {
                    tracing::warn!("[aiml] model={} failed: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ScentKitError::GenerationFailed("No image models configured".into())))
    }
}
