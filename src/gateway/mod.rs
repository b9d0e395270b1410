//! Paid provider boundary.
//!
//! The service only sees the [`TextGenerator`] and [`ImageGenerator`] traits.
//! Calls are slow, billable and may fail; every one of them goes through
//! [`timed`] so a hung provider turns into a `GenerationFailed` instead of a
//! key that stays in flight forever.

pub mod aiml;
pub mod gemini;

pub use aiml::AimlImageClient;
pub use gemini::GeminiClient;

use crate::key::{Category, Language, Style};
use crate::{Result, ScentKitError};
use std::future::Future;
use std::time::Duration;

/// Generated profiles shorter than this are treated as failed generations.
pub const MIN_TEXT_LEN: usize = 50;

/// Upper bound on prompt length sent to image providers.
pub const MAX_IMAGE_PROMPT_CHARS: usize = 2000;

#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider label recorded on cache entries.
    fn name(&self) -> &str;

    async fn generate_text(&self, subject: &str, category: Category) -> Result<String>;

    async fn translate(&self, text: &str, target: Language) -> Result<String>;
}

#[async_trait::async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str, category: Category) -> Result<GeneratedImage>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    /// Externally hosted image.
    Url(String),
    /// Inline payload, possibly still wrapped in a `data:` URL.
    Base64 {
        content_type: Option<String>,
        data: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub payload: ImagePayload,
    pub provider: String,
}

/// Bounds `fut` by `limit`. Elapsing counts as a generation failure.
pub async fn timed<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!("[gateway] {} timed out after {:?}", what, limit);
            Err(ScentKitError::GenerationFailed(format!("{} timed out after {:?}", what, limit)))
        }
    }
}

/// Trims generated text and rejects anything too short to be a profile.
pub fn accept_text(raw: &str) -> Result<String> {
    let text = raw.trim();
    if text.chars().count() < MIN_TEXT_LEN {
        return Err(ScentKitError::GenerationFailed(format!(
            "Provider returned too little text ({} chars)",
            text.chars().count()
        )));
    }
    Ok(text.to_string())
}

fn style_guide(category: Category) -> &'static str {
    match category {
        Category::Anime => "Official anime key visual style: clean line art, cel shading, anime-accurate proportions.",
        Category::Games => "Official game key art style matching the game's canonical look.",
        Category::Movies => "Source-medium style: live-action likeness for live-action franchises, animation otherwise.",
        Category::Comics => "Comic-book illustration style with strong inks and canonical costume rendering.",
        Category::Books => "Book-cover illustration style consistent with the franchise's adaptations.",
        Category::Cartoons => "Original cartoon style with its simplified shapes and palette.",
        Category::Myth => "Classical mythic illustration with grounded historical motifs.",
        Category::Any => "Official visual language of the original source material.",
    }
}

/// Portrait prompt for `subject`.
pub fn build_image_prompt(subject: &str, category: Category, style: &Style, universe: Option<&str>) -> String {
    let universe = universe.map(str::trim).filter(|u| !u.is_empty()).unwrap_or("Unknown");
    let style_line = match style.as_str() {
        "auto" | "any" => format!("Style mode: auto by category ({}). {}", category, style_guide(category)),
        requested => format!("Requested style mode: {}. Keep the canonical identity and only change rendering.", requested),
    };

    let prompt = format!(
        "Canonical character illustration.\n\
         Name: {subject}\n\
         Universe: {universe}\n\
         Category: {category}\n\
         {style_line}\n\
         Match the official appearance: face, hair, outfit, age and proportions.\n\
         Centered bust or half-body portrait, clear face, universe-consistent background.\n\
         No text, logos, watermarks or signatures.",
        subject = subject.trim(),
    );
    prompt.chars().take(MAX_IMAGE_PROMPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timed_turns_timeouts_into_generation_failures() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ScentKitError>(1)
        };
        let result = timed(Duration::from_millis(10), "slow call", slow).await;
        assert!(matches!(result, Err(ScentKitError::GenerationFailed(_))));

        let fast = timed(Duration::from_secs(1), "fast call", async { Ok::<_, ScentKitError>(2) }).await;
        assert_eq!(fast.unwrap(), 2);
    }

    #[test]
    fn short_text_is_rejected() {
        assert!(accept_text("too short").is_err());
        let long = "Name: Son Goku\nSweat, scorched earth and the ozone of a charged ki blast.";
        assert_eq!(accept_text(&format!("  {}  ", long)).unwrap(), long);
    }

    #[test]
    fn image_prompt_mentions_subject_and_style() {
        let prompt = build_image_prompt("Son Goku", Category::Anime, &Style::default(), Some("Dragon Ball"));
        assert!(prompt.contains("Name: Son Goku"));
        assert!(prompt.contains("Universe: Dragon Ball"));
        assert!(prompt.contains("anime key visual"));

        let watercolor = build_image_prompt("Son Goku", Category::Anime, &Style::parse("watercolor"), None);
        assert!(watercolor.contains("Requested style mode: watercolor"));
        assert!(watercolor.contains("Universe: Unknown"));
        assert!(watercolor.chars().count() <= MAX_IMAGE_PROMPT_CHARS);
    }
}
