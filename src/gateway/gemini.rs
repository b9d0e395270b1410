use crate::gateway::{accept_text, TextGenerator};
use crate::key::{Category, Language};
use crate::{Result, ScentKitError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_SUBJECT_CHARS: usize = 120;
const MAX_OUTPUT_TOKENS: u32 = 650;

const PROFILE_INSTRUCTIONS: &str = "You write aromatic profiles for fictional characters.\n\
Start with a character sheet, one field per line:\n\
Name: <official full name>\n\
Universe: <series or franchise>\n\
Category: <category>\n\
Aroma Type: <masculine|feminine|unisex>\n\
Then a blank line and a vivid, character-specific scent description with \
olfactory notes and one matching real fragrance.\n\
No headers, emojis or commentary beyond that structure.";

const TRANSLATE_INSTRUCTIONS: &str = "You are a professional translator.\n\
Translate naturally, keeping meaning, line structure and line breaks.\n\
Translate sheet labels too ('Name:' becomes 'Nombre:' in Spanish).\n\
Never translate brand or product names. Output only the translation.";

/// Gemini `generateContent` over REST. Used for both profile generation and
/// translation.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.text.as_deref())
    }
}

impl GeminiClient {
    pub fn new(http: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature,
                top_p: 0.9,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScentKitError::GenerationFailed(format!("Gemini request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ScentKitError::GenerationFailed(format!(
                "Gemini status {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ScentKitError::GenerationFailed(format!("Malformed Gemini response: {}", e)))?;
        parsed
            .first_text()
            .map(|t| t.trim().to_string())
            .ok_or_else(|| ScentKitError::GenerationFailed("Gemini returned no candidates".into()))
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate_text(&self, subject: &str, category: Category) -> Result<String> {
        let subject: String = subject.trim().chars().take(MAX_SUBJECT_CHARS).collect();
        let prompt = format!(
            "{}\n\nCharacter: {}\nContext/Category: {}\n\
             Identify the character's universe and write the profile for this character only.",
            PROFILE_INSTRUCTIONS, subject, category
        );
        tracing::debug!("[gemini] generating profile for \"{}\" ({})", subject, category);
        accept_text(&self.generate(&prompt, 0.75).await?)
    }

    async fn translate(&self, text: &str, target: Language) -> Result<String> {
        let target_name = match target {
            Language::Es => "Spanish",
            Language::En => "English",
        };
        let prompt = format!("{}\n\nTarget language: {}\n\nTEXT:\n{}", TRANSLATE_INSTRUCTIONS, target_name, text);
        tracing::debug!("[gemini] translating {} chars to {}", text.len(), target);
        accept_text(&self.generate(&prompt, 0.2).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_candidate_text() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Name: Son Goku\n..."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.first_text(), Some("Name: Son Goku\n..."));

        let empty: GenerateResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert_eq!(empty.first_text(), None);
    }

    #[test]
    fn request_body_uses_camel_case() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                max_output_tokens: 650,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 650);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_generation_failure() {
        let client = GeminiClient::new(Client::new(), "key", DEFAULT_GEMINI_MODEL).with_base_url("http://127.0.0.1:9");
        let result = client.generate_text("Son Goku", Category::Anime).await;
        assert!(matches!(result, Err(ScentKitError::GenerationFailed(_))));
    }
}
