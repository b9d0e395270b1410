//! Typed cache keys.
//!
//! A [`CacheKey`] is only ever produced by [`build_key`], which canonicalizes
//! the subject and normalizes every other component before joining them with
//! [`KEY_SEPARATOR`]. Two requests share a key iff all of their components are
//! equal after normalization; deduplication and every cache tier rely on it.

use crate::canonical;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Cannot occur inside any component (see [`build_key`]).
pub const KEY_SEPARATOR: &str = "::";

const NO_UNIVERSE: &str = "nouniv";
const MAX_STYLE_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Text,
    Image,
}

impl Domain {
    fn prefix(self) -> &'static str {
        match self {
            Domain::Text => "smell",
            Domain::Image => "img",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl Language {
    /// Anything that starts with "es" is Spanish, everything else English.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().to_lowercase().starts_with("es") {
            Language::Es
        } else {
            Language::En
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Any,
    Anime,
    Games,
    Movies,
    Comics,
    Books,
    Cartoons,
    Myth,
}

impl Category {
    /// Maps free-form category labels (English or Spanish) onto the closed set.
    /// Unrecognized labels fall back to [`Category::Any`].
    pub fn parse(raw: &str) -> Self {
        let v = raw.trim().to_lowercase();
        if v.is_empty() || v == "any" {
            Category::Any
        } else if v.contains("anime") || v.contains("manga") {
            Category::Anime
        } else if v.contains("game") || v.contains("videojuego") {
            Category::Games
        } else if ["movie", "tv", "pel", "serie", "show", "film"]
            .iter()
            .any(|p| v.contains(p))
        {
            Category::Movies
        } else if v.contains("comic") {
            Category::Comics
        } else if v.contains("book") || v.contains("novel") || v.contains("libro") {
            Category::Books
        } else if v.contains("cartoon") || v.contains("caricatura") {
            Category::Cartoons
        } else if v.contains("myth") || v.contains("folklore") || v.contains("mito") {
            Category::Myth
        } else {
            Category::Any
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Any => "any",
            Category::Anime => "anime",
            Category::Games => "games",
            Category::Movies => "movies",
            Category::Comics => "comics",
            Category::Books => "books",
            Category::Cartoons => "cartoons",
            Category::Myth => "myth",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illustration style hint, sanitized to `[a-z0-9-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Style(String);

impl Style {
    pub fn parse(raw: &str) -> Self {
        let token: String = raw
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .take(MAX_STYLE_LEN)
            .collect();
        if token.is_empty() {
            Self::default()
        } else {
            Self(token)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Style {
    fn default() -> Self {
        Self("auto".to_string())
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image-only key components.
#[derive(Debug, Clone, Default)]
pub struct ImageVariant<'a> {
    pub style: Style,
    pub universe: Option<&'a str>,
}

/// The semantic request a key is derived from.
#[derive(Debug, Clone)]
pub struct KeyParts<'a> {
    pub domain: Domain,
    pub version: &'a str,
    pub subject: &'a str,
    pub category: Category,
    pub language: Language,
    pub variant: Option<ImageVariant<'a>>,
}

impl<'a> KeyParts<'a> {
    pub fn text(version: &'a str, subject: &'a str, category: Category, language: Language) -> Self {
        Self {
            domain: Domain::Text,
            version,
            subject,
            category,
            language,
            variant: None,
        }
    }

    pub fn image(
        version: &'a str,
        subject: &'a str,
        category: Category,
        language: Language,
        variant: ImageVariant<'a>,
    ) -> Self {
        Self {
            domain: Domain::Image,
            version,
            subject,
            category,
            language,
            variant: Some(variant),
        }
    }
}

/// Derives the cache key for a request. The subject is canonicalized here,
/// so callers pass whatever display name they resolved.
pub fn build_key(parts: &KeyParts<'_>) -> CacheKey {
    let mut components: Vec<String> = vec![
        parts.domain.prefix().to_string(),
        normalize_part(parts.version),
        canonical::normalize(parts.subject),
    ];

    if parts.domain == Domain::Image {
        let variant = parts.variant.clone().unwrap_or_default();
        components.push(universe_tag(variant.universe));
        components.push(parts.category.as_str().to_string());
        components.push(variant.style.as_str().to_string());
    } else {
        components.push(parts.category.as_str().to_string());
    }
    components.push(parts.language.as_str().to_string());

    CacheKey(components.join(KEY_SEPARATOR))
}

/// Short digest of the universe hint, or `nouniv` when there is none.
pub fn universe_tag(universe: Option<&str>) -> String {
    match universe.map(normalize_part).filter(|u| !u.is_empty()) {
        Some(u) => {
            let digest = Sha256::digest(u.as_bytes());
            hex::encode(digest)[..8].to_string()
        }
        None => NO_UNIVERSE.to_string(),
    }
}

fn normalize_part(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
