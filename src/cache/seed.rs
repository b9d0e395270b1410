use crate::canonical;
use crate::key::Language;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

pub const RESPONSES_FILE: &str = "responses.json";
pub const INDEX_FILE: &str = "character-index.json";

const SEED_SEPARATOR: &str = "||";

#[derive(Debug, Clone)]
struct SeedText {
    name: String,
    text: String,
}

/// Counts reported at start-up and by `/stats/cache`.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SeedStats {
    pub texts: usize,
    pub images: usize,
    pub aliases: usize,
}

/// Immutable, hand-curated entries for well-known subjects.
///
/// `responses.json` maps `"{Name}||{lang}"` to a profile text and
/// `"{Name}||image||{lang}"` to an image URL; `character-index.json` maps
/// search terms to official names. Entries are indexed by normalized name,
/// so any spelling that canonicalizes to the same subject finds them.
#[derive(Debug, Default)]
pub struct SeedStore {
    texts: HashMap<(String, Language), SeedText>,
    images: HashMap<(String, Language), String>,
    aliases: Vec<(String, String)>,
}

impl SeedStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the seed files from `dir`. Missing or malformed files yield an
    /// empty section rather than an error; the service runs without seeds.
    pub fn load(dir: &Path) -> Self {
        let responses = read_json_object(&dir.join(RESPONSES_FILE));
        let index = read_json_object(&dir.join(INDEX_FILE))
            .into_iter()
            .filter_map(|(alias, official)| match official {
                Value::String(s) => Some((alias, s)),
                _ => None,
            })
            .collect();
        let store = Self::from_parts(responses, index);
        let stats = store.stats();
        tracing::info!(
            "Seed cache loaded from {}: texts={}, images={}, aliases={}",
            dir.display(),
            stats.texts,
            stats.images,
            stats.aliases
        );
        store
    }

    pub fn from_parts(responses: HashMap<String, Value>, index: HashMap<String, String>) -> Self {
        let mut store = Self::default();

        for (raw_key, value) in responses {
            let parts: Vec<&str> = raw_key.split(SEED_SEPARATOR).collect();
            match parts.as_slice() {
                [name, "image", lang] => {
                    if let Some(url) = seed_value(&value, "imageUrl") {
                        store
                            .images
                            .insert((canonical::normalize(name), Language::parse(lang)), url);
                    }
                }
                [name, lang] => {
                    if let Some(text) = seed_value(&value, "text") {
                        store.texts.insert(
                            (canonical::normalize(name), Language::parse(lang)),
                            SeedText {
                                name: name.trim().to_string(),
                                text,
                            },
                        );
                    }
                }
                _ => tracing::warn!("Ignoring seed response with unexpected key: {}", raw_key),
            }
        }

        store.aliases = index.into_iter().collect();
        store
    }

    /// Seed profile for `name`: `(official name, text)`.
    pub fn text(&self, name: &str, language: Language) -> Option<(&str, &str)> {
        self.texts
            .get(&(canonical::normalize(name), language))
            .map(|seed| (seed.name.as_str(), seed.text.as_str()))
    }

    pub fn image(&self, name: &str, language: Language) -> Option<&str> {
        self.images
            .get(&(canonical::normalize(name), language))
            .map(String::as_str)
    }

    pub fn aliases(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.aliases.iter().cloned()
    }

    pub fn stats(&self) -> SeedStats {
        SeedStats {
            texts: self.texts.len(),
            images: self.images.len(),
            aliases: self.aliases.len(),
        }
    }
}

/// Seed values are plain strings; object values carrying `field` are accepted too.
fn seed_value(value: &Value, field: &str) -> Option<String> {
    let s = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get(field)?.as_str()?,
        _ => return None,
    };
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn read_json_object(path: &Path) -> HashMap<String, Value> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!("Failed to read seed file {}: {}", path.display(), e);
            return HashMap::new();
        }
    };
    match serde_json::from_str::<HashMap<String, Value>>(&raw) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!("Failed to parse seed file {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SeedStore {
        let responses: HashMap<String, Value> = serde_json::from_value(json!({
            "Naruto Uzumaki||en": "Name: Naruto Uzumaki\nNaruto Uzumaki emanates an aroma of ramen broth...",
            "Naruto Uzumaki||es": "Nombre: Naruto Uzumaki\n...",
            "Naruto Uzumaki||image||en": "/generated/naruto-uzumaki.png",
            "Joel Miller||en": { "text": "Name: Joel Miller\nSawdust and rain." },
            "broken key": "ignored",
        }))
        .unwrap();
        let index = HashMap::from([("naruto".to_string(), "Naruto Uzumaki".to_string())]);
        SeedStore::from_parts(responses, index)
    }

    #[test]
    fn finds_entries_by_any_spelling() {
        let seeds = store();
        let (name, text) = seeds.text("uzumaki naruto", Language::En).unwrap();
        assert_eq!(name, "Naruto Uzumaki");
        assert!(text.starts_with("Name: Naruto Uzumaki"));
        assert!(seeds.text("Naruto Uzumaki", Language::Es).is_some());
        assert_eq!(
            seeds.image("NARUTO UZUMAKI", Language::En),
            Some("/generated/naruto-uzumaki.png")
        );
        assert_eq!(seeds.image("Naruto Uzumaki", Language::Es), None);
    }

    #[test]
    fn accepts_object_values_and_skips_bad_keys() {
        let seeds = store();
        assert!(seeds.text("Joel Miller", Language::En).is_some());
        let stats = seeds.stats();
        assert_eq!(stats.texts, 3);
        assert_eq!(stats.images, 1);
        assert_eq!(stats.aliases, 1);
    }

    #[test]
    fn load_tolerates_missing_directory() {
        let seeds = SeedStore::load(Path::new("./definitely-not-a-seed-dir"));
        assert_eq!(seeds.stats().texts, 0);
    }
}
