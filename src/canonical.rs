//! Subject-name canonicalization and the alias index.
//!
//! Users type character names in every imaginable shape ("Uchiha Sasuke",
//! "sasuke  uchiha", "Son Goku", "Dr. Strange"). Everything that ends up in
//! a cache key goes through [`normalize`] first so those variants collapse
//! onto one key. On top of that, [`NameCanonicalizer`] keeps an alias index
//! from normalized search terms to the authoritative display name discovered
//! in generated content ("naruto" → "Naruto Uzumaki").

use dashmap::DashMap;
use std::sync::Arc;

/// Returned by [`normalize`] when nothing survives stripping.
pub const UNKNOWN_SUBJECT: &str = "unknown";

const HONORIFIC_PREFIXES: &[&str] = &[
    "son", "dr", "dr.", "mr", "mr.", "miss", "mrs", "mrs.", "master", "saint", "god", "demon",
    "angel", "prince", "princess", "king", "queen",
];

const GENERATIONAL_SUFFIXES: &[&str] = &["jr", "sr", "iii", "ii", "i"];

/// Normalizes a free-text subject name into its canonical key form.
///
/// Lowercases, collapses whitespace, strips one leading honorific and one
/// trailing generational suffix, drops every non-alphanumeric character and
/// sorts two-word names so that "Uchiha Sasuke" and "Sasuke Uchiha" agree.
/// Never returns an empty string: an empty result maps to [`UNKNOWN_SUBJECT`].
pub fn normalize(raw: &str) -> String {
    try_normalize(raw).unwrap_or_else(|| UNKNOWN_SUBJECT.to_string())
}

/// Like [`normalize`], but `None` when the name has no usable characters.
pub fn try_normalize(raw: &str) -> Option<String> {
    let lowered = raw.to_lowercase();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();

    // Prefix and suffix only count when another word follows / precedes them.
    if words.len() > 1 && HONORIFIC_PREFIXES.contains(&words[0]) {
        words.remove(0);
    }
    if words.len() > 1 && words.last().is_some_and(|w| GENERATIONAL_SUFFIXES.contains(w)) {
        words.pop();
    }

    let mut cleaned: Vec<String> = words
        .iter()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect();

    if cleaned.len() == 2 {
        cleaned.sort();
    }

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.join(" "))
    }
}

/// Pulls the authoritative name out of a generated profile.
///
/// Generated sheets carry a `Name: ...` line (`Nombre: ...` once translated).
pub fn extract_sheet_name(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let line = line.trim_start();
        let (label, value) = line.split_once(':')?;
        let label = label.trim().to_lowercase();
        if label != "name" && label != "nombre" {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Storage behind the alias index.
///
/// Keys are already normalized; implementations only need map-level
/// thread safety. Lost updates are acceptable, structural corruption is not.
pub trait AliasIndex: Send + Sync {
    fn get(&self, normalized: &str) -> Option<String>;
    fn insert(&self, normalized: String, official: String);
    /// Removes every `(alias, official)` pair the predicate selects.
    fn remove_where(&self, predicate: &dyn Fn(&str, &str) -> bool) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default in-process alias index.
#[derive(Debug, Default)]
pub struct InMemoryAliasIndex {
    entries: DashMap<String, String>,
}

impl InMemoryAliasIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AliasIndex for InMemoryAliasIndex {
    fn get(&self, normalized: &str) -> Option<String> {
        self.entries.get(normalized).map(|v| v.value().clone())
    }

    fn insert(&self, normalized: String, official: String) {
        self.entries.insert(normalized, official);
    }

    fn remove_where(&self, predicate: &dyn Fn(&str, &str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|alias, official| !predicate(alias, official));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Resolves user input to canonical display names through an injected
/// [`AliasIndex`].
#[derive(Clone)]
pub struct NameCanonicalizer {
    index: Arc<dyn AliasIndex>,
}

impl NameCanonicalizer {
    pub fn new(index: Arc<dyn AliasIndex>) -> Self {
        Self { index }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAliasIndex::new()))
    }

    /// Loads curated aliases. Keys are normalized on the way in.
    pub fn seed<I>(&self, aliases: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut count = 0;
        for (alias, official) in aliases {
            if official.trim().is_empty() {
                continue;
            }
            self.index.insert(normalize(&alias), official.trim().to_string());
            count += 1;
        }
        count
    }

    /// Looks `raw` up in the index, then `fallback`; returns `raw` unchanged
    /// when neither is known. The result is not necessarily normalized.
    pub fn resolve(&self, raw: &str, fallback: Option<&str>) -> String {
        if let Some(official) = self.index.get(&normalize(raw)) {
            return official;
        }
        if let Some(official) = fallback.and_then(|f| self.index.get(&normalize(f))) {
            return official;
        }
        raw.to_string()
    }

    /// Records `official` as the authoritative name for `raw`. Last writer wins.
    pub fn register(&self, raw: &str, official: &str) {
        let official = official.trim();
        if official.is_empty() {
            return;
        }
        let alias = normalize(raw);
        tracing::debug!("Registering alias \"{}\" -> \"{}\"", alias, official);
        self.index.insert(alias, official.to_string());
    }

    /// Drops every alias keyed by, or pointing at, `name`.
    pub fn purge(&self, name: &str) -> usize {
        let target = normalize(name);
        self.index
            .remove_where(&|alias, official| alias == target || normalize(official) == target)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl std::fmt::Debug for NameCanonicalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameCanonicalizer")
            .field("aliases", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_word_names_are_order_independent() {
        assert_eq!(normalize("Uchiha Sasuke"), normalize("Sasuke Uchiha"));
        assert_eq!(normalize("  SASUKE   uchiha "), "sasuke uchiha");
    }

    #[test]
    fn strips_honorifics_and_suffixes() {
        assert_eq!(normalize("Son Goku"), "goku");
        assert_eq!(normalize("Dr. Stephen Strange"), "stephen strange");
        assert_eq!(normalize("Ken Griffey Jr"), "griffey ken");
        // A lone honorific is the name itself.
        assert_eq!(normalize("King"), "king");
    }

    #[test]
    fn strips_punctuation_keeps_unicode_letters() {
        assert_eq!(normalize("L-Lawliet!"), "llawliet");
        assert_eq!(normalize("José"), "josé");
        assert_eq!(normalize("Monkey D. Luffy"), "monkey d luffy");
    }

    #[test]
    fn empty_maps_to_sentinel() {
        assert_eq!(normalize(""), UNKNOWN_SUBJECT);
        assert_eq!(normalize("?!  ..."), UNKNOWN_SUBJECT);
        assert!(try_normalize("   ").is_none());
        assert!(try_normalize("Naruto").is_some());
    }

    #[test]
    fn resolve_prefers_raw_then_fallback_then_input() {
        let names = NameCanonicalizer::in_memory();
        names.register("naruto", "Naruto Uzumaki");

        assert_eq!(names.resolve("NARUTO", None), "Naruto Uzumaki");
        assert_eq!(names.resolve("Hokage", Some("naruto")), "Naruto Uzumaki");
        assert_eq!(names.resolve("Hokage", None), "Hokage");
        assert_eq!(names.resolve("  weird Input ", Some("other")), "  weird Input ");
    }

    #[test]
    fn register_is_idempotent_and_last_writer_wins() {
        let names = NameCanonicalizer::in_memory();
        names.register("Joel", "Joel Miller");
        names.register("joel", "Joel Miller");
        assert_eq!(names.len(), 1);

        names.register("JOEL", "Joel (TLOU)");
        assert_eq!(names.resolve("joel", None), "Joel (TLOU)");
    }

    #[test]
    fn purge_removes_keys_and_targets() {
        let names = NameCanonicalizer::in_memory();
        names.register("naruto", "Naruto Uzumaki");
        names.register("uzumaki naruto", "Naruto Uzumaki");
        names.register("joel", "Joel Miller");

        assert_eq!(names.purge("Naruto Uzumaki"), 2);
        assert_eq!(names.len(), 1);
        assert_eq!(names.resolve("naruto", None), "naruto");
    }

    #[test]
    fn seed_normalizes_keys() {
        let names = NameCanonicalizer::in_memory();
        let loaded = names.seed(vec![
            ("Uchiha Sasuke".to_string(), "Sasuke Uchiha".to_string()),
            ("blank".to_string(), "  ".to_string()),
        ]);
        assert_eq!(loaded, 1);
        assert_eq!(names.resolve("sasuke uchiha", None), "Sasuke Uchiha");
    }

    #[test]
    fn extracts_name_lines() {
        let text = "Some intro\nName: Naruto Uzumaki\nUniverse: Naruto";
        assert_eq!(extract_sheet_name(text).as_deref(), Some("Naruto Uzumaki"));
        assert_eq!(
            extract_sheet_name("nombre:   Goku \r\n").as_deref(),
            Some("Goku")
        );
        assert_eq!(extract_sheet_name("Name:\nUniverse: x"), None);
        assert_eq!(extract_sheet_name("no labels here"), None);
    }
}
