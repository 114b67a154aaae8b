//! Alias-aware id comparison
//!
//! Extraction runs spell the same id differently (`act-1` vs `act_1`,
//! `enc_7` vs `encounter_7`). Ids are compared on a normalized form, and
//! encounter ids additionally match on their trailing visit number.

use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn encounter_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:enc|encounter|enc_visit|visit)_?(\d+)$")
            .expect("encounter suffix pattern is valid")
    })
}

/// Normalized comparison form of an id: trimmed, lowercased, `-` folded
/// into `_`.
pub fn normalize_id(id: &str) -> String {
    id.trim().replace('-', "_").to_lowercase()
}

/// True when two ids are the same after normalization.
pub fn ids_match(a: &str, b: &str) -> bool {
    normalize_id(a) == normalize_id(b)
}

/// Visit number of an encounter-style id (`enc_7`, `encounter-7`,
/// `enc_visit_7`, `visit7` all give 7).
pub fn encounter_number(id: &str) -> Option<u64> {
    let normalized = normalize_id(id);
    encounter_suffix_re()
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Lookup table from any accepted alias to the id as it appears in the graph.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    exact: HashMap<String, String>,
    numbered: HashMap<u64, String>,
}

impl AliasIndex {
    /// Index plain ids (normalization only).
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = Self::default();
        for id in ids {
            index.exact.entry(normalize_id(id)).or_insert_with(|| id.to_string());
        }
        index
    }

    /// Index encounter ids, also accepting visit-number aliases.
    pub fn for_encounters<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = Self::default();
        for id in ids {
            index.exact.entry(normalize_id(id)).or_insert_with(|| id.to_string());
            if let Some(n) = encounter_number(id) {
                index.numbered.entry(n).or_insert_with(|| id.to_string());
            }
        }
        index
    }

    /// The indexed id that `reference` resolves to, if any.
    pub fn resolve(&self, reference: &str) -> Option<&str> {
        if let Some(id) = self.exact.get(&normalize_id(reference)) {
            return Some(id.as_str());
        }
        if self.numbered.is_empty() {
            return None;
        }
        encounter_number(reference)
            .and_then(|n| self.numbered.get(&n))
            .map(String::as_str)
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.resolve(reference).is_some()
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphen_and_underscore_are_equivalent() {
        assert!(ids_match("act-1", "act_1"));
        assert!(ids_match("act_1", "act-1"));
        assert!(!ids_match("act_1", "act_2"));
        assert!(ids_match("ACT-1", "act_1"));
    }

    #[test]
    fn encounter_numbers_are_extracted() {
        assert_eq!(encounter_number("enc_7"), Some(7));
        assert_eq!(encounter_number("encounter_7"), Some(7));
        assert_eq!(encounter_number("enc_visit_7"), Some(7));
        assert_eq!(encounter_number("ENC-12"), Some(12));
        assert_eq!(encounter_number("visit3"), Some(3));
        assert_eq!(encounter_number("act_7"), None);
        assert_eq!(encounter_number("enc_7b"), None);
    }

    #[test]
    fn encounter_index_accepts_numbered_aliases() {
        let index = AliasIndex::for_encounters(["enc_7", "enc_8"]);
        assert_eq!(index.resolve("encounter_7"), Some("enc_7"));
        assert_eq!(index.resolve("enc_visit_8"), Some("enc_8"));
        assert_eq!(index.resolve("enc-7"), Some("enc_7"));
        assert_eq!(index.resolve("enc_9"), None);
    }

    #[test]
    fn plain_index_ignores_numbered_aliases() {
        let index = AliasIndex::new(["enc_7"]);
        assert!(index.contains("enc-7"));
        assert!(!index.contains("encounter_7"));
    }
}
