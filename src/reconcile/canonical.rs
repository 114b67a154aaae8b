//! Name canonicalization for cross-run identity
//!
//! Ids are not comparable across extraction runs, so names act as the join
//! key. A name is first canonicalized (timing fragment split off, case and
//! whitespace folded), then optionally matched against already-seen keys
//! by edit-distance similarity.

use regex_lite::Regex;
use std::sync::OnceLock;

fn timing_fragment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+?)\s*\(([^()]+)\)\s*$").expect("timing fragment pattern is valid")
    })
}

/// Split `"Label (Timing)"` into `("Label", Some("Timing"))`.
///
/// Names without a trailing parenthetical come back unchanged.
pub fn split_timing(name: &str) -> (String, Option<String>) {
    let trimmed = name.trim();
    match timing_fragment_re().captures(trimmed) {
        Some(caps) => {
            let label = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let timing = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            if label.is_empty() || timing.is_empty() {
                (trimmed.to_string(), None)
            } else {
                (label.to_string(), Some(timing.to_string()))
            }
        }
        None => (trimmed.to_string(), None),
    }
}

/// Case- and whitespace-folded key of a name.
pub fn canonical_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Similarity in `0.0..=1.0` from character-level Levenshtein distance.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// The digit runs of a name, in order ("Visit 10 Day 3" gives ["10", "3"]).
fn digit_runs(name: &str) -> Vec<&str> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Single-character words of a name, in order ("hepatitis b serology"
/// gives ["b"]).
fn letter_tokens(name: &str) -> Vec<&str> {
    name.split_whitespace()
        .filter(|w| w.chars().count() == 1)
        .collect()
}

/// True when two keys may be joined by similarity at all.
///
/// Digit runs and single-letter words are what tells otherwise identical
/// names apart ("Visit 1" / "Visit 2", "Hepatitis B" / "Hepatitis C"), so
/// they must agree exactly.
fn fuzzy_compatible(a: &str, b: &str) -> bool {
    digit_runs(a) == digit_runs(b) && letter_tokens(a) == letter_tokens(b)
}

/// Assigns each incoming key to an existing key when similar enough.
///
/// Names differing in a number or a single-letter word never match.
#[derive(Debug, Clone)]
pub struct NameResolver {
    threshold: f64,
    keys: Vec<String>,
}

impl NameResolver {
    /// `threshold >= 1.0` disables fuzzy matching.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            keys: Vec::new(),
        }
    }

    /// Map `key` to the key it should merge with, registering it if new.
    pub fn resolve(&mut self, key: &str) -> String {
        if self.keys.iter().any(|k| k == key) {
            return key.to_string();
        }
        if self.threshold < 1.0 {
            let best = self
                .keys
                .iter()
                .filter(|k| fuzzy_compatible(k, key))
                .map(|k| (k, similarity(k, key)))
                .filter(|(_, score)| *score >= self.threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((matched, score)) = best {
                tracing::debug!(incoming = key, matched = %matched, score, "fuzzy name match");
                return matched.clone();
            }
        }
        self.keys.push(key.to_string());
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_fragment_is_split() {
        assert_eq!(
            split_timing("Visit 3 (Week 4)"),
            ("Visit 3".to_string(), Some("Week 4".to_string()))
        );
        assert_eq!(split_timing("  Visit 3  "), ("Visit 3".to_string(), None));
        assert_eq!(
            split_timing("Screening (Day -28 to -1)"),
            ("Screening".to_string(), Some("Day -28 to -1".to_string()))
        );
    }

    #[test]
    fn bare_parenthetical_is_left_alone() {
        assert_eq!(split_timing("(Week 4)"), ("(Week 4)".to_string(), None));
    }

    #[test]
    fn canonical_key_folds_case_and_whitespace() {
        assert_eq!(canonical_key("  Vital   Signs "), "vital signs");
        assert_eq!(canonical_key("VITAL SIGNS"), "vital signs");
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("vital sign", "vital signs") - (1.0 - 1.0 / 11.0)).abs() < 1e-9);
    }

    #[test]
    fn resolver_merges_near_duplicates() {
        let mut r = NameResolver::new(0.9);
        assert_eq!(r.resolve("vital signs"), "vital signs");
        assert_eq!(r.resolve("vital sign"), "vital signs");
    }

    #[test]
    fn resolver_never_merges_different_numbers() {
        let mut r = NameResolver::new(0.5);
        assert_eq!(r.resolve("visit 10"), "visit 10");
        assert_eq!(r.resolve("visit 11"), "visit 11");
        assert_eq!(r.resolve("visit 100"), "visit 100");
    }

    #[test]
    fn resolver_never_merges_different_letter_words() {
        let mut r = NameResolver::new(0.5);
        assert_eq!(r.resolve("hepatitis b serology"), "hepatitis b serology");
        assert_eq!(r.resolve("hepatitis c serology"), "hepatitis c serology");
        assert_eq!(r.resolve("hepatitis serology"), "hepatitis serology");
        assert_eq!(r.resolve("hepatitis b serologies"), "hepatitis b serology");
    }

    #[test]
    fn exact_threshold_disables_fuzzy_matching() {
        let mut r = NameResolver::new(1.0);
        r.resolve("vital signs");
        assert_eq!(r.resolve("vital sign"), "vital sign");
    }
}
