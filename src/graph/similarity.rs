//! Trigram name similarity
//!
//! Matches the behaviour of PostgreSQL's `pg_trgm.similarity`: each word is
//! lowercased, padded with two leading spaces and one trailing space, and cut
//! into three-character windows. Similarity is the number of shared trigrams
//! over the size of the union.

use std::collections::BTreeSet;

fn trigrams(text: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word.to_lowercase()).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Similarity in `[0, 1]`; 1 for identical (case-insensitive) names.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}
