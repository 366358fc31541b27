//! Token-set similarity
//!
//! The only similarity primitive in the subsystem. Used by the manager's
//! merge decision and by the injector's algorithmic retrieval.

use std::collections::HashSet;

/// Lowercased alphanumeric tokens of `text`. Apostrophes inside words are
/// kept so "user's" stays one token.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Distinct tokens of `text`
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity `|A ∩ B| / |A ∪ B|` of the two token sets.
///
/// Two texts without any tokens are considered identical (1.0); one empty
/// side against a non-empty side yields 0.0.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let a = token_set(a);
    let b = token_set(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f32 / union as f32
}
