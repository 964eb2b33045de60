use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("non-word pattern is valid"));

/// Lowercases and strips every character that is neither a word character nor whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    NON_WORD.replace_all(&text.to_lowercase(), "").into_owned()
}

/// Splits normalised text on whitespace, dropping empty tokens.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Number of tokens in `text`.
#[must_use]
pub fn word_count(text: &str) -> usize {
    normalize(text).split_whitespace().count()
}

/// Jaccard similarity of the token sets, `|A ∩ B| / |A ∪ B|`. Zero when both are empty.
#[must_use]
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let left: HashSet<String> = tokenize(a).into_iter().collect();
    let right: HashSet<String> = tokenize(b).into_iter().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    shared as f32 / union as f32
}

/// Topic key as prose: `pain_points` becomes `pain points`.
#[must_use]
pub fn humanize_key(key: &str) -> String {
    key.replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_case() {
        assert_eq!(
            tokenize("Where are the BOTTLENECKS, in this process?"),
            vec!["where", "are", "the", "bottlenecks", "in", "this", "process"]
        );
        assert_eq!(tokenize("What's   slowing\nyou down?"), vec!["whats", "slowing", "you", "down"]);
    }

    #[test]
    fn punctuation_only_text_has_no_tokens() {
        assert!(tokenize(" ?! -- ").is_empty());
        assert_eq!(word_count("Not sure really."), 3);
    }

    #[test]
    fn jaccard_counts_shared_words() {
        let score = jaccard_similarity("approvals take days", "why do approvals take so long");
        assert!((score - 2.0 / 7.0).abs() < 1e-6);
        assert_eq!(jaccard_similarity("", "?"), 0.0);
    }

    #[test]
    fn humanize_replaces_underscores() {
        assert_eq!(humanize_key("current_process_steps"), "current process steps");
    }
}
