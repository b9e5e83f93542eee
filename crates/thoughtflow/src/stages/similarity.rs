//! Text similarity helpers shared by the evidence, pruning, and bridge logic.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn stopwords() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "been",
            "have", "has", "had", "will", "would", "could", "should", "about", "into", "through",
            "between",
        ]
        .into_iter()
        .collect()
    })
}

/// Lowercased alphanumeric tokens of a text.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokens with short words and the closed stopword set removed.
#[must_use]
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.len() > 3 && !stopwords().contains(t.as_str()))
        .collect()
}

/// Jaccard similarity over the word sets of two labels.
#[must_use]
pub fn word_jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();
    set_jaccard(&set_a, &set_b)
}

/// Jaccard similarity over two tag sets.
#[must_use]
pub fn tag_jaccard(a: &[String], b: &[String]) -> f64 {
    let set_a: HashSet<String> = a.iter().map(|t| t.to_lowercase()).collect();
    let set_b: HashSet<String> = b.iter().map(|t| t.to_lowercase()).collect();
    set_jaccard(&set_a, &set_b)
}

fn set_jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Cosine similarity over term-frequency vectors of two labels.
#[must_use]
pub fn label_cosine(a: &str, b: &str) -> f64 {
    let freq_a = term_frequencies(a);
    let freq_b = term_frequencies(b);
    if freq_a.is_empty() || freq_b.is_empty() {
        return 0.0;
    }

    let dot: f64 = freq_a
        .iter()
        .filter_map(|(term, fa)| freq_b.get(term).map(|fb| fa * fb))
        .sum();
    let norm_a: f64 = freq_a.values().map(|f| f * f).sum::<f64>().sqrt();
    let norm_b: f64 = freq_b.values().map(|f| f * f).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut freq = HashMap::new();
    for token in content_tokens(text) {
        *freq.entry(token).or_insert(0.0) += 1.0;
    }
    freq
}

/// Share of a hypothesis's content tokens that also appear in the evidence
/// text, in [0, 1].
#[must_use]
pub fn overlap_ratio(hypothesis: &str, evidence: &str) -> f64 {
    let hyp: HashSet<String> = content_tokens(hypothesis).into_iter().collect();
    if hyp.is_empty() {
        return 0.0;
    }
    let ev: HashSet<String> = content_tokens(evidence).into_iter().collect();
    hyp.intersection(&ev).count() as f64 / hyp.len() as f64
}
