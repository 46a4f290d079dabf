//! Text normalization and tokenization helpers shared by records, blocking, and features.

use std::collections::BTreeSet;

/// URL fragments that carry no identifying signal.
const URL_STOPWORDS: &[&str] = &["http", "https", "www", "com", "org", "net", "html", "htm"];

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_inline_whitespace<T: AsRef<str>>(text: T) -> String {
    let mut normalized = String::new();
    let mut seen_space = false;
    for ch in text.as_ref().chars() {
        if ch.is_whitespace() {
            if !seen_space {
                normalized.push(' ');
                seen_space = true;
            }
        } else {
            normalized.push(ch);
            seen_space = false;
        }
    }
    normalized.trim().to_string()
}

/// Lowercased, whitespace-collapsed form used for exact name comparison.
pub fn normalize_name(name: &str) -> String {
    normalize_inline_whitespace(name.to_lowercase())
}

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokenize a URL, dropping scheme/host boilerplate.
pub fn tokenize_url(url: &str) -> BTreeSet<String> {
    tokenize(url)
        .into_iter()
        .filter(|token| !URL_STOPWORDS.contains(&token.as_str()))
        .collect()
}

/// Jaccard similarity of two token sets; `None` when both are empty.
pub fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> Option<f64> {
    let union = left.union(right).count();
    if union == 0 {
        return None;
    }
    let shared = left.intersection(right).count();
    Some(shared as f64 / union as f64)
}

/// Overlap coefficient (`|A ∩ B| / min(|A|, |B|)`); `None` when either side is empty.
pub fn overlap_coefficient(left: &BTreeSet<String>, right: &BTreeSet<String>) -> Option<f64> {
    let smaller = left.len().min(right.len());
    if smaller == 0 {
        return None;
    }
    let shared = left.intersection(right).count();
    Some(shared as f64 / smaller as f64)
}
