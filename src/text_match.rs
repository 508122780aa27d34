//! Exact and fuzzy string comparison
//!
//! The fuzzy score counts characters covered by recursively found longest
//! common substrings and divides by the longer input's length.

use url::Url;

/// Compare two strings. A ratio of `1.0` (or more) requires exact equality,
/// anything lower accepts when `similarity(a, b) >= ratio`.
pub fn text_match(a: &str, b: &str, ratio: f64) -> bool {
    if ratio >= 1.0 {
        return a == b;
    }
    similarity(a, b) >= ratio
}

/// Similarity score in `[0, 1]`; two empty strings score `1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    matching_chars(&a, &b) as f64 / longest as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let Some((pos_a, pos_b, len)) = longest_common_block(a, b) else {
        return 0;
    };
    len + matching_chars(&a[..pos_a], &b[..pos_b])
        + matching_chars(&a[pos_a + len..], &b[pos_b + len..])
}

/// Longest common substring as `(start in a, start in b, length)`.
/// Earliest block wins on ties.
fn longest_common_block(a: &[char], b: &[char]) -> Option<(usize, usize, usize)> {
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let mut best: Option<(usize, usize, usize)> = None;
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            cur[j] = if a[i - 1] == b[j - 1] { prev[j - 1] + 1 } else { 0 };
            let len = cur[j];
            if len > best.map_or(0, |(_, _, l)| l) {
                best = Some((i - len, j - len, len));
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    best
}

/// Collapse every whitespace run to a single space and trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `value` against `base`. Values that already carry a scheme are
/// returned as-is, everything else is joined with exactly one `/`.
pub fn url_join(base: &str, value: &str) -> String {
    if Url::parse(value).is_ok() {
        return value.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        value.trim_start_matches('/')
    )
}

/// Attribute value used when querying for a rule segment.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeMatch {
    Exact(String),
    Fuzzy(String, f64),
}

impl AttributeMatch {
    /// Empty values never go fuzzy: an empty fingerprint entry means
    /// "attribute not constrained".
    pub fn new(value: &str, ratio: f64) -> Self {
        if ratio < 1.0 && !value.is_empty() {
            AttributeMatch::Fuzzy(value.to_string(), ratio)
        } else {
            AttributeMatch::Exact(value.to_string())
        }
    }

    pub fn value(&self) -> &str {
        match self {
            AttributeMatch::Exact(v) | AttributeMatch::Fuzzy(v, _) => v,
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            AttributeMatch::Exact(v) => v == candidate,
            AttributeMatch::Fuzzy(v, ratio) => text_match(v, candidate, *ratio),
        }
    }
}
