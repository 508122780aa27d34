//! Rule replay against a parsed document
//!
//! Two strategies:
//! - selector-based: widen through descendant queries level by level, then
//!   pick the recorded sibling on the last level
//! - index-based: strict child-by-child descent using recorded positions
//!
//! Recorded positions are clamped to what the live document offers, so a
//! shrunken sibling list selects its last element instead of failing.

use std::collections::{HashMap, HashSet};

use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node};

use crate::stack::{ExtractTarget, Stack};
use crate::text_match::{normalize, url_join};

/// One extracted value and where its element sits in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub text: Option<String>,
    pub source_index: usize,
}

impl MatchResult {
    pub fn is_blank(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
    }
}

/// Document-order position of every element, keyed by node id.
#[derive(Debug, Default)]
pub struct DocumentOrder {
    positions: HashMap<NodeId, usize>,
}

impl DocumentOrder {
    pub fn new(document: &Html) -> Self {
        let positions = document
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .enumerate()
            .map(|(position, element)| (element.id(), position))
            .collect();
        DocumentOrder { positions }
    }

    pub fn position(&self, element: ElementRef<'_>) -> usize {
        self.positions.get(&element.id()).copied().unwrap_or(usize::MAX)
    }
}

/// Knobs shared by both replay strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Keep matches whose value is missing or empty.
    pub keep_blank: bool,
    /// Selector-based only: keep every match on the last level instead of
    /// narrowing to the recorded sibling.
    pub contain_sibling_leaves: bool,
}

/// Selector-based replay.
pub fn match_similar(
    stack: &Stack,
    document: &Html,
    url: &str,
    attr_fuzz_ratio: f64,
    options: ReplayOptions,
    order: &DocumentOrder,
) -> Vec<MatchResult> {
    let last = stack.content.len().saturating_sub(1);
    let mut parents: Vec<NodeRef<'_, Node>> = vec![document.tree.root()];

    for (level, segment) in stack.content.iter().enumerate() {
        let query = segment.query(attr_fuzz_ratio);
        let mut seen = HashSet::new();
        let mut next = Vec::new();

        for parent in &parents {
            let mut found = query.descendants(*parent);
            if found.is_empty() {
                continue;
            }
            if level == last && !options.contain_sibling_leaves {
                let index = clamp(segment.index.unwrap_or(0), found.len());
                found = vec![found[index]];
            }
            next.extend(found.into_iter().filter(|el| seen.insert(el.id())));
        }

        if next.is_empty() {
            return Vec::new();
        }
        parents = next.into_iter().map(|el| *el).collect();
    }

    let target = stack.target();
    parents
        .into_iter()
        .filter_map(ElementRef::wrap)
        .map(|element| MatchResult {
            text: extract_value(element, &target, url),
            source_index: order.position(element),
        })
        .filter(|result| options.keep_blank || !result.is_blank())
        .collect()
}

/// Index-based replay. Yields at most one result.
pub fn match_exact(
    stack: &Stack,
    document: &Html,
    url: &str,
    attr_fuzz_ratio: f64,
    options: ReplayOptions,
    order: &DocumentOrder,
) -> Vec<MatchResult> {
    let mut current = document.root_element();

    for segment in stack.content.iter().skip(1) {
        let found = segment.query(attr_fuzz_ratio).children(current);
        if found.is_empty() {
            return Vec::new();
        }
        current = found[clamp(segment.index.unwrap_or(0), found.len())];
    }

    let result = MatchResult {
        text: extract_value(current, &stack.target(), url),
        source_index: order.position(current),
    };
    if result.is_blank() && !options.keep_blank {
        return Vec::new();
    }
    vec![result]
}

/// Selector-based replay, falling back to index-based when it finds nothing.
pub fn match_any(
    stack: &Stack,
    document: &Html,
    url: &str,
    attr_fuzz_ratio: f64,
    options: ReplayOptions,
    order: &DocumentOrder,
) -> Vec<MatchResult> {
    let results = match_similar(stack, document, url, attr_fuzz_ratio, options, order);
    if !results.is_empty() {
        return results;
    }
    match_exact(stack, document, url, attr_fuzz_ratio, options, order)
}

fn clamp(index: usize, available: usize) -> usize {
    index.min(available - 1)
}

/// Pull the value a rule asks for out of a matched element.
///
/// Text is always present (possibly empty); a missing attribute is `None`.
pub fn extract_value(element: ElementRef<'_>, target: &ExtractTarget, url: &str) -> Option<String> {
    match &target.wanted_attr {
        None if target.is_non_rec_text => Some(non_rec_text(element)),
        None => Some(normalize(&element.text().collect::<String>())),
        Some(attr) => {
            let value = element.value().attr(attr)?;
            if target.is_full_url {
                Some(url_join(url, value))
            } else {
                Some(value.to_string())
            }
        }
    }
}

/// Concatenated direct text children, trimmed.
pub fn non_rec_text(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text())
        .map(|text| &**text)
        .collect::<String>()
        .trim()
        .to_string()
}
