//! Rule records ("stacks")
//!
//! A stack is the root-to-target path of a matched element plus what to pull
//! out of it. Segments serialize as `[tag, {attrs}]` for the root and
//! `[tag, {attrs}, index]` for every level below it.

use std::collections::BTreeMap;

use ego_tree::NodeRef;
use rand::distr::Alphanumeric;
use rand::Rng;
use scraper::{ElementRef, Node};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::text_match::AttributeMatch;

/// Attributes kept in a fingerprint. Ids and data attributes are left out
/// so rules survive across pages of the same template.
pub const FINGERPRINT_ATTRS: &[&str] = &["class", "style"];

/// Fingerprint attribute name -> value; absent attributes map to `""`.
pub type Fingerprint = BTreeMap<String, String>;

/// Build the fingerprint of an element.
pub fn fingerprint(element: ElementRef<'_>) -> Fingerprint {
    FINGERPRINT_ATTRS
        .iter()
        .map(|name| {
            let value = element.value().attr(name).unwrap_or_default();
            (name.to_string(), value.to_string())
        })
        .collect()
}

/// One level of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SegmentRepr", into = "SegmentRepr")]
pub struct Segment {
    pub tag: String,
    pub attrs: Fingerprint,
    /// Position among the parent's children matching this segment's
    /// tag and fingerprint. `None` for the root.
    pub index: Option<usize>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SegmentRepr {
    Indexed(String, Fingerprint, usize),
    Root(String, Fingerprint),
}

impl From<SegmentRepr> for Segment {
    fn from(repr: SegmentRepr) -> Self {
        match repr {
            SegmentRepr::Indexed(tag, attrs, index) => Segment { tag, attrs, index: Some(index) },
            SegmentRepr::Root(tag, attrs) => Segment { tag, attrs, index: None },
        }
    }
}

impl From<Segment> for SegmentRepr {
    fn from(segment: Segment) -> Self {
        match segment.index {
            Some(index) => SegmentRepr::Indexed(segment.tag, segment.attrs, index),
            None => SegmentRepr::Root(segment.tag, segment.attrs),
        }
    }
}

impl Segment {
    pub fn new(element: ElementRef<'_>, index: Option<usize>) -> Self {
        Segment {
            tag: element.value().name().to_string(),
            attrs: fingerprint(element),
            index,
        }
    }

    /// CSS rendering: `tag[attr="value"]` for every non-empty entry.
    pub fn selector(&self) -> String {
        let mut selector = self.tag.clone();
        for (name, value) in &self.attrs {
            if !value.is_empty() {
                selector.push_str(&format!(r#"[{}="{}"]"#, name, escape_css_string(value)));
            }
        }
        selector
    }

    /// Element predicate for this segment; `ratio < 1.0` compares
    /// attribute values fuzzily.
    pub fn query(&self, ratio: f64) -> SegmentQuery<'_> {
        SegmentQuery {
            tag: &self.tag,
            attrs: self
                .attrs
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name.as_str(), AttributeMatch::new(value, ratio)))
                .collect(),
        }
    }
}

fn escape_css_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Tag plus attribute constraints, evaluated against live elements.
#[derive(Debug, Clone)]
pub struct SegmentQuery<'a> {
    tag: &'a str,
    attrs: Vec<(&'a str, AttributeMatch)>,
}

impl SegmentQuery<'_> {
    pub fn matches(&self, element: ElementRef<'_>) -> bool {
        element.value().name() == self.tag
            && self.attrs.iter().all(|(name, expected)| {
                element
                    .value()
                    .attr(name)
                    .is_some_and(|actual| expected.matches(actual))
            })
    }

    /// Matching descendants of `scope`, in document order, excluding `scope`.
    pub fn descendants<'t>(&self, scope: NodeRef<'t, Node>) -> Vec<ElementRef<'t>> {
        scope
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(|el| self.matches(*el))
            .collect()
    }

    /// Matching direct element children of `parent`, in document order.
    pub fn children<'t>(&self, parent: ElementRef<'t>) -> Vec<ElementRef<'t>> {
        parent
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|el| self.matches(*el))
            .collect()
    }
}

/// What a rule extracts from the element it lands on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractTarget {
    /// Attribute to read; `None` reads text.
    pub wanted_attr: Option<String>,
    /// Resolve the attribute value against the effective URL.
    pub is_full_url: bool,
    /// Only the element's own text nodes, not its subtree.
    pub is_non_rec_text: bool,
}

/// A learned extraction rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub content: Vec<Segment>,
    #[serde(default)]
    pub wanted_attr: Option<String>,
    #[serde(default)]
    pub is_full_url: bool,
    #[serde(default)]
    pub is_non_rec_text: bool,
    /// Source URL, recorded for full-URL rules only.
    #[serde(default)]
    pub url: String,
    pub hash: String,
    pub stack_id: String,
    #[serde(default)]
    pub alias: String,
}

impl Stack {
    pub fn new(content: Vec<Segment>, target: ExtractTarget, source_url: &str) -> Self {
        let url = if target.is_full_url {
            source_url.to_string()
        } else {
            String::new()
        };
        let hash = structural_hash(&content, &target, &url);

        Stack {
            content,
            wanted_attr: target.wanted_attr,
            is_full_url: target.is_full_url,
            is_non_rec_text: target.is_non_rec_text,
            url,
            hash,
            stack_id: new_stack_id(),
            alias: String::new(),
        }
    }

    pub fn target(&self) -> ExtractTarget {
        ExtractTarget {
            wanted_attr: self.wanted_attr.clone(),
            is_full_url: self.is_full_url,
            is_non_rec_text: self.is_non_rec_text,
        }
    }

    /// Child-combinator path, e.g. `html > body > div[class="x"]`.
    pub fn css_selector(&self) -> String {
        self.content
            .iter()
            .map(Segment::selector)
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

fn structural_hash(content: &[Segment], target: &ExtractTarget, url: &str) -> String {
    let fields = (
        content,
        &target.wanted_attr,
        target.is_full_url,
        target.is_non_rec_text,
        url,
    );
    let json = serde_json::to_string(&fields).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// `rule_` plus four random alphanumerics.
pub fn new_stack_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!("rule_{}", suffix)
}
