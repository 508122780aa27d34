//! Build and extract orchestration
//!
//! `build` learns rules from example values found in a document;
//! `get_result*` replays every stored rule against a document and merges
//! what they find.

use std::collections::HashSet;
use std::path::Path;

use scraper::{ElementRef, Html};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, info};

use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::fetch::{Fetcher, RequestArgs};
use crate::matcher::{
    match_any, match_exact, match_similar, non_rec_text, DocumentOrder, MatchResult, ReplayOptions,
};
use crate::path_builder::{build_stack, parent_element};
use crate::rules::RuleSet;
use crate::stack::{ExtractTarget, Stack};
use crate::text_match::{normalize, text_match, url_join};

/// Where a document comes from.
#[derive(Debug, Clone)]
pub enum DocumentSource<'a> {
    /// Fetch over HTTP.
    Url { url: &'a str, args: RequestArgs },
    /// Markup already in hand; `url` resolves relative links. Empty markup
    /// with a URL falls back to fetching that URL.
    Html { markup: &'a str, url: Option<&'a str> },
}

impl<'a> DocumentSource<'a> {
    pub fn url(url: &'a str) -> Self {
        DocumentSource::Url { url, args: RequestArgs::default() }
    }

    pub fn html(markup: &'a str) -> Self {
        DocumentSource::Html { markup, url: None }
    }

    pub fn html_with_url(markup: &'a str, url: &'a str) -> Self {
        DocumentSource::Html { markup, url: Some(url) }
    }
}

/// Example values to learn rules from.
#[derive(Debug, Clone)]
pub enum Wanted {
    /// Values under the empty alias.
    List(Vec<String>),
    /// Values per alias, in the given alias order.
    Aliased(Vec<(String, Vec<String>)>),
}

impl Wanted {
    fn into_groups(self) -> Vec<(String, Vec<String>)> {
        match self {
            Wanted::List(values) => vec![(String::new(), values)],
            Wanted::Aliased(groups) => groups,
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for Wanted {
    fn from(values: Vec<S>) -> Self {
        Wanted::List(values.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Append to the existing rules instead of replacing them.
    pub update: bool,
    /// Similarity required between a wanted value and page content.
    pub text_fuzz_ratio: f64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions { update: false, text_fuzz_ratio: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Grouping {
    #[default]
    None,
    ByRuleId,
    ByAlias,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub grouping: Grouping,
    /// Drop repeated values; `None` means on when ungrouped, off when grouped.
    pub unique: Option<bool>,
    pub attr_fuzz_ratio: f64,
    pub keep_blank: bool,
    /// Sort values by document position. Alias groups are always sorted.
    pub keep_order: bool,
    /// Selector-based replay only.
    pub contain_sibling_leaves: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            grouping: Grouping::None,
            unique: None,
            attr_fuzz_ratio: 1.0,
            keep_blank: false,
            keep_order: false,
            contain_sibling_leaves: false,
        }
    }
}

/// Extracted values, merged or bucketed per rule id / alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Flat(Vec<String>),
    /// Groups in first-seen order.
    Grouped(Vec<(String, Vec<String>)>),
}

impl Extraction {
    pub fn as_flat(&self) -> Option<&[String]> {
        match self {
            Extraction::Flat(values) => Some(values),
            Extraction::Grouped(_) => None,
        }
    }

    pub fn group(&self, key: &str) -> Option<&[String]> {
        match self {
            Extraction::Grouped(groups) => groups
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, values)| values.as_slice()),
            Extraction::Flat(_) => None,
        }
    }
}

/// Flat values serialize as an array, groups as an object in group order.
impl Serialize for Extraction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Extraction::Flat(values) => values.serialize(serializer),
            Extraction::Grouped(groups) => {
                let mut map = serializer.serialize_map(Some(groups.len()))?;
                for (key, values) in groups {
                    map.serialize_entry(key, values)?;
                }
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Similar,
    Exact,
}

/// Parse markup after collapsing whitespace runs.
pub fn parse_markup(markup: &str) -> Html {
    Html::parse_document(&normalize(markup))
}

/// Learns and replays extraction rules.
pub struct Scraper {
    rules: RuleSet,
    fetcher: Fetcher,
}

impl Scraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self::with_rules(config, RuleSet::default())
    }

    pub fn with_rules(config: ScraperConfig, rules: RuleSet) -> Self {
        Scraper { rules, fetcher: Fetcher::new(&config) }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Direct access for filtering and alias assignment.
    pub fn rules_mut(&mut self) -> &mut RuleSet {
        &mut self.rules
    }

    pub fn set_rules(&mut self, rules: RuleSet) {
        self.rules = rules;
    }

    pub fn css_selector(&self) -> String {
        self.rules.css_selector()
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.rules = RuleSet::load(path)?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.rules.save(path)
    }

    /// Parse the source into a document, fetching when needed. Returns the
    /// document and the URL it is associated with, if any.
    pub fn document(&self, source: &DocumentSource<'_>) -> Result<(Html, Option<String>)> {
        match source {
            DocumentSource::Url { url, args } => {
                if url.is_empty() {
                    return Err(ScrapeError::NoDocument);
                }
                let markup = self.fetcher.fetch(url, args)?;
                Ok((parse_markup(&markup), Some(url.to_string())))
            }
            DocumentSource::Html { markup, url } => {
                if !markup.trim().is_empty() {
                    return Ok((parse_markup(markup), url.map(str::to_string)));
                }
                match url {
                    Some(url) if !url.is_empty() => {
                        self.document(&DocumentSource::url(url))
                    }
                    _ => Err(ScrapeError::NoDocument),
                }
            }
        }
    }

    /// Learn rules for every wanted value and return what those rules
    /// extract from the same document.
    pub fn build(
        &mut self,
        source: &DocumentSource<'_>,
        wanted: impl Into<Wanted>,
        options: BuildOptions,
    ) -> Result<Vec<String>> {
        let (document, url) = self.document(source)?;
        let url = url.unwrap_or_default();
        let order = DocumentOrder::new(&document);

        if !options.update {
            self.rules.clear();
        }

        let mut values = Vec::new();
        for (alias, items) in wanted.into().into_groups() {
            for item in &items {
                let item = normalize(item);
                let candidates = find_candidates(&document, &item, &url, options.text_fuzz_ratio);
                debug!(wanted = %item, candidates = candidates.len(), "Matched wanted value");

                for (element, target) in candidates {
                    let mut stack = build_stack(element, target, &url);
                    stack.alias = alias.clone();

                    let results =
                        match_any(&stack, &document, &url, 1.0, ReplayOptions::default(), &order);
                    values.extend(results.into_iter().filter_map(|r| r.text));
                    self.rules.push(stack);
                }
            }
        }

        self.rules.dedup();
        let values = unique(values);
        info!(rules = self.rules.len(), values = values.len(), "Built rules");
        Ok(values)
    }

    /// Selector-based extraction.
    pub fn get_result_similar(
        &self,
        source: &DocumentSource<'_>,
        options: &ExtractOptions,
    ) -> Result<Extraction> {
        let (document, url) = self.document(source)?;
        Ok(self.extract(&document, url.as_deref(), Strategy::Similar, options))
    }

    /// Index-based extraction.
    pub fn get_result_exact(
        &self,
        source: &DocumentSource<'_>,
        options: &ExtractOptions,
    ) -> Result<Extraction> {
        let (document, url) = self.document(source)?;
        Ok(self.extract(&document, url.as_deref(), Strategy::Exact, options))
    }

    /// Both strategies over one fetch, as `(similar, exact)`.
    pub fn get_result(
        &self,
        source: &DocumentSource<'_>,
        options: &ExtractOptions,
    ) -> Result<(Extraction, Extraction)> {
        let (document, url) = self.document(source)?;
        let similar = self.extract(&document, url.as_deref(), Strategy::Similar, options);
        let exact = self.extract(&document, url.as_deref(), Strategy::Exact, options);
        Ok((similar, exact))
    }

    fn extract(
        &self,
        document: &Html,
        url: Option<&str>,
        strategy: Strategy,
        options: &ExtractOptions,
    ) -> Extraction {
        let order = DocumentOrder::new(document);
        let replay = ReplayOptions {
            keep_blank: options.keep_blank,
            contain_sibling_leaves: options.contain_sibling_leaves,
        };

        let mut flat = Vec::new();
        let mut groups: Vec<(String, Vec<MatchResult>)> = Vec::new();

        for stack in &self.rules {
            let url = effective_url(url, stack);
            let ratio = options.attr_fuzz_ratio;
            let results = match strategy {
                Strategy::Similar => match_similar(stack, document, url, ratio, replay, &order),
                Strategy::Exact => match_exact(stack, document, url, ratio, replay, &order),
            };
            debug!(stack_id = %stack.stack_id, matches = results.len(), "Replayed rule");

            let key = match options.grouping {
                Grouping::None => {
                    flat.extend(results);
                    continue;
                }
                Grouping::ByRuleId => &stack.stack_id,
                Grouping::ByAlias => &stack.alias,
            };
            match groups.iter_mut().find(|(k, _)| k == key) {
                Some((_, bucket)) => bucket.extend(results),
                None => groups.push((key.clone(), results)),
            }
        }

        if options.grouping == Grouping::None {
            return Extraction::Flat(clean(flat, options.keep_order, options.unique.unwrap_or(true)));
        }

        let sort = options.keep_order || options.grouping == Grouping::ByAlias;
        let unique_values = options.unique.unwrap_or(false);
        Extraction::Grouped(
            groups
                .into_iter()
                .map(|(key, results)| (key, clean(results, sort, unique_values)))
                .collect(),
        )
    }
}

/// The caller's URL when given, else the one stored with the rule.
fn effective_url<'a>(url: Option<&'a str>, stack: &'a Stack) -> &'a str {
    match url {
        Some(url) if !url.is_empty() => url,
        _ => &stack.url,
    }
}

fn clean(mut results: Vec<MatchResult>, sort: bool, unique_values: bool) -> Vec<String> {
    if sort {
        results.sort_by_key(|r| r.source_index);
    }
    let values: Vec<String> = results
        .into_iter()
        .map(|r| r.text.unwrap_or_default())
        .collect();
    if unique_values {
        unique(values)
    } else {
        values
    }
}

/// Drop repeats, keeping first occurrences in order.
fn unique(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Every element carrying `wanted`, deepest first, with what to extract
/// from it.
pub fn find_candidates<'a>(
    document: &'a Html,
    wanted: &str,
    url: &str,
    ratio: f64,
) -> Vec<(ElementRef<'a>, ExtractTarget)> {
    let mut candidates: Vec<_> = document
        .tree
        .root()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|element| match_target(element, wanted, url, ratio).map(|t| (element, t)))
        .collect();
    candidates.reverse();
    candidates
}

/// How `element` carries `wanted`, if it does: its full text, its own
/// text nodes, or one of its attributes (`href`/`src` also tried as full
/// URLs).
pub fn match_target(
    element: ElementRef<'_>,
    wanted: &str,
    url: &str,
    ratio: f64,
) -> Option<ExtractTarget> {
    // The root element spans the whole page; it never makes a rule.
    let parent = parent_element(element)?;

    let text = normalize(&element.text().collect::<String>());
    if text_match(wanted, &text, ratio) {
        // A container repeating a deeper element's text is not the match.
        let parent_text = normalize(&parent.text().collect::<String>());
        let ancestors = element.ancestors().filter_map(ElementRef::wrap).count();
        if parent_text == text && ancestors > 1 {
            return None;
        }
        return Some(ExtractTarget::default());
    }

    if text_match(wanted, &non_rec_text(element), ratio) {
        return Some(ExtractTarget {
            is_non_rec_text: true,
            ..Default::default()
        });
    }

    for (name, value) in element.value().attrs() {
        let value = value.trim();
        if text_match(wanted, value, ratio) {
            return Some(ExtractTarget {
                wanted_attr: Some(name.to_string()),
                ..Default::default()
            });
        }
        if matches!(name, "href" | "src") && text_match(wanted, &url_join(url, value), ratio) {
            return Some(ExtractTarget {
                wanted_attr: Some(name.to_string()),
                is_full_url: true,
                ..Default::default()
            });
        }
    }

    None
}
