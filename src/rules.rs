//! Ordered rule collection and its file format

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScrapeError};
use crate::stack::Stack;

/// Ordered set of learned rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RuleFile")]
pub struct RuleSet {
    #[serde(rename = "stack_list")]
    stacks: Vec<Stack>,
}

/// Accepted on-disk shapes: the `stack_list` wrapper or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Wrapped { stack_list: Vec<Stack> },
    Legacy(Vec<Stack>),
}

impl From<RuleFile> for RuleSet {
    fn from(file: RuleFile) -> Self {
        match file {
            RuleFile::Wrapped { stack_list } => RuleSet { stacks: stack_list },
            RuleFile::Legacy(stacks) => RuleSet { stacks },
        }
    }
}

impl RuleSet {
    pub fn new(stacks: Vec<Stack>) -> Self {
        RuleSet { stacks }
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stack> {
        self.stacks.iter()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn get(&self, stack_id: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.stack_id == stack_id)
    }

    pub fn push(&mut self, stack: Stack) {
        self.stacks.push(stack);
    }

    pub fn clear(&mut self) {
        self.stacks.clear();
    }

    /// Drop later rules whose hash was already seen.
    pub fn dedup(&mut self) {
        let mut seen = HashSet::new();
        let before = self.stacks.len();
        self.stacks.retain(|s| seen.insert(s.hash.clone()));
        if self.stacks.len() != before {
            debug!(removed = before - self.stacks.len(), "Deduplicated rules");
        }
    }

    pub fn keep_rules<S: AsRef<str>>(&mut self, ids: &[S]) {
        self.stacks
            .retain(|s| ids.iter().any(|id| id.as_ref() == s.stack_id));
    }

    pub fn remove_rules<S: AsRef<str>>(&mut self, ids: &[S]) {
        self.stacks
            .retain(|s| !ids.iter().any(|id| id.as_ref() == s.stack_id));
    }

    /// Assign aliases by rule id; rules not named keep their alias.
    pub fn set_rule_aliases(&mut self, aliases: &HashMap<String, String>) {
        for stack in &mut self.stacks {
            if let Some(alias) = aliases.get(&stack.stack_id) {
                stack.alias = alias.clone();
            }
        }
    }

    /// All rules as one selector group.
    pub fn css_selector(&self) -> String {
        self.stacks
            .iter()
            .map(Stack::css_selector)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ScrapeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let rules = Self::from_json(&json)?;
        debug!(path = %path.display(), rules = rules.len(), "Loaded rule set");
        Ok(rules)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json_pretty()?).map_err(|source| ScrapeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), rules = self.len(), "Saved rule set");
        Ok(())
    }
}

impl Extend<Stack> for RuleSet {
    fn extend<I: IntoIterator<Item = Stack>>(&mut self, iter: I) {
        self.stacks.extend(iter);
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Stack;
    type IntoIter = std::slice::Iter<'a, Stack>;

    fn into_iter(self) -> Self::IntoIter {
        self.stacks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{ExtractTarget, Fingerprint, Segment};

    fn stack(id: &str, tag: &str) -> Stack {
        let content = vec![
            Segment { tag: "html".into(), attrs: Fingerprint::new(), index: None },
            Segment { tag: tag.into(), attrs: Fingerprint::new(), index: Some(0) },
        ];
        let mut stack = Stack::new(content, ExtractTarget::default(), "");
        stack.stack_id = id.into();
        stack
    }

    fn ids(rules: &RuleSet) -> Vec<&str> {
        rules.iter().map(|s| s.stack_id.as_str()).collect()
    }

    #[test]
    fn test_remove_rules() {
        let mut rules = RuleSet::new(vec![stack("rule_1", "p"), stack("rule_2", "a")]);
        rules.remove_rules(&["rule_1"]);
        assert_eq!(ids(&rules), vec!["rule_2"]);
    }

    #[test]
    fn test_keep_rules() {
        let mut rules = RuleSet::new(vec![stack("rule_1", "p"), stack("rule_2", "a")]);
        rules.keep_rules(&["rule_1"]);
        assert_eq!(ids(&rules), vec!["rule_1"]);
    }

    #[test]
    fn test_set_rule_aliases() {
        let mut rules = RuleSet::new(vec![stack("rule_1", "p"), stack("rule_2", "a")]);
        let aliases = HashMap::from([("rule_1".to_string(), "alias_1".to_string())]);
        rules.set_rule_aliases(&aliases);
        assert_eq!(rules.stacks()[0].alias, "alias_1");
        assert_eq!(rules.stacks()[1].alias, "");
    }

    #[test]
    fn test_dedup_first_wins_and_is_idempotent() {
        let mut rules = RuleSet::new(vec![
            stack("rule_1", "p"),
            stack("rule_2", "a"),
            stack("rule_3", "p"),
        ]);
        rules.dedup();
        assert_eq!(ids(&rules), vec!["rule_1", "rule_2"]);

        let once = rules.clone();
        rules.dedup();
        assert_eq!(rules, once);
    }

    #[test]
    fn test_css_selector_group() {
        let rules = RuleSet::new(vec![stack("rule_1", "p"), stack("rule_2", "a")]);
        assert_eq!(rules.css_selector(), "html > p, html > a");
    }

    #[test]
    fn test_json_uses_stack_list_wrapper() {
        let rules = RuleSet::new(vec![stack("rule_1", "p")]);
        let json: serde_json::Value =
            serde_json::from_str(&rules.to_json_pretty().unwrap()).unwrap();
        let first = &json["stack_list"][0];
        assert_eq!(first["stack_id"], "rule_1");
        assert_eq!(first["content"][1][2], 0);
        assert!(first["wanted_attr"].is_null());
        assert_eq!(first["url"], "");
    }

    #[test]
    fn test_load_accepts_legacy_array() {
        let legacy = r#"[{
            "content": [["html", {"class": "", "style": ""}], ["p", {"class": "x", "style": ""}, 2]],
            "wanted_attr": null,
            "is_full_url": false,
            "hash": "abc",
            "stack_id": "rule_old1"
        }]"#;
        let rules = RuleSet::from_json(legacy).unwrap();
        assert_eq!(rules.len(), 1);
        let stack = &rules.stacks()[0];
        assert_eq!(stack.content[1].index, Some(2));
        assert!(!stack.is_non_rec_text);
        assert_eq!(stack.alias, "");
    }

    #[test]
    fn test_parent_indexed_file_keeps_indexes_where_written() {
        // Index on the parent entry, none on the leaf: read as written, not shifted.
        let json = r#"{"stack_list": [{
            "content": [
                ["html", {"class": "", "style": ""}, 0],
                ["body", {"class": "", "style": ""}, 1],
                ["div", {"class": "x", "style": ""}]
            ],
            "hash": "abc",
            "stack_id": "rule_old2"
        }]}"#;
        let rules = RuleSet::from_json(json).unwrap();
        let indexes: Vec<Option<usize>> =
            rules.stacks()[0].content.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![Some(0), Some(1), None]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        let mut rules = RuleSet::new(vec![stack("rule_1", "p"), stack("rule_2", "a")]);
        rules.set_rule_aliases(&HashMap::from([("rule_2".to_string(), "link".to_string())]));
        rules.save(&path).unwrap();

        assert_eq!(RuleSet::load(&path).unwrap(), rules);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuleSet::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ScrapeError::Io { .. }));
    }

    #[test]
    fn test_load_garbage_fails() {
        assert!(matches!(
            RuleSet::from_json("{\"nope\": 1}"),
            Err(ScrapeError::Decode(_))
        ));
    }
}
