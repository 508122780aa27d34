//! Scraper configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fetch::DEFAULT_USER_AGENTS;

/// Engine-wide settings. Every field has a default, so a partial JSON
/// object (or `{}`) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Pool a `User-Agent` is picked from for every request. An empty pool
    /// makes fetching fail with `NoUserAgents`.
    pub user_agents: Vec<String>,
    /// Global timeout per request, in seconds.
    pub timeout_secs: u64,
    /// Extra headers sent with every request; per-call headers win.
    pub headers: BTreeMap<String, String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
            timeout_secs: 30,
            headers: BTreeMap::new(),
        }
    }
}

impl ScraperConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_user_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_agents = agents.into_iter().map(Into::into).collect();
        self
    }
}
