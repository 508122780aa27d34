//! Error types

use std::path::PathBuf;

use thiserror::Error;

/// Failures that prevent obtaining a document or a rule set.
///
/// A rule that matches nothing, or a matched node without the wanted
/// attribute, is not an error: it simply contributes no values.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("Failed to access rule file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode rule set: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("No user agents configured")]
    NoUserAgents,
    #[error("No document: supply a URL or HTML markup")]
    NoDocument,
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
