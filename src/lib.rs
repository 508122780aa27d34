//! Rule-learning web scraper
//!
//! Give it a page and a few values you want from it; it records the
//! element path to each value as a rule ("stack") and replays those rules
//! on structurally similar pages:
//! - selector-based replay generalizes across repeated siblings
//! - index-based replay follows the exact recorded positions
//!
//! Rules persist as JSON and can be filtered, aliased and rendered as CSS.
//! A JSON-in/JSON-out C interface is exposed in [`ffi`].

pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod fetch;
pub mod matcher;
pub mod path_builder;
pub mod rules;
pub mod stack;
pub mod text_match;

pub use config::ScraperConfig;
pub use engine::{
    BuildOptions, DocumentSource, ExtractOptions, Extraction, Grouping, Scraper, Wanted,
};
pub use error::{Result, ScrapeError};
pub use fetch::RequestArgs;
pub use rules::RuleSet;
pub use stack::{ExtractTarget, Segment, Stack};
