//! FFI interface for C/C++ interop
//!
//! Build and replay rules over HTML supplied by the caller. Requests and
//! results are passed as JSON. Nothing here touches the network.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use serde::{Deserialize, Serialize};

use crate::config::ScraperConfig;
use crate::engine::{
    BuildOptions, DocumentSource, ExtractOptions, Extraction, Grouping, Scraper, Wanted,
};
use crate::rules::RuleSet;

/// Result struct returned to C/C++
/// Both pointers are owned by Rust and must be freed via free_autoscrape_result
#[repr(C)]
pub struct AutoscrapeResultFFI {
    /// JSON-serialized result (null-terminated)
    pub json_ptr: *mut c_char,
    /// Error message if the call failed (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

/// Wanted values: a plain list, or alias -> list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WantedValues {
    List(Vec<String>),
    Aliased(serde_json::Map<String, serde_json::Value>),
}

#[derive(Debug, Deserialize)]
pub struct BuildRequest {
    #[serde(default)]
    pub url: Option<String>,
    /// Existing rules, only used with `update`.
    #[serde(default)]
    pub rules: RuleSet,
    pub wanted: WantedValues,
    #[serde(default)]
    pub update: bool,
    #[serde(default = "default_ratio")]
    pub text_fuzz_ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub values: Vec<String>,
    pub rules: RuleSet,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    #[default]
    Similar,
    Exact,
    Both,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    None,
    RuleId,
    Alias,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    #[serde(default)]
    pub url: Option<String>,
    pub rules: RuleSet,
    #[serde(default)]
    pub mode: ExtractMode,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub unique: Option<bool>,
    #[serde(default = "default_ratio")]
    pub attr_fuzz_ratio: f64,
    #[serde(default)]
    pub keep_blank: bool,
    #[serde(default)]
    pub keep_order: bool,
    #[serde(default)]
    pub contain_sibling_leaves: bool,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar: Option<Extraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<Extraction>,
}

fn default_ratio() -> f64 {
    1.0
}

impl WantedValues {
    fn into_wanted(self) -> Result<Wanted, String> {
        match self {
            WantedValues::List(values) => Ok(Wanted::List(values)),
            WantedValues::Aliased(map) => map
                .into_iter()
                .map(|(alias, values)| {
                    serde_json::from_value::<Vec<String>>(values)
                        .map(|values| (alias.clone(), values))
                        .map_err(|e| format!("Invalid wanted values for alias '{}': {}", alias, e))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Wanted::Aliased),
        }
    }
}

impl ExtractRequest {
    fn options(&self) -> ExtractOptions {
        ExtractOptions {
            grouping: match self.group_by {
                GroupBy::None => Grouping::None,
                GroupBy::RuleId => Grouping::ByRuleId,
                GroupBy::Alias => Grouping::ByAlias,
            },
            unique: self.unique,
            attr_fuzz_ratio: self.attr_fuzz_ratio,
            keep_blank: self.keep_blank,
            keep_order: self.keep_order,
            contain_sibling_leaves: self.contain_sibling_leaves,
        }
    }
}

/// Learn rules from wanted values found in the HTML.
///
/// # Arguments
/// * `html_ptr` - Pointer to HTML content (UTF-8, not necessarily null-terminated)
/// * `html_len` - Length of HTML content in bytes
/// * `request_json` - JSON-serialized BuildRequest (null-terminated)
///
/// # Returns
/// JSON `{"values": [...], "rules": {"stack_list": [...]}}` on success
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `request_json` must be a valid null-terminated C string
/// - Caller must free the result via `free_autoscrape_result`
#[no_mangle]
pub unsafe extern "C" fn autoscrape_build(
    html_ptr: *const c_char,
    html_len: usize,
    request_json: *const c_char,
) -> AutoscrapeResultFFI {
    let html = match read_html(html_ptr, html_len) {
        Ok(html) => html,
        Err(msg) => return make_error_result(msg),
    };
    let request: BuildRequest = match read_request(request_json) {
        Ok(request) => request,
        Err(msg) => return make_error_result(&msg),
    };
    let wanted = match request.wanted.into_wanted() {
        Ok(wanted) => wanted,
        Err(msg) => return make_error_result(&msg),
    };

    let mut scraper = Scraper::with_rules(ScraperConfig::default(), request.rules);
    let source = DocumentSource::Html {
        markup: &html,
        url: request.url.as_deref(),
    };
    let options = BuildOptions {
        update: request.update,
        text_fuzz_ratio: request.text_fuzz_ratio,
    };

    match scraper.build(&source, wanted, options) {
        Ok(values) => make_json_result(&BuildResponse {
            values,
            rules: scraper.rules().clone(),
        }),
        Err(e) => make_error_result(&format!("Build failed: {}", e)),
    }
}

/// Replay rules against the HTML.
///
/// # Returns
/// JSON `{"similar": ...}`, `{"exact": ...}` or both, per the request mode.
/// Ungrouped values are an array; grouped values an object keyed by rule
/// id or alias.
///
/// # Safety
/// Same as autoscrape_build
#[no_mangle]
pub unsafe extern "C" fn autoscrape_extract(
    html_ptr: *const c_char,
    html_len: usize,
    request_json: *const c_char,
) -> AutoscrapeResultFFI {
    let html = match read_html(html_ptr, html_len) {
        Ok(html) => html,
        Err(msg) => return make_error_result(msg),
    };
    let request: ExtractRequest = match read_request(request_json) {
        Ok(request) => request,
        Err(msg) => return make_error_result(&msg),
    };

    let options = request.options();
    let scraper = Scraper::with_rules(ScraperConfig::default(), request.rules);
    let source = DocumentSource::Html {
        markup: &html,
        url: request.url.as_deref(),
    };

    let response = match request.mode {
        ExtractMode::Similar => scraper
            .get_result_similar(&source, &options)
            .map(|similar| ExtractResponse { similar: Some(similar), exact: None }),
        ExtractMode::Exact => scraper
            .get_result_exact(&source, &options)
            .map(|exact| ExtractResponse { similar: None, exact: Some(exact) }),
        ExtractMode::Both => scraper
            .get_result(&source, &options)
            .map(|(similar, exact)| ExtractResponse {
                similar: Some(similar),
                exact: Some(exact),
            }),
    };

    match response {
        Ok(response) => make_json_result(&response),
        Err(e) => make_error_result(&format!("Extraction failed: {}", e)),
    }
}

/// Combined CSS selector for a rule file (wrapper or bare array), as a JSON
/// string.
///
/// # Safety
/// - `rules_json` must be a valid null-terminated C string
/// - Caller must free the result via `free_autoscrape_result`
#[no_mangle]
pub unsafe extern "C" fn autoscrape_css_selector(rules_json: *const c_char) -> AutoscrapeResultFFI {
    match read_request::<RuleSet>(rules_json) {
        Ok(rules) => make_json_result(&rules.css_selector()),
        Err(msg) => make_error_result(&msg),
    }
}

/// Free an AutoscrapeResultFFI returned by any autoscrape_* function
///
/// # Safety
/// - `result` must have been returned by an `autoscrape_*` function
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn free_autoscrape_result(result: AutoscrapeResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

unsafe fn read_html(html_ptr: *const c_char, html_len: usize) -> Result<String, &'static str> {
    if html_ptr.is_null() || html_len == 0 {
        return Err("HTML content is empty");
    }
    let slice = std::slice::from_raw_parts(html_ptr as *const u8, html_len);
    let html = std::str::from_utf8(slice).map_err(|_| "Invalid UTF-8 in HTML content")?;
    // Blank markup must not fall back to fetching.
    if html.trim().is_empty() {
        return Err("HTML content is empty");
    }
    Ok(html.to_string())
}

unsafe fn read_request<T: for<'de> Deserialize<'de>>(json: *const c_char) -> Result<T, String> {
    if json.is_null() {
        return Err("Request JSON is null".to_string());
    }
    let json = CStr::from_ptr(json)
        .to_str()
        .map_err(|_| "Invalid UTF-8 in request JSON".to_string())?;
    serde_json::from_str(json).map_err(|e| format!("Failed to parse request JSON: {}", e))
}

fn make_json_result<T: Serialize>(value: &T) -> AutoscrapeResultFFI {
    match serde_json::to_string(value) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => AutoscrapeResultFFI {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("Result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

// Helper to create error result
fn make_error_result(msg: &str) -> AutoscrapeResultFFI {
    let error_cstr = CString::new(msg.replace('\0', "")).unwrap_or_default();
    AutoscrapeResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: error_cstr.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const CARDS: &str = r#"<div class="card"><h2 class="title">Alpha</h2><span class="price">$1</span></div><div class="card"><h2 class="title">Beta</h2><span class="price">$2</span></div>"#;

    // Run an FFI call and turn its result into Ok(json) / Err(message)
    fn call(result: AutoscrapeResultFFI) -> Result<Value, String> {
        let outcome = unsafe {
            if result.json_ptr.is_null() {
                Err(CStr::from_ptr(result.error_ptr).to_str().unwrap().to_string())
            } else {
                Ok(serde_json::from_str(CStr::from_ptr(result.json_ptr).to_str().unwrap()).unwrap())
            }
        };
        unsafe { free_autoscrape_result(result) };
        outcome
    }

    fn build(html: &str, request: Value) -> Result<Value, String> {
        let request = CString::new(request.to_string()).unwrap();
        call(unsafe { autoscrape_build(html.as_ptr() as *const c_char, html.len(), request.as_ptr()) })
    }

    fn extract(html: &str, request: Value) -> Result<Value, String> {
        let request = CString::new(request.to_string()).unwrap();
        call(unsafe { autoscrape_extract(html.as_ptr() as *const c_char, html.len(), request.as_ptr()) })
    }

    #[test]
    fn test_build_and_extract() {
        let built = build(CARDS, json!({"wanted": ["Alpha"]})).unwrap();
        assert_eq!(built["values"], json!(["Alpha", "Beta"]));
        assert_eq!(built["rules"]["stack_list"].as_array().unwrap().len(), 1);

        let result = extract(CARDS, json!({"rules": built["rules"], "mode": "both"})).unwrap();
        assert_eq!(result["similar"], json!(["Alpha", "Beta"]));
        assert_eq!(result["exact"], json!(["Alpha"]));
    }

    #[test]
    fn test_aliased_build_and_grouping() {
        let built = build(CARDS, json!({"wanted": {"title": ["Alpha"], "price": ["$2"]}})).unwrap();
        let result = extract(CARDS, json!({"rules": built["rules"], "group_by": "alias"})).unwrap();

        assert_eq!(result["similar"]["title"], json!(["Alpha", "Beta"]));
        assert_eq!(result["similar"]["price"], json!(["$1", "$2"]));
        assert!(result.get("exact").is_none());
    }

    #[test]
    fn test_extract_accepts_legacy_rule_array() {
        let built = build(CARDS, json!({"wanted": ["Beta"]})).unwrap();
        let legacy = built["rules"]["stack_list"].clone();
        let result = extract(CARDS, json!({"rules": legacy, "mode": "exact"})).unwrap();
        assert_eq!(result["exact"], json!(["Beta"]));
    }

    #[test]
    fn test_css_selector() {
        let built = build(CARDS, json!({"wanted": ["Alpha"]})).unwrap();
        let rules = CString::new(built["rules"].to_string()).unwrap();
        let selector = call(unsafe { autoscrape_css_selector(rules.as_ptr()) }).unwrap();
        assert_eq!(
            selector,
            json!(r#"html > body > div[class="card"] > h2[class="title"]"#)
        );
    }

    #[test]
    fn test_errors() {
        let err = build("", json!({"wanted": ["x"]})).unwrap_err();
        assert_eq!(err, "HTML content is empty");

        let err = build(CARDS, json!({"nope": true})).unwrap_err();
        assert!(err.starts_with("Failed to parse request JSON"));

        let err = build(CARDS, json!({"wanted": {"title": [1]}})).unwrap_err();
        assert!(err.contains("title"));

        let err = call(unsafe { autoscrape_css_selector(ptr::null()) }).unwrap_err();
        assert_eq!(err, "Request JSON is null");
    }
}
