//! Document fetching over blocking HTTP (ureq)

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};

/// Desktop browser agents used when the configuration does not supply any.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Firefox on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Firefox on Linux
    "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

/// Pool of user agents to pick from.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAgents {
    agents: Vec<String>,
}

impl UserAgents {
    pub fn new(agents: Vec<String>) -> Self {
        UserAgents { agents }
    }

    pub fn all(&self) -> &[String] {
        &self.agents
    }

    /// Random entry from the pool.
    pub fn pick(&self) -> Result<&str> {
        if self.agents.is_empty() {
            return Err(ScrapeError::NoUserAgents);
        }
        let index = rand::rng().random_range(0..self.agents.len());
        Ok(&self.agents[index])
    }
}

/// Per-call request customization.
#[derive(Debug, Clone, Default)]
pub struct RequestArgs {
    /// Extra headers; these override the defaults, names compared
    /// case-insensitively.
    pub headers: BTreeMap<String, String>,
    /// Query pairs appended to the URL.
    pub query: Vec<(String, String)>,
}

/// Blocking HTTP fetcher.
pub struct Fetcher {
    agent: ureq::Agent,
    user_agents: UserAgents,
    headers: BTreeMap<String, String>,
}

impl Fetcher {
    pub fn new(config: &ScraperConfig) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::Agent::config_builder()
                .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
                .build(),
        );

        Fetcher {
            agent,
            user_agents: UserAgents::new(config.user_agents.clone()),
            headers: config.headers.clone(),
        }
    }

    pub fn user_agents(&self) -> &UserAgents {
        &self.user_agents
    }

    /// Headers for a request to `url`: `User-Agent`, `Host`, configured
    /// headers, then per-call headers, later entries replacing earlier ones.
    pub fn request_headers(&self, url: &str, args: &RequestArgs) -> Result<Vec<(String, String)>> {
        let parsed = Url::parse(url).map_err(|source| ScrapeError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let mut headers = Vec::new();
        set_header(&mut headers, "User-Agent", self.user_agents.pick()?);
        if let Some(host) = parsed.host_str() {
            let host = match parsed.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            set_header(&mut headers, "Host", &host);
        }
        for (name, value) in self.headers.iter().chain(args.headers.iter()) {
            set_header(&mut headers, name, value);
        }
        Ok(headers)
    }

    /// Fetch `url` and return the response body as text.
    pub fn fetch(&self, url: &str, args: &RequestArgs) -> Result<String> {
        let headers = self.request_headers(url, args)?;
        info!(url, "Fetching document");

        let mut request = self.agent.get(url);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        for (key, value) in &args.query {
            request = request.query(key, value);
        }

        let fetch_error = |source: ureq::Error| ScrapeError::Fetch {
            url: url.to_string(),
            source: Box::new(source),
        };
        let response = request.call().map_err(fetch_error)?;
        let body = response.into_body().read_to_string().map_err(fetch_error)?;

        debug!(url, bytes = body.len(), "Fetched document");
        Ok(body)
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_pick_user_agent() {
        let agents = UserAgents::new(vec!["Mozilla/5.0".into(), "Chrome/91.0".into()]);
        let picked = agents.pick().unwrap();
        assert!(agents.all().iter().any(|a| a == picked));
    }

    #[test]
    fn test_empty_user_agents_is_error() {
        let agents = UserAgents::new(vec![]);
        assert!(matches!(agents.pick(), Err(ScrapeError::NoUserAgents)));
    }

    #[test]
    fn test_request_headers() {
        let config = ScraperConfig::default().with_user_agents(["TestAgent/1.0"]);
        let fetcher = Fetcher::new(&config);
        let headers = fetcher
            .request_headers("https://example.com:8443/page", &RequestArgs::default())
            .unwrap();

        assert_eq!(header(&headers, "User-Agent"), Some("TestAgent/1.0"));
        assert_eq!(header(&headers, "Host"), Some("example.com:8443"));
    }

    #[test]
    fn test_call_headers_override_defaults() {
        let mut config = ScraperConfig::default().with_user_agents(["TestAgent/1.0"]);
        config.headers.insert("Accept".into(), "text/html".into());
        let fetcher = Fetcher::new(&config);

        let mut args = RequestArgs::default();
        args.headers.insert("user-agent".into(), "Custom/2.0".into());
        args.headers.insert("accept".into(), "*/*".into());
        let headers = fetcher.request_headers("http://example.com", &args).unwrap();

        assert_eq!(headers.len(), 3);
        assert_eq!(header(&headers, "User-Agent"), Some("Custom/2.0"));
        assert_eq!(header(&headers, "Accept"), Some("*/*"));
        assert_eq!(header(&headers, "Host"), Some("example.com"));
    }

    #[test]
    fn test_invalid_url() {
        let fetcher = Fetcher::new(&ScraperConfig::default());
        let err = fetcher
            .request_headers("not a url", &RequestArgs::default())
            .unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidUrl { .. }));
    }

    #[test]
    fn test_fetch_sends_headers_and_query() {
        let mut server = mockito::Server::new();
        let host = server.host_with_port();
        let mock = server
            .mock("GET", "/page")
            .match_query(Matcher::UrlEncoded("q".into(), "x y".into()))
            .match_header("user-agent", "TestAgent/1.0")
            .match_header("host", host.as_str())
            .match_header("accept-language", "en")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<p>hi</p>")
            .create();

        let config = ScraperConfig::default().with_user_agents(["TestAgent/1.0"]);
        let fetcher = Fetcher::new(&config);
        assert_eq!(fetcher.user_agents().all(), ["TestAgent/1.0"]);

        let mut args = RequestArgs::default();
        args.headers.insert("Accept-Language".into(), "en".into());
        args.query.push(("q".into(), "x y".into()));
        let body = fetcher
            .fetch(&format!("{}/page", server.url()), &args)
            .unwrap();

        assert_eq!(body, "<p>hi</p>");
        mock.assert();
    }

    #[test]
    fn test_fetch_error_status() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/broken")
            .with_status(500)
            .with_body("Error")
            .create();

        let fetcher = Fetcher::new(&ScraperConfig::default());
        let url = format!("{}/broken", server.url());
        let err = fetcher.fetch(&url, &RequestArgs::default()).unwrap_err();

        assert!(matches!(err, ScrapeError::Fetch { url: ref failed, .. } if *failed == url));
        mock.assert();
    }

    #[test]
    fn test_no_user_agents_surfaces_on_request() {
        let config = ScraperConfig::default().with_user_agents(Vec::<String>::new());
        let fetcher = Fetcher::new(&config);
        let err = fetcher.fetch("http://example.com", &RequestArgs::default()).unwrap_err();
        assert!(matches!(err, ScrapeError::NoUserAgents));
    }
}
