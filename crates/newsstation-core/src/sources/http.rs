use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Proxy, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::AppConfig;
use crate::error::FetchFailureKind;
use crate::{Error, Result};

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;
const CONTENT_TEXT_WIDTH: usize = 100;

// Rotating User-Agent pool; Reddit and GitHub throttle obvious bots
static USER_AGENT_INDEX: AtomicUsize = AtomicUsize::new(0);
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

fn next_user_agent() -> &'static str {
    let index = USER_AGENT_INDEX.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
    USER_AGENTS[index]
}

/// Shared HTTP client used by every source adapter.
///
/// Failures are reported as [`Error::Fetch`] tagged with the calling source, so the
/// aggregator can tell an unreachable upstream from one that returned garbage.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Self::build_client(config.sync.request_timeout_secs, &config.sync.proxy_url)?;
        Ok(Self { client })
    }

    /// Build HTTP client with optional proxy
    fn build_client(timeout_secs: u64, proxy_url: &Option<String>) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(ref proxy) = proxy_url {
            let proxy = Proxy::all(proxy)
                .map_err(|e| Error::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
            tracing::info!("Using HTTP proxy for upstream requests");
        }

        builder.build().map_err(Error::Http)
    }

    fn build_headers(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Ok(ua) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers
    }

    /// GET a URL and return the body; a non-success status is an error
    pub async fn get_bytes(&self, source_id: &str, url: &str) -> Result<Bytes> {
        let (status, body) = self.get_with_status(source_id, url).await?;
        if !status.is_success() {
            return Err(Error::fetch(
                source_id,
                FetchFailureKind::Unreachable,
                format!("HTTP {} for {}", status, url),
            ));
        }
        Ok(body)
    }

    /// GET a URL, returning the status alongside the body.
    /// Used where a 404 is an expected answer rather than a failure.
    pub async fn get_with_status(&self, source_id: &str, url: &str) -> Result<(StatusCode, Bytes)> {
        tracing::debug!(source = source_id, %url, "Upstream request");

        let response = self
            .client
            .get(url)
            .headers(Self::build_headers(next_user_agent()))
            .send()
            .await
            .map_err(|e| classify_request_error(source_id, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_request_error(source_id, e))?;

        if body.len() > MAX_BODY_BYTES {
            return Err(Error::fetch(
                source_id,
                FetchFailureKind::Invalid,
                format!("response too large ({} bytes) for {}", body.len(), url),
            ));
        }

        Ok((status, body))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, source_id: &str, url: &str) -> Result<T> {
        let body = self.get_bytes(source_id, url).await?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::fetch(source_id, FetchFailureKind::Invalid, format!("bad JSON from {}: {}", url, e))
        })
    }

    pub async fn get_text(&self, source_id: &str, url: &str) -> Result<String> {
        let body = self.get_bytes(source_id, url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Fetch an external page and reduce it to readable text
    pub async fn get_page_text(&self, source_id: &str, url: &str) -> Result<Option<String>> {
        let body = self.get_bytes(source_id, url).await?;
        Ok(html_to_text(&body))
    }
}

fn classify_request_error(source_id: &str, err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        FetchFailureKind::Timeout
    } else if err.is_decode() || err.is_body() {
        FetchFailureKind::Invalid
    } else {
        FetchFailureKind::Unreachable
    };
    Error::fetch(source_id, kind, err.to_string())
}

/// Convert an HTML document to plain text, `None` when nothing readable remains
pub fn html_to_text(html: &[u8]) -> Option<String> {
    let text = html2text::from_read(html, CONTENT_TEXT_WIDTH).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_rotation() {
        let first = next_user_agent();
        let second = next_user_agent();
        assert_ne!(first, second);
    }

    #[test]
    fn test_html_to_text() {
        let text = html_to_text(b"<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>").unwrap();
        assert!(text.contains("Title"));
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn test_html_to_text_empty() {
        assert!(html_to_text(b"<html><body>   </body></html>").is_none());
    }

    #[test]
    fn test_build_fetcher_rejects_bad_proxy() {
        let mut config = AppConfig::default();
        config.sync.proxy_url = Some("http://[::1".to_string());
        assert!(matches!(HttpFetcher::new(&config), Err(Error::Config(_))));
    }
}
