//! HTTP fetching for scraper workers.
//!
//! Two modes behind one trait: plain HTTP with rotating headers for sources
//! that serve static markup, and a headless-browser rendering service for
//! sources behind bot detection. Workers depend on the [`Fetch`] trait so
//! tests can substitute canned responses.

pub mod browser;
pub mod simple;

use crate::error::Result;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// One GET with rotated User-Agent and Accept-Language headers.
    Simple,
    /// Full page render through the browser service.
    Browser,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub mode: FetchMode,
    pub wait_for_selector: Option<String>,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    pub fn simple(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::Simple,
            wait_for_selector: None,
            timeout: None,
        }
    }

    pub fn browser(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::Browser,
            wait_for_selector: None,
            timeout: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.wait_for_selector = Some(selector.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: Vec<u8>,
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
}

/// One GET, either mode. Non-2xx statuses surface as
/// [`crate::error::ScrapeError::FetchHttp`], timeouts as `FetchTimeout`,
/// transport failures as `FetchNetwork`.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// Production fetcher dispatching on request mode.
pub struct HttpFetcher {
    simple: simple::SimpleFetcher,
    browser: browser::BrowserFetcher,
}

impl HttpFetcher {
    pub fn new(browser_service_url: String, browser_service_token: Option<String>) -> Result<Self, anyhow::Error> {
        Ok(Self {
            simple: simple::SimpleFetcher::new()?,
            browser: browser::BrowserFetcher::new(browser_service_url, browser_service_token),
        })
    }
}

#[async_trait::async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        match request.mode {
            FetchMode::Simple => self.simple.fetch(request).await,
            FetchMode::Browser => self.browser.fetch(request).await,
        }
    }
}
