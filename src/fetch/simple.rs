//! Plain HTTP fetching with rotating request headers.

use super::{DEFAULT_TIMEOUT, FetchRequest, FetchResponse};
use crate::error::{Result, ScrapeError};
use rand::seq::IndexedRandom;
use reqwest::Client;

/// User-Agent pool, rotated uniformly per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
];

/// Accept-Language pool, rotated uniformly per request.
const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.8,de;q=0.5",
    "en-AU,en;q=0.9",
];

pub struct SimpleFetcher {
    client: Client,
}

impl SimpleFetcher {
    pub fn new() -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .tcp_keepalive(Some(std::time::Duration::from_secs(60 * 5)))
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(DEFAULT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let timeout = request.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let (user_agent, accept_language) = {
            let mut rng = rand::rng();
            let user_agent = *USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0]);
            let accept_language = *ACCEPT_LANGUAGES
                .choose(&mut rng)
                .unwrap_or(&ACCEPT_LANGUAGES[0]);
            (user_agent, accept_language)
        };

        let response = self
            .client
            .get(&request.url)
            .timeout(timeout)
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(reqwest::header::ACCEPT_LANGUAGE, accept_language)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::FetchHttp(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, timeout))?
            .to_vec();

        Ok(FetchResponse {
            body,
            status: status.as_u16(),
            final_url,
            content_type,
        })
    }
}

pub(super) fn classify(error: reqwest::Error, timeout: std::time::Duration) -> ScrapeError {
    if error.is_timeout() {
        ScrapeError::FetchTimeout(timeout)
    } else if let Some(status) = error.status() {
        ScrapeError::FetchHttp(status.as_u16())
    } else {
        ScrapeError::FetchNetwork(error.to_string())
    }
}
