//! Error taxonomy for the scraping pipeline.
//!
//! Low-level failures are classified exactly once, at the source-worker
//! boundary, into the kinds below. Higher layers only ever see a
//! [`crate::scraper::sources::ScrapeResult`]; the queue only sees ack/fail.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// URL or identifier malformed. Never retried.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// The shared store backing the rate limiter is unreachable.
    #[error("rate limiter store unavailable: {0}")]
    RateLimiterUnavailable(#[source] sqlx::Error),

    /// The source's circuit breaker is open; the call was short-circuited
    /// before any fetch. Never retried.
    #[error("circuit open for source '{0}'")]
    CircuitOpen(String),

    #[error("fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("network error: {0}")]
    FetchNetwork(String),

    #[error("HTTP {0}")]
    FetchHttp(u16),

    /// Markup was malformed or had an unexpected shape. Treated as transient:
    /// the page may have loaded partially.
    #[error("parse error: {0}")]
    Parse(String),

    /// The source confirmed the item does not exist. Terminal, success-like:
    /// the repository records a long retry horizon.
    #[error("set not found on source")]
    SetNotFound,

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    /// Non-fatal: recorded in the record's image-status column, the scrape
    /// continues.
    #[error("image download failed: {0}")]
    ImageDownload(String),
}

impl ScrapeError {
    /// Whether the worker's in-process retry loop should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::FetchTimeout(_)
                | ScrapeError::FetchNetwork(_)
                | ScrapeError::FetchHttp(_)
                | ScrapeError::Parse(_)
        )
    }

    /// Whether an exhausted scrape with this error counts toward the
    /// source's circuit breaker.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            ScrapeError::FetchTimeout(_)
                | ScrapeError::FetchNetwork(_)
                | ScrapeError::FetchHttp(_)
                | ScrapeError::Parse(_)
                | ScrapeError::Db(_)
        )
    }
}

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;
