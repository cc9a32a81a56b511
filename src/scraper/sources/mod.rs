//! Per-source scraper workers.
//!
//! Each source implements [`SourceScrape`]: validate the task, then run one
//! attempt (fetch, persist raw bytes, parse, upsert). The shared driver
//! [`run_scrape`] owns the session lifecycle, the breaker check, the retry
//! loop with exponential backoff, and error classification, so every source
//! gets identical partial-failure semantics.

pub mod marketplace;
pub mod metadata;
pub mod reddit;
pub mod retail;
pub mod retirement;

use crate::breaker::CircuitBreaker;
use crate::data::models::{SessionStatus, Source};
use crate::data::raw_payloads::{RawPayloadStore, SavePayload};
use crate::data::sessions::SessionRecorder;
use crate::error::{Result, ScrapeError};
use crate::fetch::{Fetch, FetchRequest, FetchResponse};
use crate::scraper::images::ImageStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use marketplace::MarketplaceScraper;
pub use metadata::MetadataScraper;
pub use reddit::RedditScraper;
pub use retail::RetailImporter;
pub use retirement::RetirementScraper;

/// Fetch attempts per scrape call.
pub const MAX_RETRIES: u32 = 3;

/// One scrape request for one item.
#[derive(Debug, Clone)]
pub struct ScrapeTask {
    pub identifier: String,
    pub url: Option<String>,
    pub save_to_db: bool,
    pub skip_rate_limit: bool,
    /// Force-scrapes skip the breaker check (interval bypass happens at
    /// enqueue time).
    pub skip_breaker: bool,
}

impl ScrapeTask {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            url: None,
            save_to_db: true,
            skip_rate_limit: false,
            skip_breaker: false,
        }
    }
}

/// What a scrape call reports back to the worker pool.
#[derive(Debug, Clone, Default)]
pub struct ScrapeResult {
    pub success: bool,
    pub not_found: bool,
    pub records_found: usize,
    pub records_stored: usize,
    /// Fetch attempts consumed (1-based; 0 when the call never fetched).
    pub retries: u32,
    /// Terminal outcome: the queue must not spend further attempts on this
    /// job (circuit open, invalid input).
    pub no_retry: bool,
    pub error: Option<String>,
}

/// Outcome of one successful attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptOutcome {
    pub records_found: usize,
    pub records_stored: usize,
    pub not_found: bool,
}

/// Shared dependencies handed to every source scraper. Explicit, no
/// process-wide singletons: tests swap any seam.
pub struct SourceContext {
    pub fetcher: Arc<dyn Fetch>,
    pub limiter: Arc<crate::limiter::RateLimiter>,
    pub breaker: CircuitBreaker,
    pub sessions: SessionRecorder,
    pub raw_store: RawPayloadStore,
    pub images: Arc<dyn ImageStore>,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl SourceContext {
    /// One rate-limited sub-fetch with its raw bytes persisted. Multi-hop
    /// sources call this once per hop inside a single attempt.
    pub async fn fetch_and_store(
        &self,
        source: Source,
        session_id: Option<i64>,
        request: FetchRequest,
        skip_rate_limit: bool,
    ) -> Result<FetchResponse> {
        if !skip_rate_limit {
            let domain = url::Url::parse(&request.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_owned))
                .unwrap_or_else(|| source.default_domain().to_string());
            self.limiter.wait_for_slot(source, &domain).await?;
        }

        let url = request.url.clone();
        let response = self.fetcher.fetch(request).await?;

        if let Some(session_id) = session_id {
            self.raw_store
                .save(SavePayload {
                    session_id,
                    source,
                    source_url: &url,
                    body: &response.body,
                    content_type: response.content_type.as_deref(),
                    http_status: response.status,
                })
                .await?;
        }

        Ok(response)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.backoff_cap);
        let jitter_ms = rand::rng().random_range(0..=250u64);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// The per-source capability set. Sources differ only in validation, URL
/// shape, and what one attempt does.
#[async_trait::async_trait]
pub trait SourceScrape: Send + Sync {
    fn source(&self) -> Source;

    /// Validate the task and produce the URL the session is recorded
    /// against. Invalid input fails without retry.
    fn session_url(&self, task: &ScrapeTask) -> Result<String>;

    /// One full attempt: fetch (possibly multi-hop), parse, upsert. The
    /// attempt handles its source's not-found signal itself (repository
    /// `mark_not_found` plus `AttemptOutcome::not_found`).
    async fn attempt(
        &self,
        ctx: &SourceContext,
        task: &ScrapeTask,
        session_id: Option<i64>,
    ) -> Result<AttemptOutcome>;
}

/// Tagged dispatch over the scheduled sources, keyed by job name.
pub enum SourceScraper {
    Marketplace(MarketplaceScraper),
    Retirement(RetirementScraper),
    Metadata(MetadataScraper),
    Reddit(RedditScraper),
}

impl SourceScraper {
    pub fn source(&self) -> Source {
        self.inner().source()
    }

    pub async fn scrape(&self, ctx: &SourceContext, task: &ScrapeTask) -> ScrapeResult {
        run_scrape(self.inner(), ctx, task).await
    }

    fn inner(&self) -> &dyn SourceScrape {
        match self {
            SourceScraper::Marketplace(s) => s,
            SourceScraper::Retirement(s) => s,
            SourceScraper::Metadata(s) => s,
            SourceScraper::Reddit(s) => s,
        }
    }
}

/// All dispatchable scrapers, resolved by job source.
pub struct ScraperSet {
    scrapers: Vec<SourceScraper>,
}

impl ScraperSet {
    pub fn new(
        marketplace: MarketplaceScraper,
        retirement: RetirementScraper,
        metadata: MetadataScraper,
        reddit: RedditScraper,
    ) -> Self {
        Self {
            scrapers: vec![
                SourceScraper::Marketplace(marketplace),
                SourceScraper::Retirement(retirement),
                SourceScraper::Metadata(metadata),
                SourceScraper::Reddit(reddit),
            ],
        }
    }

    pub fn get(&self, source: Source) -> Option<&SourceScraper> {
        self.scrapers.iter().find(|s| s.source() == source)
    }
}

/// The shared scrape algorithm, identical for every source.
pub async fn run_scrape(
    scraper: &dyn SourceScrape,
    ctx: &SourceContext,
    task: &ScrapeTask,
) -> ScrapeResult {
    let source = scraper.source();

    let session_url = match scraper.session_url(task) {
        Ok(url) => url,
        Err(e) => {
            warn!(source = %source, identifier = %task.identifier, error = %e, "invalid scrape task");
            return ScrapeResult {
                no_retry: true,
                error: Some(e.to_string()),
                ..Default::default()
            };
        }
    };

    let session_id = if task.save_to_db {
        match ctx.sessions.open(source, &session_url).await {
            Ok(id) => Some(id),
            Err(e) => {
                return ScrapeResult {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        }
    } else {
        None
    };

    let breaker_check = if task.skip_breaker {
        Ok(false)
    } else {
        ctx.breaker.is_open(source).await
    };
    match breaker_check {
        Ok(true) => {
            debug!(source = %source, "circuit open, short-circuiting");
            close_session(ctx, session_id, SessionStatus::Failed, 0, 0).await;
            return ScrapeResult {
                no_retry: true,
                error: Some(ScrapeError::CircuitOpen(source.to_string()).to_string()),
                ..Default::default()
            };
        }
        Ok(false) => {}
        Err(e) => {
            close_session(ctx, session_id, SessionStatus::Failed, 0, 0).await;
            return ScrapeResult {
                error: Some(e.to_string()),
                ..Default::default()
            };
        }
    }

    let mut attempt = 1u32;
    loop {
        match scraper.attempt(ctx, task, session_id).await {
            Ok(outcome) => {
                if let Err(e) = ctx.breaker.record_success(source).await {
                    warn!(source = %source, error = %e, "failed to record breaker success");
                }
                let status = if outcome.not_found || outcome.records_stored == outcome.records_found
                {
                    SessionStatus::Success
                } else {
                    SessionStatus::Partial
                };
                close_session(
                    ctx,
                    session_id,
                    status,
                    outcome.records_found as i32,
                    outcome.records_stored as i32,
                )
                .await;
                return ScrapeResult {
                    success: true,
                    not_found: outcome.not_found,
                    records_found: outcome.records_found,
                    records_stored: outcome.records_stored,
                    retries: attempt,
                    no_retry: false,
                    error: None,
                };
            }
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let delay = ctx.backoff_delay(attempt);
                debug!(
                    source = %source,
                    identifier = %task.identifier,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.counts_toward_breaker() {
                    if let Err(be) = ctx.breaker.record_failure(source).await {
                        warn!(source = %source, error = %be, "failed to record breaker failure");
                    }
                }
                warn!(
                    source = %source,
                    identifier = %task.identifier,
                    attempts = attempt,
                    error = %e,
                    "scrape failed"
                );
                close_session(ctx, session_id, SessionStatus::Failed, 0, 0).await;
                return ScrapeResult {
                    retries: attempt,
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        }
    }
}

async fn close_session(
    ctx: &SourceContext,
    session_id: Option<i64>,
    status: SessionStatus,
    found: i32,
    stored: i32,
) {
    if let Some(id) = session_id {
        if let Err(e) = ctx.sessions.close(id, status, found, stored).await {
            warn!(session_id = id, error = %e, "failed to close scrape session");
        }
    }
}

/// Shared not-found horizon: re-check far in the future.
pub fn not_found_horizon() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() + chrono::Duration::days(90)
}
