//! Shared test scaffolding: a scripted fake fetcher, a no-op image store,
//! and builders that assemble a scraping context against a test database.

use brickwatch::breaker::CircuitBreaker;
use brickwatch::config::{BreakerConfig, QueueConfig, RateLimitsConfig};
use brickwatch::data::jobs::JobQueue;
use brickwatch::data::marketplace::MarketplaceRepo;
use brickwatch::data::metadata::MetadataRepo;
use brickwatch::data::products::ProductRepo;
use brickwatch::data::raw_payloads::RawPayloadStore;
use brickwatch::data::reddit::RedditRepo;
use brickwatch::data::retirement::RetirementRepo;
use brickwatch::data::sessions::SessionRecorder;
use brickwatch::error::{Result, ScrapeError};
use brickwatch::fetch::{Fetch, FetchRequest, FetchResponse};
use brickwatch::limiter::RateLimiter;
use brickwatch::scraper::images::ImageStore;
use brickwatch::scraper::sources::SourceContext;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted response for the fake fetcher.
pub enum FakeResponse {
    Ok(String),
    Http(u16),
    Network(&'static str),
}

/// A fetcher that replays a scripted sequence of responses and counts calls.
pub struct FakeFetcher {
    responses: Mutex<VecDeque<FakeResponse>>,
    repeat_body: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(responses: Vec<FakeResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            repeat_body: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always serve the same body, however many times it is fetched.
    pub fn always(body: &str) -> Self {
        let mut fetcher = Self::new(Vec::new());
        fetcher.repeat_body = Some(body.to_string());
        fetcher
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetch for FakeFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(ref body) = self.repeat_body {
            return Ok(FetchResponse {
                body: body.clone().into_bytes(),
                status: 200,
                final_url: request.url,
                content_type: Some("text/html".to_string()),
            });
        }

        let next = self
            .responses
            .lock()
            .expect("fake fetcher lock")
            .pop_front()
            .expect("fake fetcher script exhausted");

        match next {
            FakeResponse::Ok(body) => Ok(FetchResponse {
                body: body.into_bytes(),
                status: 200,
                final_url: request.url,
                content_type: Some("text/html".to_string()),
            }),
            FakeResponse::Http(status) => Err(ScrapeError::FetchHttp(status)),
            FakeResponse::Network(message) => Err(ScrapeError::FetchNetwork(message.to_string())),
        }
    }
}

/// Image store that records nothing and never fails.
pub struct NoopImageStore;

#[async_trait::async_trait]
impl ImageStore for NoopImageStore {
    async fn download(&self, _url: &str, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Image store that always fails, for the non-fatal-image-error path.
pub struct FailingImageStore;

#[async_trait::async_trait]
impl ImageStore for FailingImageStore {
    async fn download(&self, url: &str, _key: &str) -> Result<()> {
        Err(ScrapeError::ImageDownload(format!("refused {url}")))
    }
}

/// Queue config with fast backoff so retry tests run in milliseconds.
pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(10),
        completed_retention: 1000,
    }
}

/// Rate limits with negligible gaps and no jitter.
pub fn fast_rate_limits() -> RateLimitsConfig {
    RateLimitsConfig {
        marketplace_interval: Duration::from_millis(1),
        marketplace_hourly_cap: None,
        retirement_interval: Duration::from_millis(1),
        metadata_interval: Duration::from_millis(1),
        reddit_interval: Duration::from_millis(1),
        jitter: Duration::ZERO,
    }
}

pub fn queue(pool: &PgPool) -> JobQueue {
    JobQueue::new(pool.clone(), fast_queue_config())
}

/// Build a scrape context around the given fetcher.
pub fn context(pool: &PgPool, fetcher: Arc<dyn Fetch>) -> Arc<SourceContext> {
    context_with_images(pool, fetcher, Arc::new(NoopImageStore))
}

pub fn context_with_images(
    pool: &PgPool,
    fetcher: Arc<dyn Fetch>,
    images: Arc<dyn ImageStore>,
) -> Arc<SourceContext> {
    Arc::new(SourceContext {
        fetcher,
        limiter: Arc::new(RateLimiter::new(pool.clone(), &fast_rate_limits())),
        breaker: CircuitBreaker::new(pool.clone(), BreakerConfig::default()),
        sessions: SessionRecorder::new(pool.clone()),
        raw_store: RawPayloadStore::new(pool.clone()),
        images,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(10),
    })
}

pub fn marketplace_repo(pool: &PgPool) -> MarketplaceRepo {
    MarketplaceRepo::new(pool.clone())
}

pub fn metadata_repo(pool: &PgPool) -> MetadataRepo {
    MetadataRepo::new(pool.clone())
}

pub fn retirement_repo(pool: &PgPool) -> RetirementRepo {
    RetirementRepo::new(pool.clone())
}

pub fn reddit_repo(pool: &PgPool) -> RedditRepo {
    RedditRepo::new(pool.clone())
}

pub fn product_repo(pool: &PgPool) -> ProductRepo {
    ProductRepo::new(pool.clone())
}

/// Marketplace catalog page fixture for item 75192-1.
pub const MARKETPLACE_PAGE: &str = r#"
    <html><body>
    <span id="item-name-title">Millennium Falcon</span>
    <img id="_idImageMain" src="https://img.example.com/SN/75192-1.png">
    <table>
    <td>New</td><td>1,402</td><td>US $849.99</td><td>US $799.50</td>
    <td>Used</td><td>230</td><td>US $650.00</td><td>US $600.00</td>
    </table>
    </body></html>"#;

/// Metadata search page with one product link.
pub const METADATA_SEARCH_HIT: &str =
    r#"<div><a class="product-link" href="/sets/77243-falcon">result</a></div>"#;

/// Metadata search page with zero product links.
pub const METADATA_SEARCH_EMPTY: &str = r#"<div class="results"></div>"#;

/// Metadata product page fixture.
pub const METADATA_PRODUCT_PAGE: &str = r#"
    <h1 class="product-title">Millennium Falcon</h1>
    <dl>
    <dt>Year</dt><dd>2017</dd>
    <dt>Pieces</dt><dd>7,541</dd>
    <dt>Minifigs</dt><dd>8</dd>
    <dt>RRP</dt><dd>$849.99</dd>
    </dl>"#;
