//! Application assembly and lifecycle.

use crate::breaker::CircuitBreaker;
use crate::cli::TracingFormat;
use crate::config::Config;
use crate::data::jobs::JobQueue;
use crate::data::marketplace::MarketplaceRepo;
use crate::data::metadata::MetadataRepo;
use crate::data::products::ProductRepo;
use crate::data::raw_payloads::RawPayloadStore;
use crate::data::reddit::RedditRepo;
use crate::data::retail::RetailRepo;
use crate::data::retirement::RetirementRepo;
use crate::data::sessions::SessionRecorder;
use crate::fetch::{Fetch, HttpFetcher};
use crate::limiter::RateLimiter;
use crate::scraper::ScraperService;
use crate::scraper::detector::MissingDataDetector;
use crate::scraper::images::{FsImageStore, ImageStore};
use crate::scraper::scheduler::{Scheduler, SweepRepos};
use crate::scraper::sources::{
    MarketplaceScraper, MetadataScraper, RedditScraper, RetailImporter, RetirementScraper,
    ScraperSet, SourceContext,
};
use crate::services::web::WebService;
use crate::services::{ServiceExit, Supervisor};
use crate::state::AppState;
use crate::status::ServiceStatusRegistry;
use anyhow::Context;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    supervisor: Supervisor,
}

impl App {
    /// Create a new App instance with all components initialized and
    /// services registered.
    pub async fn new(tracing_format: TracingFormat) -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw().split("__"))
            .extract()
            .context("Failed to load config")?;

        crate::logging::setup_logging(&config, tracing_format);

        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = if cfg!(debug_assertions) {
                "development"
            } else {
                "production"
            },
            "starting brickwatch"
        );

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect(&config.database_url)
            .await
            .context("Failed to create database pool")?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed");

        info!(
            port = config.port,
            worker_concurrency = config.worker_concurrency,
            shutdown_timeout = format!("{:.2?}", config.shutdown_timeout),
            "configuration loaded"
        );

        // Shared coordination components
        let queue = JobQueue::new(db_pool.clone(), config.queue.clone());
        let limiter = Arc::new(RateLimiter::new(db_pool.clone(), &config.rate_limits));
        let breaker = CircuitBreaker::new(db_pool.clone(), config.breaker.clone());

        let fetcher: Arc<dyn Fetch> = Arc::new(
            HttpFetcher::new(
                config.browser_service_url.clone(),
                config.browser_service_token.clone(),
            )
            .context("Failed to create HTTP fetcher")?,
        );
        let images: Arc<dyn ImageStore> = Arc::new(
            FsImageStore::new(&config.image_dir).context("Failed to create image store")?,
        );

        let ctx = Arc::new(SourceContext {
            fetcher,
            limiter,
            breaker,
            sessions: SessionRecorder::new(db_pool.clone()),
            raw_store: RawPayloadStore::new(db_pool.clone()),
            images,
            backoff_base: config.queue.backoff_base,
            backoff_cap: config.queue.backoff_cap,
        });

        // Repositories and per-source scrapers
        let products = ProductRepo::new(db_pool.clone());
        let marketplace_repo = MarketplaceRepo::new(db_pool.clone());
        let retirement_repo = RetirementRepo::new(db_pool.clone());
        let metadata_repo = MetadataRepo::new(db_pool.clone());
        let reddit_repo = RedditRepo::new(db_pool.clone());

        let scrapers = Arc::new(ScraperSet::new(
            MarketplaceScraper::new(
                config.sources.marketplace_base_url.clone(),
                marketplace_repo.clone(),
                products.clone(),
            ),
            RetirementScraper::new(
                config.sources.retirement_tracker_url.clone(),
                retirement_repo.clone(),
                products.clone(),
            ),
            MetadataScraper::new(
                config.sources.metadata_base_url.clone(),
                metadata_repo.clone(),
            ),
            RedditScraper::new(config.sources.reddit_base_url.clone(), reddit_repo.clone()),
        ));

        let detector = Arc::new(MissingDataDetector::new(
            queue.clone(),
            marketplace_repo.clone(),
            metadata_repo.clone(),
            retirement_repo.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            SweepRepos {
                marketplace: marketplace_repo,
                retirement: retirement_repo,
                metadata: metadata_repo,
                reddit: reddit_repo,
            },
            detector.clone(),
            config.scheduler.clone(),
        ));

        let statuses = ServiceStatusRegistry::new();
        let app_state = AppState {
            queue: queue.clone(),
            scheduler: scheduler.clone(),
            detector,
            retail: Arc::new(RetailImporter::new(RetailRepo::new(db_pool.clone()))),
            scrapers: scrapers.clone(),
            ctx: ctx.clone(),
            statuses: statuses.clone(),
        };

        let mut supervisor = Supervisor::new();
        supervisor.register(Box::new(WebService::new(config.port, app_state)));
        supervisor.register(Box::new(ScraperService::new(
            queue,
            scheduler,
            scrapers,
            ctx,
            config.worker_concurrency,
            statuses,
        )));

        Ok(App { config, supervisor })
    }

    /// Spawn all services and block until a service exits or a shutdown
    /// signal arrives. Returns the process exit code.
    pub async fn run(mut self) -> ExitCode {
        self.supervisor.start();

        let shutdown_timeout = self.config.shutdown_timeout;

        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C signal handler");
            info!("received ctrl+c, gracefully shutting down...");
        };

        #[cfg(unix)]
        let sigterm = async {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm_stream =
                signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
            sigterm_stream.recv().await;
            info!("received SIGTERM, gracefully shutting down...");
        };

        #[cfg(not(unix))]
        let sigterm = std::future::pending::<()>();

        let mut exit_code = 0u8;

        tokio::select! {
            (service_name, exit) = self.supervisor.wait_any() => {
                match exit {
                    ServiceExit::Graceful => {
                        info!(service = service_name, "service completed gracefully");
                    }
                    ServiceExit::Finished => {
                        warn!(service = service_name, "service completed unexpectedly");
                        exit_code = 1;
                    }
                    ServiceExit::Failed(e) => {
                        error!(service = service_name, error = ?e, "service failed");
                        exit_code = 1;
                    }
                }

                if self.supervisor.shutdown(shutdown_timeout).await.is_err() {
                    exit_code = if exit_code == 0 { 2 } else { exit_code };
                }
            }
            _ = ctrl_c => {
                if self.supervisor.shutdown(shutdown_timeout).await.is_err() {
                    exit_code = 2;
                }
            }
            _ = sigterm => {
                if self.supervisor.shutdown(shutdown_timeout).await.is_err() {
                    exit_code = 2;
                }
            }
        }

        info!(exit_code, "application shutdown complete");
        ExitCode::from(exit_code)
    }
}
