//! The scraping pipeline service: scheduler, worker pool, and their
//! lifecycle under the application's service supervisor.

pub mod detector;
pub mod images;
pub mod scheduler;
pub mod sources;
pub mod worker;

use crate::data::jobs::JobQueue;
use crate::services::Service;
use crate::status::{ServiceStatus, ServiceStatusRegistry};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use self::scheduler::Scheduler;
use self::sources::{ScraperSet, SourceContext};
use self::worker::Worker;

/// Owns the scheduler task and the worker pool.
pub struct ScraperService {
    queue: JobQueue,
    scheduler: Arc<Scheduler>,
    scrapers: Arc<ScraperSet>,
    ctx: Arc<SourceContext>,
    worker_count: usize,
    service_statuses: ServiceStatusRegistry,
    scheduler_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl ScraperService {
    pub fn new(
        queue: JobQueue,
        scheduler: Arc<Scheduler>,
        scrapers: Arc<ScraperSet>,
        ctx: Arc<SourceContext>,
        worker_count: usize,
        service_statuses: ServiceStatusRegistry,
    ) -> Self {
        Self {
            queue,
            scheduler,
            scrapers,
            ctx,
            worker_count,
            service_statuses,
            scheduler_handle: None,
            worker_handles: Vec::new(),
            shutdown_tx: None,
        }
    }

    /// Starts the scheduler and the worker pool.
    ///
    /// Force-unlocks any jobs left active by a previous unclean shutdown
    /// before spawning workers, so those jobs re-enter the queue
    /// immediately.
    pub async fn start(&mut self) {
        match self.queue.force_unlock_all().await {
            Ok(0) => {}
            Ok(count) => warn!(count, "Force-unlocked stale jobs from previous run"),
            Err(e) => warn!(error = %e, "Failed to force-unlock stale jobs"),
        }

        info!("ScraperService starting");

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let scheduler = self.scheduler.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        self.scheduler_handle = Some(tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        }));
        info!("Scheduler task spawned");

        for i in 0..self.worker_count {
            let worker = Worker::new(
                i,
                self.queue.clone(),
                self.scrapers.clone(),
                self.ctx.clone(),
            );
            let shutdown_rx = shutdown_tx.subscribe();
            self.worker_handles.push(tokio::spawn(async move {
                worker.run(shutdown_rx).await;
            }));
        }
        info!(
            worker_count = self.worker_handles.len(),
            "Spawned worker tasks"
        );
        self.service_statuses.set("scraper", ServiceStatus::Active);
    }
}

#[async_trait::async_trait]
impl Service for ScraperService {
    fn name(&self) -> &'static str {
        "scraper"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.start().await;
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("scraper", ServiceStatus::Disabled);
        info!("Shutting down scraper service");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        } else {
            warn!("No shutdown channel found for scraper service");
            return Err(anyhow::anyhow!("No shutdown channel available"));
        }

        let mut all_handles = Vec::new();
        if let Some(handle) = self.scheduler_handle.take() {
            all_handles.push(handle);
        }
        all_handles.append(&mut self.worker_handles);

        let results = futures::future::join_all(all_handles).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(
                failed_count = failed,
                "Some scraper tasks panicked during shutdown"
            );
            return Err(anyhow::anyhow!("{} task(s) panicked", failed));
        }

        info!("All scraper tasks shutdown gracefully");
        Ok(())
    }
}
