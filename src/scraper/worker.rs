//! Queue consumers.
//!
//! Each worker runs in its own task and continuously polls the shared queue.
//! Concurrency across workers is bounded by the per-domain rate limiter, not
//! by pool size. A worker never crashes its loop: every failure is reported
//! through the queue.

use crate::data::jobs::JobQueue;
use crate::data::models::{Job, JobPayload, Source};
use crate::scraper::sources::{ScrapeTask, ScraperSet, SourceContext};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

/// Poll interval when the queue is empty.
const IDLE_POLL: Duration = Duration::from_secs(5);

/// Backoff after a failed claim (shared store hiccup).
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(10);

pub struct Worker {
    id: usize, // For logging purposes
    queue: JobQueue,
    scrapers: Arc<ScraperSet>,
    ctx: Arc<SourceContext>,
}

impl Worker {
    pub fn new(id: usize, queue: JobQueue, scrapers: Arc<ScraperSet>, ctx: Arc<SourceContext>) -> Self {
        Self {
            id,
            queue,
            scrapers,
            ctx,
        }
    }

    /// Runs the worker's main loop until shutdown.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = self.id, "Worker started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = self.id, "Worker received shutdown signal");
                    break;
                }
                claimed = self.queue.claim() => match claimed {
                    Ok(Some(job)) => {
                        debug!(worker_id = self.id, job_id = job.id, name = %job.name, "Processing job");
                        self.process(job).await;
                    }
                    Ok(None) => {
                        trace!(worker_id = self.id, "No jobs available, waiting");
                        tokio::select! {
                            _ = time::sleep(IDLE_POLL) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                    Err(e) => {
                        warn!(worker_id = self.id, error = %e, "Failed to claim job");
                        tokio::select! {
                            _ = time::sleep(CLAIM_ERROR_BACKOFF) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
            }
        }
        info!(worker_id = self.id, "Worker exiting");
    }

    /// Dispatch one claimed job to its source scraper and report the
    /// outcome. Ack/fail on an obliterated job is a silent no-op inside the
    /// queue.
    async fn process(&self, job: Job) {
        let job_id = job.id;

        let Some(source) = Source::from_job_name(&job.name) else {
            self.fail_terminal(job_id, &format!("unknown job name '{}'", job.name))
                .await;
            return;
        };

        let payload: JobPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail_terminal(job_id, &format!("malformed job payload: {e}"))
                    .await;
                return;
            }
        };

        let Some(scraper) = self.scrapers.get(source) else {
            self.fail_terminal(job_id, &format!("no scraper registered for '{source}'"))
                .await;
            return;
        };

        let task = ScrapeTask {
            identifier: payload.identifier,
            url: payload.url,
            save_to_db: true,
            skip_rate_limit: false,
            skip_breaker: payload.force.unwrap_or(false),
        };

        let result = scraper.scrape(&self.ctx, &task).await;
        let attempts = result.retries.max(1) as i32;

        if result.success {
            debug!(
                worker_id = self.id,
                job_id,
                not_found = result.not_found,
                records_stored = result.records_stored,
                "Job completed"
            );
            let value = json!({
                "notFound": result.not_found,
                "recordsFound": result.records_found,
                "recordsStored": result.records_stored,
                "retries": result.retries,
            });
            if let Err(e) = self.queue.ack(job_id, &value, attempts).await {
                error!(worker_id = self.id, job_id, error = %e, "Failed to ack job");
            }
            return;
        }

        let reason = result
            .error
            .unwrap_or_else(|| "scrape failed without detail".to_string());

        if result.no_retry {
            self.fail_terminal(job_id, &reason).await;
            return;
        }

        match self.queue.fail(job_id, &reason, attempts).await {
            Ok(state) => {
                debug!(worker_id = self.id, job_id, ?state, reason, "Job failed");
            }
            Err(e) => {
                error!(worker_id = self.id, job_id, error = %e, "Failed to report job failure");
            }
        }
    }

    async fn fail_terminal(&self, job_id: i64, reason: &str) {
        warn!(worker_id = self.id, job_id, reason, "Job terminally failed");
        if let Err(e) = self.queue.fail_terminal(job_id, reason).await {
            error!(worker_id = self.id, job_id, error = %e, "Failed to terminally fail job");
        }
    }
}
