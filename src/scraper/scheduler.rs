//! Periodic job producer.
//!
//! The sweep scans each source repository for due rows and undiscovered
//! identifiers, assigns priorities (newly discovered HIGH, overdue by more
//! than one interval MEDIUM, on-schedule NORMAL), de-duplicates against jobs
//! already live in the queue, and batch-inserts the rest. Trigger-all is the
//! same path with the interval check bypassed.

use crate::config::SchedulerConfig;
use crate::data::jobs::{JobQueue, NewJob};
use crate::data::marketplace::MarketplaceRepo;
use crate::data::metadata::MetadataRepo;
use crate::data::models::{JobPayload, ScrapePriority, Source};
use crate::data::reddit::RedditRepo;
use crate::data::retirement::RetirementRepo;
use crate::error::Result;
use crate::scraper::detector::MissingDataDetector;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on items considered per source per sweep.
const SWEEP_LIMIT: i64 = 500;

/// Per-source sweep outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStats {
    pub source: Source,
    pub items_found: usize,
    pub jobs_enqueued: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PriorityCounts {
    #[serde(rename = "HIGH")]
    pub high: usize,
    #[serde(rename = "MEDIUM")]
    pub medium: usize,
    #[serde(rename = "NORMAL")]
    pub normal: usize,
    #[serde(rename = "LOW")]
    pub low: usize,
}

impl PriorityCounts {
    fn bump(&mut self, priority: ScrapePriority) {
        match priority {
            ScrapePriority::High => self.high += 1,
            ScrapePriority::Medium => self.medium += 1,
            ScrapePriority::Normal => self.normal += 1,
            ScrapePriority::Low => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sources: Vec<SweepStats>,
    pub jobs_enqueued: usize,
    pub priority_counts: PriorityCounts,
}

/// Repositories the sweep scans.
#[derive(Clone)]
pub struct SweepRepos {
    pub marketplace: MarketplaceRepo,
    pub retirement: RetirementRepo,
    pub metadata: MetadataRepo,
    pub reddit: RedditRepo,
}

pub struct Scheduler {
    queue: JobQueue,
    repos: SweepRepos,
    detector: Arc<MissingDataDetector>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        queue: JobQueue,
        repos: SweepRepos,
        detector: Arc<MissingDataDetector>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            repos,
            detector,
            config,
        }
    }

    /// Runs the scheduler's main loop with graceful shutdown support.
    ///
    /// Wakes every `sweep_interval` to scan and enqueue; the missing-data
    /// detector runs on its own slower cadence inside the same loop. Work is
    /// spawned on a cancellable task so shutdown stays responsive even when
    /// a sweep is blocked on the database.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Scheduler service started");

        let mut next_run = time::Instant::now();
        let mut current_work: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;
        // Run detection immediately on the first cycle
        let mut last_detect = std::time::Instant::now() - self.config.detect_interval;

        loop {
            tokio::select! {
                _ = time::sleep_until(next_run) => {
                    let cancel_token = CancellationToken::new();
                    let should_detect = last_detect.elapsed() >= self.config.detect_interval;

                    let work_handle = tokio::spawn({
                        let scheduler = self.clone();
                        let cancel_token = cancel_token.clone();

                        async move {
                            tokio::select! {
                                _ = async {
                                    if should_detect
                                        && let Err(e) = scheduler.detector.detect().await
                                    {
                                        error!(error = %e, "Missing-data detection failed");
                                    }

                                    match scheduler.sweep(false).await {
                                        Ok(report) => {
                                            if report.jobs_enqueued > 0 {
                                                info!(
                                                    jobs_enqueued = report.jobs_enqueued,
                                                    "Sweep enqueued jobs"
                                                );
                                            }
                                        }
                                        Err(e) => error!(error = %e, "Sweep failed"),
                                    }
                                } => {}
                                _ = cancel_token.cancelled() => {
                                    debug!("Scheduling work cancelled gracefully");
                                }
                            }
                        }
                    });

                    if should_detect {
                        last_detect = std::time::Instant::now();
                    }

                    current_work = Some((work_handle, cancel_token));
                    next_run = time::Instant::now() + self.config.sweep_interval;
                }
                _ = shutdown_rx.recv() => {
                    info!("Scheduler received shutdown signal");

                    if let Some((handle, cancel_token)) = current_work.take() {
                        cancel_token.cancel();

                        if tokio::time::timeout(std::time::Duration::from_secs(5), handle).await.is_err() {
                            warn!("Scheduling work did not complete within 5s, abandoning");
                        } else {
                            debug!("Scheduling work completed gracefully");
                        }
                    }

                    info!("Scheduler exiting gracefully");
                    break;
                }
            }
        }
    }

    /// One pass over every scheduled source. `force` bypasses the interval
    /// check (trigger-all) but still de-duplicates against the live queue.
    /// A failing source is reported in its stats, never fatal to the sweep.
    pub async fn sweep(&self, force: bool) -> Result<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport {
            sources: Vec::new(),
            jobs_enqueued: 0,
            priority_counts: PriorityCounts::default(),
        };

        for source in Source::scheduled() {
            let stats = match self.sweep_source(source, force, now, &mut report.priority_counts).await
            {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(source = %source, error = %e, "Sweep failed for source");
                    SweepStats {
                        source,
                        items_found: 0,
                        jobs_enqueued: 0,
                        errors: vec![e.to_string()],
                    }
                }
            };

            debug!(
                source = %stats.source,
                items_found = stats.items_found,
                jobs_enqueued = stats.jobs_enqueued,
                "Sweep source done"
            );
            report.jobs_enqueued += stats.jobs_enqueued;
            report.sources.push(stats);
        }

        Ok(report)
    }

    async fn sweep_source(
        &self,
        source: Source,
        force: bool,
        now: DateTime<Utc>,
        priority_counts: &mut PriorityCounts,
    ) -> Result<SweepStats> {
        let mut candidates = match source {
            Source::Marketplace => self.marketplace_candidates(force, now).await?,
            Source::MetadataSite => self.metadata_candidates(force, now).await?,
            Source::Reddit => self.reddit_candidates(force, now).await?,
            Source::RetirementTracker => self.retirement_candidates(force).await?,
            Source::RetailListing => Vec::new(), // user-triggered only
        };

        // Newly discovered identifiers jump the line.
        match source {
            Source::Marketplace => {
                for id in self.repos.marketplace.find_new_identifiers().await? {
                    candidates.push((id, ScrapePriority::High));
                }
            }
            Source::MetadataSite => {
                for id in self.repos.metadata.find_new_identifiers().await? {
                    candidates.push((id, ScrapePriority::High));
                }
            }
            Source::Reddit => {
                for id in self.repos.reddit.find_new_identifiers().await? {
                    candidates.push((id, ScrapePriority::High));
                }
            }
            Source::RetirementTracker | Source::RetailListing => {}
        }

        let items_found = candidates.len();

        let name = source.job_name();
        let identifiers: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
        let existing = self
            .queue
            .find_existing_identifiers(name, &identifiers)
            .await?;

        let mut skipped = 0usize;
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        let mut enqueued_priorities = Vec::new();
        for (identifier, priority) in candidates {
            if existing.contains(&identifier) || !seen.insert(identifier.clone()) {
                skipped += 1;
                continue;
            }
            let payload = serde_json::to_value(JobPayload::new(identifier))
                .expect("job payload serializes");
            jobs.push(NewJob::new(name, payload, priority));
            enqueued_priorities.push(priority);
        }

        if skipped > 0 {
            debug!(source = %source, count = skipped, "Skipped items with existing jobs");
        }

        let inserted = self.queue.batch_enqueue(&jobs).await?;
        for priority in enqueued_priorities.iter().take(inserted.len()) {
            priority_counts.bump(*priority);
        }

        Ok(SweepStats {
            source,
            items_found,
            jobs_enqueued: inserted.len(),
            errors: Vec::new(),
        })
    }

    async fn marketplace_candidates(
        &self,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, ScrapePriority)>> {
        if force {
            let keys = self.repos.marketplace.all_active_keys(SWEEP_LIMIT).await?;
            return Ok(keys.into_iter().map(|k| (k, ScrapePriority::Normal)).collect());
        }
        let due = self
            .repos
            .marketplace
            .find_items_needing_scraping(SWEEP_LIMIT)
            .await?;
        Ok(due
            .into_iter()
            .map(|item| {
                let priority = due_priority(item.next_scrape_at, item.scrape_interval_days, now);
                (item.item_id, priority)
            })
            .collect())
    }

    async fn metadata_candidates(
        &self,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, ScrapePriority)>> {
        if force {
            let keys = self.repos.metadata.all_active_keys(SWEEP_LIMIT).await?;
            return Ok(keys.into_iter().map(|k| (k, ScrapePriority::Normal)).collect());
        }
        let due = self
            .repos
            .metadata
            .find_items_needing_scraping(SWEEP_LIMIT)
            .await?;
        Ok(due
            .into_iter()
            .map(|set| {
                let priority = due_priority(set.next_scrape_at, set.scrape_interval_days, now);
                (set.set_number, priority)
            })
            .collect())
    }

    async fn reddit_candidates(
        &self,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, ScrapePriority)>> {
        if force {
            let keys = self.repos.reddit.all_active_keys(SWEEP_LIMIT).await?;
            return Ok(keys.into_iter().map(|k| (k, ScrapePriority::Normal)).collect());
        }
        let due = self
            .repos
            .reddit
            .find_items_needing_scraping(SWEEP_LIMIT)
            .await?;
        Ok(due
            .into_iter()
            .map(|volume| {
                let priority = due_priority(volume.next_scrape_at, volume.scrape_interval_days, now);
                (volume.set_number, priority)
            })
            .collect())
    }

    /// The retirement tracker is one page: a single page job covers every
    /// due row.
    async fn retirement_candidates(&self, force: bool) -> Result<Vec<(String, ScrapePriority)>> {
        if force {
            return Ok(vec![("all".to_string(), ScrapePriority::Normal)]);
        }

        let due = self.repos.retirement.find_items_needing_scraping(1).await?;
        if due.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![("all".to_string(), ScrapePriority::Normal)])
        }
    }
}

/// Priority for a due row: never-scraped rows are HIGH, overdue by more
/// than one interval is MEDIUM, on-schedule is NORMAL.
fn due_priority(
    next_scrape_at: Option<DateTime<Utc>>,
    interval_days: i32,
    now: DateTime<Utc>,
) -> ScrapePriority {
    match next_scrape_at {
        None => ScrapePriority::High,
        Some(next) => {
            if now - next > ChronoDuration::days(i64::from(interval_days)) {
                ScrapePriority::Medium
            } else {
                ScrapePriority::Normal
            }
        }
    }
}
