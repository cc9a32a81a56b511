//! Missing-data detector.
//!
//! Cross-repository queries find products whose dependent records are absent
//! or incomplete, and close the loop by enqueueing gap-filling jobs. Absent
//! records are urgent (HIGH); records that exist but are incomplete are
//! routine re-checks (NORMAL).

use crate::data::jobs::{JobQueue, NewJob};
use crate::data::marketplace::MarketplaceRepo;
use crate::data::metadata::MetadataRepo;
use crate::data::models::{JobPayload, ScrapePriority, Source};
use crate::data::retirement::RetirementRepo;
use crate::error::Result;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectReport {
    pub jobs_enqueued: usize,
    pub missing_volume: usize,
    pub missing_metadata: usize,
    pub missing_retirement: usize,
    pub incomplete_metadata: usize,
}

pub struct MissingDataDetector {
    queue: JobQueue,
    marketplace: MarketplaceRepo,
    metadata: MetadataRepo,
    retirement: RetirementRepo,
}

impl MissingDataDetector {
    pub fn new(
        queue: JobQueue,
        marketplace: MarketplaceRepo,
        metadata: MetadataRepo,
        retirement: RetirementRepo,
    ) -> Self {
        Self {
            queue,
            marketplace,
            metadata,
            retirement,
        }
    }

    /// One detection pass. Every gap becomes an enqueue call, de-duplicated
    /// against jobs already live in the queue.
    pub async fn detect(&self) -> Result<DetectReport> {
        let mut report = DetectReport::default();

        // Marketplace rows scraped successfully but without volume buckets.
        let missing_volume = self.marketplace.find_missing_volume().await?;
        report.missing_volume = missing_volume.len();
        report.jobs_enqueued += self
            .enqueue_batch(Source::Marketplace, &missing_volume, ScrapePriority::High)
            .await?;

        // Products with a set number but no metadata row at all.
        let missing_metadata = self.metadata.find_new_identifiers().await?;
        report.missing_metadata = missing_metadata.len();
        report.jobs_enqueued += self
            .enqueue_batch(Source::MetadataSite, &missing_metadata, ScrapePriority::High)
            .await?;

        // Metadata rows that exist but never got their core fields; these
        // re-check at normal priority.
        let incomplete_metadata = self.metadata.find_incomplete().await?;
        report.incomplete_metadata = incomplete_metadata.len();
        report.jobs_enqueued += self
            .enqueue_batch(
                Source::MetadataSite,
                &incomplete_metadata,
                ScrapePriority::Normal,
            )
            .await?;

        // The retirement tracker is one page; any missing set means the page
        // is due for a fresh batch scrape.
        let missing_retirement = self.retirement.find_new_identifiers().await?;
        report.missing_retirement = missing_retirement.len();
        if !missing_retirement.is_empty() {
            let all = vec!["all".to_string()];
            report.jobs_enqueued += self
                .enqueue_batch(Source::RetirementTracker, &all, ScrapePriority::High)
                .await?;
        }

        info!(
            jobs_enqueued = report.jobs_enqueued,
            missing_volume = report.missing_volume,
            missing_metadata = report.missing_metadata,
            missing_retirement = report.missing_retirement,
            incomplete_metadata = report.incomplete_metadata,
            "missing-data detection complete"
        );

        Ok(report)
    }

    async fn enqueue_batch(
        &self,
        source: Source,
        identifiers: &[String],
        priority: ScrapePriority,
    ) -> Result<usize> {
        if identifiers.is_empty() {
            return Ok(0);
        }

        let name = source.job_name();
        let existing = self
            .queue
            .find_existing_identifiers(name, identifiers)
            .await?;

        let jobs: Vec<NewJob> = identifiers
            .iter()
            .filter(|id| !existing.contains(*id))
            .map(|id| {
                let payload = serde_json::to_value(JobPayload::new(id.clone()))
                    .unwrap_or_else(|_| serde_json::json!({ "identifier": id }));
                NewJob::new(name, payload, priority)
            })
            .collect();

        let inserted = self.queue.batch_enqueue(&jobs).await?;
        Ok(inserted.len())
    }
}
