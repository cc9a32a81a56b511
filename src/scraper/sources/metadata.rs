//! Metadata site scraper.
//!
//! Two-hop source: a search for the set number yields the concrete product
//! URL, which is then fetched for the record. Both hops run inside one
//! attempt, each with its own rate-limit wait and raw-payload row; a failure
//! on the second hop costs one attempt, not two. Absence from the search
//! results is the site's not-found signal.

use super::{AttemptOutcome, ScrapeTask, SourceContext, SourceScrape, not_found_horizon};
use crate::data::metadata::MetadataRepo;
use crate::data::models::{ImageStatus, Source};
use crate::error::{Result, ScrapeError};
use crate::fetch::FetchRequest;
use crate::parsers::metadata::{parse_product_page, parse_search_results};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static SET_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{3,7}$").unwrap());

pub struct MetadataScraper {
    base_url: String,
    repo: MetadataRepo,
}

impl MetadataScraper {
    pub fn new(base_url: String, repo: MetadataRepo) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            repo,
        }
    }

    fn search_url(&self, set_number: &str) -> String {
        format!(
            "{}/search?q={}",
            self.base_url,
            urlencoding::encode(set_number)
        )
    }
}

#[async_trait::async_trait]
impl SourceScrape for MetadataScraper {
    fn source(&self) -> Source {
        Source::MetadataSite
    }

    fn session_url(&self, task: &ScrapeTask) -> Result<String> {
        if !SET_NUMBER.is_match(&task.identifier) {
            return Err(ScrapeError::InputInvalid(format!(
                "malformed set number '{}'",
                task.identifier
            )));
        }
        Ok(self.search_url(&task.identifier))
    }

    async fn attempt(
        &self,
        ctx: &SourceContext,
        task: &ScrapeTask,
        session_id: Option<i64>,
    ) -> Result<AttemptOutcome> {
        let search_url = self.session_url(task)?;

        let search_response = ctx
            .fetch_and_store(
                self.source(),
                session_id,
                FetchRequest::simple(&search_url),
                task.skip_rate_limit,
            )
            .await?;

        let product_url = match parse_search_results(&search_response.body, &search_url) {
            Err(ScrapeError::SetNotFound) => {
                if task.save_to_db {
                    self.repo
                        .mark_not_found(&task.identifier, not_found_horizon())
                        .await?;
                }
                return Ok(AttemptOutcome {
                    not_found: true,
                    ..Default::default()
                });
            }
            other => other?,
        };

        // Second hop, same attempt: its own rate-limit and raw-payload cycle.
        let product_response = ctx
            .fetch_and_store(
                self.source(),
                session_id,
                FetchRequest::simple(&product_url),
                task.skip_rate_limit,
            )
            .await?;

        let set = parse_product_page(&product_response.body, &product_url, &task.identifier)?;

        if !task.save_to_db {
            return Ok(AttemptOutcome {
                records_found: 1,
                ..Default::default()
            });
        }

        let image_status = match set.image_url {
            Some(ref image_url) => match ctx.images.download(image_url, &set.set_number).await {
                Ok(()) => ImageStatus::Success,
                Err(e) => {
                    warn!(set_number = %set.set_number, error = %e, "image download failed");
                    ImageStatus::Failed
                }
            },
            None => ImageStatus::Skipped,
        };

        self.repo.upsert(&set, Some(image_status)).await?;

        Ok(AttemptOutcome {
            records_found: 1,
            records_stored: 1,
            not_found: false,
        })
    }
}
