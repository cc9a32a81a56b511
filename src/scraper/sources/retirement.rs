//! Retirement tracker scraper.
//!
//! One browser-rendered page carries every tracked set across all themes;
//! a single scrape is a full batch upsert, and previously-active sets that
//! fell off the page are deactivated.

use super::{AttemptOutcome, ScrapeTask, SourceContext, SourceScrape};
use crate::data::models::Source;
use crate::data::products::ProductRepo;
use crate::data::retirement::RetirementRepo;
use crate::error::Result;
use crate::fetch::FetchRequest;
use crate::parsers::retirement::parse_tracker_page;

pub struct RetirementScraper {
    page_url: String,
    repo: RetirementRepo,
    products: ProductRepo,
}

impl RetirementScraper {
    pub fn new(page_url: String, repo: RetirementRepo, products: ProductRepo) -> Self {
        Self {
            page_url,
            repo,
            products,
        }
    }
}

#[async_trait::async_trait]
impl SourceScrape for RetirementScraper {
    fn source(&self) -> Source {
        Source::RetirementTracker
    }

    fn session_url(&self, task: &ScrapeTask) -> Result<String> {
        Ok(task.url.clone().unwrap_or_else(|| self.page_url.clone()))
    }

    async fn attempt(
        &self,
        ctx: &SourceContext,
        task: &ScrapeTask,
        session_id: Option<i64>,
    ) -> Result<AttemptOutcome> {
        let url = self.session_url(task)?;
        let request = FetchRequest::browser(&url).with_selector("tr.set-row");

        let response = ctx
            .fetch_and_store(self.source(), session_id, request, task.skip_rate_limit)
            .await?;

        let sets = parse_tracker_page(&response.body, &url)?;

        if !task.save_to_db {
            return Ok(AttemptOutcome {
                records_found: sets.len(),
                ..Default::default()
            });
        }

        for set in &sets {
            self.products
                .upsert(&set.set_number, None, set.name.as_deref())
                .await?;
        }

        let counts = self.repo.batch_upsert(&sets).await?;

        Ok(AttemptOutcome {
            records_found: sets.len(),
            records_stored: counts.total,
            not_found: false,
        })
    }
}
