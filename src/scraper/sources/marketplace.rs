//! Marketplace catalog scraper.
//!
//! Item pages sit behind bot detection, so fetches go through the browser
//! service. The marketplace serves catalog pages at
//! `/catalog/catalogitem.page?{S|B|G}=<itemID>`.

use super::{AttemptOutcome, ScrapeTask, SourceContext, SourceScrape, not_found_horizon};
use crate::data::marketplace::MarketplaceRepo;
use crate::data::models::{ImageStatus, Source};
use crate::data::products::ProductRepo;
use crate::error::{Result, ScrapeError};
use crate::fetch::FetchRequest;
use crate::parsers::marketplace::parse_item_page;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static ITEM_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{3,7}(-[0-9]+)?$").unwrap());

pub struct MarketplaceScraper {
    base_url: String,
    repo: MarketplaceRepo,
    products: ProductRepo,
}

impl MarketplaceScraper {
    pub fn new(base_url: String, repo: MarketplaceRepo, products: ProductRepo) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            repo,
            products,
        }
    }

    fn item_url(&self, task: &ScrapeTask) -> String {
        format!(
            "{}/catalog/catalogitem.page?S={}",
            self.base_url, task.identifier
        )
    }
}

#[async_trait::async_trait]
impl SourceScrape for MarketplaceScraper {
    fn source(&self) -> Source {
        Source::Marketplace
    }

    fn session_url(&self, task: &ScrapeTask) -> Result<String> {
        if let Some(ref url) = task.url {
            return Ok(url.clone());
        }
        if !ITEM_ID.is_match(&task.identifier) {
            return Err(ScrapeError::InputInvalid(format!(
                "malformed marketplace item id '{}'",
                task.identifier
            )));
        }
        Ok(self.item_url(task))
    }

    async fn attempt(
        &self,
        ctx: &SourceContext,
        task: &ScrapeTask,
        session_id: Option<i64>,
    ) -> Result<AttemptOutcome> {
        let url = self.session_url(task)?;
        let request = FetchRequest::browser(&url).with_selector("#item-name-title");

        let response = match ctx
            .fetch_and_store(self.source(), session_id, request, task.skip_rate_limit)
            .await
        {
            // Direct-fetch source: a 404 is the site's not-found answer.
            Err(ScrapeError::FetchHttp(404)) => {
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

        let item = match parse_item_page(&response.body, &url) {
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

        // External sites occasionally normalize ids; the parsed record wins.
        if item.item_id != task.identifier {
            warn!(
                requested = %task.identifier,
                parsed = %item.item_id,
                "marketplace returned a different item id"
            );
        }

        if !task.save_to_db {
            return Ok(AttemptOutcome {
                records_found: 1,
                ..Default::default()
            });
        }

        let image_status = match item.image_url {
            Some(ref image_url) => match ctx.images.download(image_url, &item.item_id).await {
                Ok(()) => ImageStatus::Success,
                Err(e) => {
                    warn!(item_id = %item.item_id, error = %e, "image download failed");
                    ImageStatus::Failed
                }
            },
            None => ImageStatus::Skipped,
        };

        self.repo.upsert(&item, Some(image_status)).await?;

        if let Some(ref set_number) = item.set_number {
            self.products
                .upsert(set_number, Some(&item.item_id), item.name.as_deref())
                .await?;
        }

        Ok(AttemptOutcome {
            records_found: 1,
            records_stored: 1,
            not_found: false,
        })
    }
}
