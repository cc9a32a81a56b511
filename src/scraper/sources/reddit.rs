//! Community board scraper.
//!
//! Unauthenticated JSON search endpoint keyed by set number. Zero hits is a
//! normal zero-volume record; the not-found outcome only applies when the
//! endpoint itself says the resource is gone.

use super::{AttemptOutcome, ScrapeTask, SourceContext, SourceScrape, not_found_horizon};
use crate::data::models::Source;
use crate::data::reddit::RedditRepo;
use crate::error::{Result, ScrapeError};
use crate::fetch::FetchRequest;
use crate::parsers::reddit::parse_search_json;
use regex::Regex;
use std::sync::LazyLock;

static SET_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{3,7}$").unwrap());

pub struct RedditScraper {
    base_url: String,
    repo: RedditRepo,
}

impl RedditScraper {
    pub fn new(base_url: String, repo: RedditRepo) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            repo,
        }
    }

    fn search_url(&self, set_number: &str) -> String {
        format!(
            "{}/search.json?q=%22{}%22&limit=100&sort=new",
            self.base_url,
            urlencoding::encode(set_number)
        )
    }
}

#[async_trait::async_trait]
impl SourceScrape for RedditScraper {
    fn source(&self) -> Source {
        Source::Reddit
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
        let url = self.session_url(task)?;

        let response = match ctx
            .fetch_and_store(
                self.source(),
                session_id,
                FetchRequest::simple(&url),
                task.skip_rate_limit,
            )
            .await
        {
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

        let volume = parse_search_json(&response.body, &url, &task.identifier)?;

        if !task.save_to_db {
            return Ok(AttemptOutcome {
                records_found: 1,
                ..Default::default()
            });
        }

        self.repo.upsert(&volume).await?;

        Ok(AttemptOutcome {
            records_found: 1,
            records_stored: 1,
            not_found: false,
        })
    }
}
