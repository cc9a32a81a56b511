//! Retail listing importer.
//!
//! Not scheduler-driven: users paste a listing page's HTML plus its source
//! URL through the control plane. The pasted bytes go through the same
//! session and raw-payload path as fetched pages, so post-mortem re-parsing
//! works for imports too.

use super::SourceContext;
use crate::data::models::{SessionStatus, Source, UpsertCounts};
use crate::data::raw_payloads::SavePayload;
use crate::data::retail::RetailRepo;
use crate::error::Result;
use crate::parsers::retail::parse_listing_html;
use tracing::{info, warn};

pub struct RetailImporter {
    repo: RetailRepo,
}

impl RetailImporter {
    pub fn new(repo: RetailRepo) -> Self {
        Self { repo }
    }

    /// Parse and upsert one pasted listing page.
    pub async fn import(
        &self,
        ctx: &SourceContext,
        html: &str,
        source_url: &str,
    ) -> Result<UpsertCounts> {
        let session_id = ctx.sessions.open(Source::RetailListing, source_url).await?;

        ctx.raw_store
            .save(SavePayload {
                session_id,
                source: Source::RetailListing,
                source_url,
                body: html.as_bytes(),
                content_type: Some("text/html"),
                http_status: 200,
            })
            .await?;

        let listings = match parse_listing_html(html.as_bytes(), source_url) {
            Ok(listings) => listings,
            Err(e) => {
                if let Err(ce) = ctx
                    .sessions
                    .close(session_id, SessionStatus::Failed, 0, 0)
                    .await
                {
                    warn!(session_id, error = %ce, "failed to close import session");
                }
                return Err(e);
            }
        };

        let counts = self.repo.batch_upsert(&listings, source_url).await?;

        ctx.sessions
            .close(
                session_id,
                SessionStatus::Success,
                listings.len() as i32,
                counts.total as i32,
            )
            .await?;

        info!(
            source_url,
            found = listings.len(),
            created = counts.created,
            updated = counts.updated,
            "retail listing imported"
        );

        Ok(counts)
    }
}
