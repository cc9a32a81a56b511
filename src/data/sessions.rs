//! Scrape-session recorder.
//!
//! One row per scrape attempt that reaches the fetch stage. Opened before
//! the first fetch, closed by the owning worker with final counters.

use crate::data::models::{ScrapeSession, SessionStatus, Source};
use crate::error::Result;
use sqlx::PgPool;

#[derive(Clone)]
pub struct SessionRecorder {
    pool: PgPool,
}

impl SessionRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a session row, returning its id.
    pub async fn open(&self, source: Source, source_url: &str) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO scrape_sessions (source, source_url) VALUES ($1, $2) RETURNING id",
        )
        .bind(source.as_str())
        .bind(source_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Close a session with its final status and counters.
    pub async fn close(
        &self,
        session_id: i64,
        status: SessionStatus,
        products_found: i32,
        products_stored: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scrape_sessions
             SET status = $2, products_found = $3, products_stored = $4
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(status.as_str())
        .bind(products_found)
        .bind(products_stored)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, session_id: i64) -> Result<Option<ScrapeSession>> {
        let session =
            sqlx::query_as::<_, ScrapeSession>("SELECT * FROM scrape_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(session)
    }
}
