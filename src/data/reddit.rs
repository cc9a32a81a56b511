//! Community board mention-volume repository.

use crate::data::models::RedditVolume;
use crate::error::Result;
use crate::parsers::ParsedRedditVolume;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct RedditRepo {
    pool: PgPool,
}

impl RedditRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, set_number: &str) -> Result<Option<RedditVolume>> {
        let volume =
            sqlx::query_as::<_, RedditVolume>("SELECT * FROM reddit_volumes WHERE set_number = $1")
                .bind(set_number)
                .fetch_optional(&self.pool)
                .await?;
        Ok(volume)
    }

    /// Returns true when the row was created. Mention counts always
    /// overwrite (zero is meaningful); post details only fill gaps.
    pub async fn upsert(&self, volume: &ParsedRedditVolume) -> Result<bool> {
        let created: bool = sqlx::query_scalar(
            r#"
            INSERT INTO reddit_volumes (
                set_number, mention_count, latest_post_at, top_post_title, top_post_score,
                scrape_status, last_scraped_at, next_scrape_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 'success', NOW(), NOW() + INTERVAL '1 day', NOW())
            ON CONFLICT (set_number) DO UPDATE SET
                mention_count = EXCLUDED.mention_count,
                latest_post_at = COALESCE(EXCLUDED.latest_post_at, reddit_volumes.latest_post_at),
                top_post_title = COALESCE(EXCLUDED.top_post_title, reddit_volumes.top_post_title),
                top_post_score = COALESCE(EXCLUDED.top_post_score, reddit_volumes.top_post_score),
                scrape_status = 'success',
                last_scraped_at = NOW(),
                next_scrape_at = NOW() + make_interval(days => reddit_volumes.scrape_interval_days),
                is_active = TRUE,
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&volume.set_number)
        .bind(volume.mention_count)
        .bind(volume.latest_post_at)
        .bind(&volume.top_post_title)
        .bind(volume.top_post_score)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn mark_failed(&self, set_number: &str) -> Result<()> {
        sqlx::query(
            "UPDATE reddit_volumes
             SET scrape_status = 'failed', updated_at = NOW()
             WHERE set_number = $1",
        )
        .bind(set_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_not_found(&self, set_number: &str, next_scrape_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reddit_volumes
                (set_number, scrape_status, last_scraped_at, next_scrape_at, scrape_interval_days, updated_at)
            VALUES ($1, 'not_found', NOW(), $2, 90, NOW())
            ON CONFLICT (set_number) DO UPDATE SET
                scrape_status = 'not_found',
                last_scraped_at = NOW(),
                next_scrape_at = $2,
                scrape_interval_days = 90,
                updated_at = NOW()
            "#,
        )
        .bind(set_number)
        .bind(next_scrape_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_items_needing_scraping(&self, limit: i64) -> Result<Vec<RedditVolume>> {
        let volumes = sqlx::query_as::<_, RedditVolume>(
            "SELECT * FROM reddit_volumes
             WHERE is_active AND (next_scrape_at IS NULL OR next_scrape_at <= NOW())
             ORDER BY next_scrape_at ASC NULLS FIRST
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(volumes)
    }

    /// All active set numbers, for interval-bypassing force sweeps.
    pub async fn all_active_keys(&self, limit: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT set_number FROM reddit_volumes WHERE is_active ORDER BY set_number LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    pub async fn find_new_identifiers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT p.set_number FROM products p
             LEFT JOIN reddit_volumes r ON r.set_number = p.set_number
             WHERE r.set_number IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }
}
