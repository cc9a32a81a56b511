//! Metadata site repository.

use crate::data::models::{ImageStatus, MetadataSet};
use crate::error::Result;
use crate::parsers::ParsedMetadataSet;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct MetadataRepo {
    pool: PgPool,
}

impl MetadataRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, set_number: &str) -> Result<Option<MetadataSet>> {
        let set =
            sqlx::query_as::<_, MetadataSet>("SELECT * FROM metadata_sets WHERE set_number = $1")
                .bind(set_number)
                .fetch_optional(&self.pool)
                .await?;
        Ok(set)
    }

    /// Returns true when the row was created.
    pub async fn upsert(
        &self,
        set: &ParsedMetadataSet,
        image_status: Option<ImageStatus>,
    ) -> Result<bool> {
        let created: bool = sqlx::query_scalar(
            r#"
            INSERT INTO metadata_sets (
                set_number, name, year_released, pieces, minifigs, rrp_cents,
                product_url, image_url, image_status,
                scrape_status, last_scraped_at, next_scrape_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    'success', NOW(), NOW() + INTERVAL '90 days', NOW())
            ON CONFLICT (set_number) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, metadata_sets.name),
                year_released = COALESCE(EXCLUDED.year_released, metadata_sets.year_released),
                pieces = COALESCE(EXCLUDED.pieces, metadata_sets.pieces),
                minifigs = COALESCE(EXCLUDED.minifigs, metadata_sets.minifigs),
                rrp_cents = COALESCE(EXCLUDED.rrp_cents, metadata_sets.rrp_cents),
                product_url = COALESCE(EXCLUDED.product_url, metadata_sets.product_url),
                image_url = COALESCE(EXCLUDED.image_url, metadata_sets.image_url),
                image_status = COALESCE(EXCLUDED.image_status, metadata_sets.image_status),
                scrape_status = 'success',
                last_scraped_at = NOW(),
                next_scrape_at = NOW() + make_interval(days => metadata_sets.scrape_interval_days),
                is_active = TRUE,
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&set.set_number)
        .bind(&set.name)
        .bind(set.year_released)
        .bind(set.pieces)
        .bind(set.minifigs)
        .bind(set.rrp_cents)
        .bind(&set.product_url)
        .bind(&set.image_url)
        .bind(image_status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn mark_failed(&self, set_number: &str) -> Result<()> {
        sqlx::query(
            "UPDATE metadata_sets
             SET scrape_status = 'failed', updated_at = NOW()
             WHERE set_number = $1",
        )
        .bind(set_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The metadata site signals not-found by absence from search results.
    /// The row persists with a 90-day horizon so sweeps skip it.
    pub async fn mark_not_found(&self, set_number: &str, next_scrape_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metadata_sets
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

    pub async fn set_image_status(&self, set_number: &str, status: ImageStatus) -> Result<()> {
        sqlx::query(
            "UPDATE metadata_sets SET image_status = $2, updated_at = NOW() WHERE set_number = $1",
        )
        .bind(set_number)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_items_needing_scraping(&self, limit: i64) -> Result<Vec<MetadataSet>> {
        let sets = sqlx::query_as::<_, MetadataSet>(
            "SELECT * FROM metadata_sets
             WHERE is_active AND (next_scrape_at IS NULL OR next_scrape_at <= NOW())
             ORDER BY next_scrape_at ASC NULLS FIRST
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sets)
    }

    /// Rows scraped successfully whose core fields never arrived; the
    /// detector re-checks these at normal priority.
    pub async fn find_incomplete(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT set_number FROM metadata_sets
             WHERE is_active AND scrape_status = 'success'
               AND (pieces IS NULL OR rrp_cents IS NULL OR year_released IS NULL)",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    /// All active set numbers, for interval-bypassing force sweeps.
    pub async fn all_active_keys(&self, limit: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT set_number FROM metadata_sets WHERE is_active ORDER BY set_number LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    /// Product set numbers with no metadata row yet. New-discovery
    /// reachability: anything inserted into `products` shows up here until a
    /// metadata row exists.
    pub async fn find_new_identifiers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT p.set_number FROM products p
             LEFT JOIN metadata_sets m ON m.set_number = p.set_number
             WHERE m.set_number IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }
}
