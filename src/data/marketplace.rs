//! Marketplace item repository.

use crate::data::models::{ImageStatus, MarketplaceItem};
use crate::error::Result;
use crate::parsers::ParsedMarketplaceItem;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct MarketplaceRepo {
    pool: PgPool,
}

impl MarketplaceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, item_id: &str) -> Result<Option<MarketplaceItem>> {
        let item = sqlx::query_as::<_, MarketplaceItem>(
            "SELECT * FROM marketplace_items WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// Insert or update a scraped item. Null fields in the parsed record
    /// never overwrite stored values. Marks the row successfully scraped and
    /// schedules the next visit one interval out.
    ///
    /// Returns true when the row was created.
    pub async fn upsert(
        &self,
        item: &ParsedMarketplaceItem,
        image_status: Option<ImageStatus>,
    ) -> Result<bool> {
        let created: bool = sqlx::query_scalar(
            r#"
            INSERT INTO marketplace_items (
                item_id, item_type, set_number, name,
                current_price_new_cents, current_price_used_cents,
                avg_price_new_cents, avg_price_used_cents,
                times_sold_new, times_sold_used,
                image_url, image_status,
                scrape_status, last_scraped_at, next_scrape_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    'success', NOW(), NOW() + INTERVAL '7 days', NOW())
            ON CONFLICT (item_id) DO UPDATE SET
                item_type = EXCLUDED.item_type,
                set_number = COALESCE(EXCLUDED.set_number, marketplace_items.set_number),
                name = COALESCE(EXCLUDED.name, marketplace_items.name),
                current_price_new_cents =
                    COALESCE(EXCLUDED.current_price_new_cents, marketplace_items.current_price_new_cents),
                current_price_used_cents =
                    COALESCE(EXCLUDED.current_price_used_cents, marketplace_items.current_price_used_cents),
                avg_price_new_cents =
                    COALESCE(EXCLUDED.avg_price_new_cents, marketplace_items.avg_price_new_cents),
                avg_price_used_cents =
                    COALESCE(EXCLUDED.avg_price_used_cents, marketplace_items.avg_price_used_cents),
                times_sold_new = COALESCE(EXCLUDED.times_sold_new, marketplace_items.times_sold_new),
                times_sold_used = COALESCE(EXCLUDED.times_sold_used, marketplace_items.times_sold_used),
                image_url = COALESCE(EXCLUDED.image_url, marketplace_items.image_url),
                image_status = COALESCE(EXCLUDED.image_status, marketplace_items.image_status),
                scrape_status = 'success',
                last_scraped_at = NOW(),
                next_scrape_at = NOW() + make_interval(days => marketplace_items.scrape_interval_days),
                is_active = TRUE,
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&item.item_id)
        .bind(&item.item_type)
        .bind(&item.set_number)
        .bind(&item.name)
        .bind(item.current_price_new_cents)
        .bind(item.current_price_used_cents)
        .bind(item.avg_price_new_cents)
        .bind(item.avg_price_used_cents)
        .bind(item.times_sold_new)
        .bind(item.times_sold_used)
        .bind(&item.image_url)
        .bind(image_status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// Record a failed scrape. `next_scrape_at` is left alone so the next
    /// sweep retries the row.
    pub async fn mark_failed(&self, item_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE marketplace_items
             SET scrape_status = 'failed', updated_at = NOW()
             WHERE item_id = $1",
        )
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that the marketplace confirmed the item does not exist. The
    /// row must persist with its far-future `next_scrape_at` so the
    /// scheduler does not re-queue it, across restarts included.
    pub async fn mark_not_found(&self, item_id: &str, next_scrape_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO marketplace_items
                (item_id, scrape_status, last_scraped_at, next_scrape_at, scrape_interval_days, updated_at)
            VALUES ($1, 'not_found', NOW(), $2, 90, NOW())
            ON CONFLICT (item_id) DO UPDATE SET
                scrape_status = 'not_found',
                last_scraped_at = NOW(),
                next_scrape_at = $2,
                scrape_interval_days = 90,
                updated_at = NOW()
            "#,
        )
        .bind(item_id)
        .bind(next_scrape_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_image_status(&self, item_id: &str, status: ImageStatus) -> Result<()> {
        sqlx::query(
            "UPDATE marketplace_items SET image_status = $2, updated_at = NOW() WHERE item_id = $1",
        )
        .bind(item_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active rows due for scraping. Future-dated `not_found` rows never
    /// appear here; that is the invariant keeping dead items out of the
    /// queue.
    pub async fn find_items_needing_scraping(&self, limit: i64) -> Result<Vec<MarketplaceItem>> {
        let items = sqlx::query_as::<_, MarketplaceItem>(
            "SELECT * FROM marketplace_items
             WHERE is_active AND (next_scrape_at IS NULL OR next_scrape_at <= NOW())
             ORDER BY next_scrape_at ASC NULLS FIRST
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// All active item ids, for interval-bypassing force sweeps.
    pub async fn all_active_keys(&self, limit: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT item_id FROM marketplace_items WHERE is_active ORDER BY item_id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Marketplace item ids known to the product table with no row here yet.
    pub async fn find_new_identifiers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT p.item_id FROM products p
             LEFT JOIN marketplace_items m ON m.item_id = p.item_id
             WHERE p.item_id IS NOT NULL AND m.item_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Successfully scraped rows whose sold-volume buckets never arrived.
    /// The missing-data detector turns these into high-priority re-scrapes.
    pub async fn find_missing_volume(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT item_id FROM marketplace_items
             WHERE is_active AND scrape_status = 'success'
               AND times_sold_new IS NULL AND times_sold_used IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
