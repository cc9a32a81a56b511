//! Retail listing repository.
//!
//! Listings arrive only through the user-triggered import endpoint; the
//! scheduler never sweeps this table.

use crate::data::models::{RetailListing, UpsertCounts};
use crate::error::Result;
use crate::parsers::ParsedRetailListing;
use sqlx::PgPool;

#[derive(Clone)]
pub struct RetailRepo {
    pool: PgPool,
}

impl RetailRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, product_id: &str) -> Result<Option<RetailListing>> {
        let listing =
            sqlx::query_as::<_, RetailListing>("SELECT * FROM retail_listings WHERE product_id = $1")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(listing)
    }

    /// Upsert one page of pasted product cards.
    pub async fn batch_upsert(
        &self,
        listings: &[ParsedRetailListing],
        source_url: &str,
    ) -> Result<UpsertCounts> {
        if listings.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let mut product_ids: Vec<String> = Vec::with_capacity(listings.len());
        let mut names: Vec<Option<String>> = Vec::with_capacity(listings.len());
        let mut prices: Vec<Option<i64>> = Vec::with_capacity(listings.len());
        let mut sold_counts: Vec<Option<i32>> = Vec::with_capacity(listings.len());

        for listing in listings {
            product_ids.push(listing.product_id.clone());
            names.push(listing.name.clone());
            prices.push(listing.price_cents);
            sold_counts.push(listing.sold_count);
        }

        let created_flags: Vec<(bool,)> = sqlx::query_as(
            r#"
            INSERT INTO retail_listings (
                product_id, name, price_cents, sold_count, source_url,
                scrape_status, last_scraped_at, next_scrape_at, updated_at
            )
            SELECT v.product_id, v.name, v.price, v.sold, $5,
                   'success', NOW(), NOW() + INTERVAL '30 days', NOW()
            FROM UNNEST($1::text[], $2::text[], $3::bigint[], $4::int[])
                AS v(product_id, name, price, sold)
            ON CONFLICT (product_id) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, retail_listings.name),
                price_cents = COALESCE(EXCLUDED.price_cents, retail_listings.price_cents),
                sold_count = COALESCE(EXCLUDED.sold_count, retail_listings.sold_count),
                source_url = EXCLUDED.source_url,
                scrape_status = 'success',
                last_scraped_at = NOW(),
                next_scrape_at = NOW() + make_interval(days => retail_listings.scrape_interval_days),
                is_active = TRUE,
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&product_ids)
        .bind(&names)
        .bind(&prices)
        .bind(&sold_counts)
        .bind(source_url)
        .fetch_all(&self.pool)
        .await?;

        let created = created_flags.iter().filter(|(c,)| *c).count();
        Ok(UpsertCounts {
            created,
            updated: created_flags.len() - created,
            total: created_flags.len(),
        })
    }
}
