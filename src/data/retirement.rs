//! Retirement tracker repository.
//!
//! The tracker is a batch source: one fetch yields every tracked set across
//! all themes, so the write path is a single UNNEST upsert plus a
//! deactivation pass for sets that fell off the page.

use crate::data::models::{RetirementSet, UpsertCounts};
use crate::error::Result;
use crate::parsers::ParsedRetirementSet;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[derive(Clone)]
pub struct RetirementRepo {
    pool: PgPool,
}

impl RetirementRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, set_number: &str) -> Result<Option<RetirementSet>> {
        let set =
            sqlx::query_as::<_, RetirementSet>("SELECT * FROM retirement_sets WHERE set_number = $1")
                .bind(set_number)
                .fetch_optional(&self.pool)
                .await?;
        Ok(set)
    }

    /// Upsert every set from one tracker page in a single round-trip, then
    /// deactivate previously-active sets absent from this batch.
    pub async fn batch_upsert(&self, sets: &[ParsedRetirementSet]) -> Result<UpsertCounts> {
        if sets.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let mut set_numbers: Vec<String> = Vec::with_capacity(sets.len());
        let mut themes: Vec<Option<String>> = Vec::with_capacity(sets.len());
        let mut names: Vec<Option<String>> = Vec::with_capacity(sets.len());
        let mut prices: Vec<Option<i64>> = Vec::with_capacity(sets.len());
        let mut dates: Vec<Option<chrono::NaiveDate>> = Vec::with_capacity(sets.len());
        let mut statuses: Vec<Option<String>> = Vec::with_capacity(sets.len());

        for set in sets {
            set_numbers.push(set.set_number.clone());
            themes.push(set.theme.clone());
            names.push(set.name.clone());
            prices.push(set.retail_price_cents);
            dates.push(set.expected_retirement_date);
            statuses.push(set.retirement_status.clone());
        }

        let mut tx = self.pool.begin().await?;

        let created_flags: Vec<(bool,)> = sqlx::query_as(
            r#"
            INSERT INTO retirement_sets (
                set_number, theme, name, retail_price_cents,
                expected_retirement_date, retirement_status,
                scrape_status, last_scraped_at, next_scrape_at, updated_at
            )
            SELECT v.set_number, v.theme, v.name, v.price, v.date, v.status,
                   'success', NOW(), NOW() + INTERVAL '30 days', NOW()
            FROM UNNEST($1::text[], $2::text[], $3::text[], $4::bigint[], $5::date[], $6::text[])
                AS v(set_number, theme, name, price, date, status)
            ON CONFLICT (set_number) DO UPDATE SET
                theme = COALESCE(EXCLUDED.theme, retirement_sets.theme),
                name = COALESCE(EXCLUDED.name, retirement_sets.name),
                retail_price_cents =
                    COALESCE(EXCLUDED.retail_price_cents, retirement_sets.retail_price_cents),
                expected_retirement_date =
                    COALESCE(EXCLUDED.expected_retirement_date, retirement_sets.expected_retirement_date),
                retirement_status =
                    COALESCE(EXCLUDED.retirement_status, retirement_sets.retirement_status),
                scrape_status = 'success',
                last_scraped_at = NOW(),
                next_scrape_at = NOW() + make_interval(days => retirement_sets.scrape_interval_days),
                is_active = TRUE,
                updated_at = NOW()
            RETURNING (xmax = 0)
            "#,
        )
        .bind(&set_numbers)
        .bind(&themes)
        .bind(&names)
        .bind(&prices)
        .bind(&dates)
        .bind(&statuses)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE retirement_sets
             SET is_active = FALSE, updated_at = NOW()
             WHERE is_active AND set_number != ALL($1)",
        )
        .bind(&set_numbers)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let created = created_flags.iter().filter(|(c,)| *c).count();
        Ok(UpsertCounts {
            created,
            updated: created_flags.len() - created,
            total: created_flags.len(),
        })
    }

    pub async fn mark_failed(&self, set_number: &str) -> Result<()> {
        sqlx::query(
            "UPDATE retirement_sets
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
            INSERT INTO retirement_sets
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

    /// Due rows. The tracker is scraped as one page, so the sweep only needs
    /// to know whether anything is due; the job payload is the page itself.
    pub async fn find_items_needing_scraping(&self, limit: i64) -> Result<Vec<RetirementSet>> {
        let sets = sqlx::query_as::<_, RetirementSet>(
            "SELECT * FROM retirement_sets
             WHERE is_active AND (next_scrape_at IS NULL OR next_scrape_at <= NOW())
             ORDER BY next_scrape_at ASC NULLS FIRST
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sets)
    }

    /// Product set numbers with no retirement row yet.
    pub async fn find_new_identifiers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT p.set_number FROM products p
             LEFT JOIN retirement_sets r ON r.set_number = p.set_number
             WHERE r.set_number IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }
}
