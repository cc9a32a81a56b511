//! Cross-source product table.
//!
//! One row per known product, keyed by set number. Source repositories use
//! this table to discover identifiers they have no row for yet, and the
//! missing-data detector joins against it to find gaps.

use crate::data::models::Product;
use crate::error::Result;
use sqlx::PgPool;

#[derive(Clone)]
pub struct ProductRepo {
    pool: PgPool,
}

impl ProductRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, set_number: &str) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE set_number = $1")
            .bind(set_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Insert a product if absent; fills item_id/name when the existing row
    /// has none.
    pub async fn upsert(
        &self,
        set_number: &str,
        item_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (set_number, item_id, name)
             VALUES ($1, $2, $3)
             ON CONFLICT (set_number) DO UPDATE SET
                 item_id = COALESCE(products.item_id, EXCLUDED.item_id),
                 name = COALESCE(products.name, EXCLUDED.name)",
        )
        .bind(set_number)
        .bind(item_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn all_set_numbers(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT set_number FROM products")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }
}
