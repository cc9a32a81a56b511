//! Parser seam: each parser is a pure function `(bytes, url) -> typed record`.
//!
//! Parsers never touch the network or the database. A parser signals
//! [`crate::error::ScrapeError::Parse`] for malformed markup (retried — the
//! page may have loaded partially) and [`crate::error::ScrapeError::SetNotFound`]
//! when the source positively confirms the item does not exist. Each parser
//! decides the not-found condition explicitly; workers never infer it from
//! message strings.

pub mod marketplace;
pub mod metadata;
pub mod reddit;
pub mod retail;
pub mod retirement;

use chrono::{DateTime, NaiveDate, Utc};

/// Record extracted from a marketplace catalog item page.
#[derive(Debug, Clone, Default)]
pub struct ParsedMarketplaceItem {
    pub item_id: String,
    pub item_type: String,
    pub set_number: Option<String>,
    pub name: Option<String>,
    pub current_price_new_cents: Option<i64>,
    pub current_price_used_cents: Option<i64>,
    pub avg_price_new_cents: Option<i64>,
    pub avg_price_used_cents: Option<i64>,
    pub times_sold_new: Option<i32>,
    pub times_sold_used: Option<i32>,
    pub image_url: Option<String>,
}

/// One set row from the retirement tracker page.
#[derive(Debug, Clone, Default)]
pub struct ParsedRetirementSet {
    pub set_number: String,
    pub theme: Option<String>,
    pub name: Option<String>,
    pub retail_price_cents: Option<i64>,
    pub expected_retirement_date: Option<NaiveDate>,
    pub retirement_status: Option<String>,
}

/// Record extracted from a metadata-site product page.
#[derive(Debug, Clone, Default)]
pub struct ParsedMetadataSet {
    pub set_number: String,
    pub name: Option<String>,
    pub year_released: Option<i32>,
    pub pieces: Option<i32>,
    pub minifigs: Option<i32>,
    pub rrp_cents: Option<i64>,
    pub product_url: Option<String>,
    pub image_url: Option<String>,
}

/// Mention-volume summary for one set number on the community board.
#[derive(Debug, Clone, Default)]
pub struct ParsedRedditVolume {
    pub set_number: String,
    pub mention_count: i32,
    pub latest_post_at: Option<DateTime<Utc>>,
    pub top_post_title: Option<String>,
    pub top_post_score: Option<i32>,
}

/// One product card from a pasted retail listing page.
#[derive(Debug, Clone, Default)]
pub struct ParsedRetailListing {
    pub product_id: String,
    pub name: Option<String>,
    pub price_cents: Option<i64>,
    pub sold_count: Option<i32>,
}

pub(crate) fn body_str(body: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(body)
}
