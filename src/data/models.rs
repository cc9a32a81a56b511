//! Row types and enums shared across the data layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The external sources this pipeline scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Marketplace,
    RetirementTracker,
    MetadataSite,
    Reddit,
    RetailListing,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Marketplace => "marketplace",
            Source::RetirementTracker => "retirement_tracker",
            Source::MetadataSite => "metadata_site",
            Source::Reddit => "reddit",
            Source::RetailListing => "retail_listing",
        }
    }

    /// The queue dispatch key for this source's scrape jobs.
    pub fn job_name(&self) -> &'static str {
        match self {
            Source::Marketplace => "scrape-marketplace",
            Source::RetirementTracker => "scrape-retirement",
            Source::MetadataSite => "scrape-metadata",
            Source::Reddit => "scrape-reddit",
            Source::RetailListing => "scrape-retail",
        }
    }

    pub fn from_job_name(name: &str) -> Option<Self> {
        match name {
            "scrape-marketplace" => Some(Source::Marketplace),
            "scrape-retirement" => Some(Source::RetirementTracker),
            "scrape-metadata" => Some(Source::MetadataSite),
            "scrape-reddit" => Some(Source::Reddit),
            "scrape-retail" => Some(Source::RetailListing),
            _ => None,
        }
    }

    /// Default rate-limit domain, used when a fetched URL has no parseable
    /// host. Buckets are normally keyed by the actual host being fetched.
    pub fn default_domain(&self) -> &'static str {
        match self {
            Source::Marketplace => "www.bricklink.com",
            Source::RetirementTracker => "www.brickeconomy.com",
            Source::MetadataSite => "brickset.com",
            Source::Reddit => "www.reddit.com",
            Source::RetailListing => "shopee.com",
        }
    }

    /// Sources the scheduler sweeps. Retail listings are user-triggered only.
    pub fn scheduled() -> [Source; 4] {
        [
            Source::Marketplace,
            Source::RetirementTracker,
            Source::MetadataSite,
            Source::Reddit,
        ]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marketplace" => Ok(Source::Marketplace),
            "retirement_tracker" => Ok(Source::RetirementTracker),
            "metadata_site" => Ok(Source::MetadataSite),
            "reddit" => Ok(Source::Reddit),
            "retail_listing" => Ok(Source::RetailListing),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

impl TryFrom<String> for Source {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Job priority. Lower number dispatches earlier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i16)]
pub enum ScrapePriority {
    High = 1,
    Medium = 2,
    Normal = 3,
    Low = 4,
}

impl ScrapePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapePriority::High => "HIGH",
            ScrapePriority::Medium => "MEDIUM",
            ScrapePriority::Normal => "NORMAL",
            ScrapePriority::Low => "LOW",
        }
    }
}

/// Queue state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

impl TryFrom<String> for JobState {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A queued scrape job row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub payload: Value,
    pub priority: ScrapePriority,
    #[sqlx(try_from = "String")]
    pub state: JobState,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub queued_at: DateTime<Utc>,
    pub execute_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub result: Option<Value>,
}

/// Structured job payload: the item identifier plus optional URL hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Force-scrapes bypass the circuit breaker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

impl JobPayload {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            url: None,
            item_type: None,
            force: None,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = Some(true);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Per-record scrape status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Pending,
    Success,
    Failed,
    NotFound,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Pending => "pending",
            ScrapeStatus::Success => "success",
            ScrapeStatus::Failed => "failed",
            ScrapeStatus::NotFound => "not_found",
        }
    }
}

impl FromStr for ScrapeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScrapeStatus::Pending),
            "success" => Ok(ScrapeStatus::Success),
            "failed" => Ok(ScrapeStatus::Failed),
            "not_found" => Ok(ScrapeStatus::NotFound),
            other => Err(format!("unknown scrape status '{other}'")),
        }
    }
}

impl TryFrom<String> for ScrapeStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Outcome of one scrape session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Success,
    Partial,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Success => "success",
            SessionStatus::Partial => "partial",
            SessionStatus::Failed => "failed",
        }
    }
}

/// One scrape attempt that reached the fetch stage.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScrapeSession {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub source: Source,
    pub source_url: String,
    pub status: String,
    pub products_found: i32,
    pub products_stored: i32,
    pub created_at: DateTime<Utc>,
}

/// Compressed bytes of one fetched page.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawPayload {
    pub id: i64,
    pub session_id: i64,
    #[sqlx(try_from = "String")]
    pub source: Source,
    pub source_url: String,
    pub body_gzip: Vec<u8>,
    pub content_type: Option<String>,
    pub http_status: i32,
    pub scraped_at: DateTime<Utc>,
}

/// Result of a batch upsert.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UpsertCounts {
    pub created: usize,
    pub updated: usize,
    pub total: usize,
}

/// Image download outcome stored alongside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Success,
    Failed,
    Skipped,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Success => "success",
            ImageStatus::Failed => "failed",
            ImageStatus::Skipped => "skipped",
        }
    }
}

/// Marketplace catalog record, keyed by the marketplace's own item ID.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketplaceItem {
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
    pub image_status: Option<String>,
    #[sqlx(try_from = "String")]
    pub scrape_status: ScrapeStatus,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub next_scrape_at: Option<DateTime<Utc>>,
    pub scrape_interval_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Retirement tracker record, keyed by set number.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RetirementSet {
    pub set_number: String,
    pub theme: Option<String>,
    pub name: Option<String>,
    pub retail_price_cents: Option<i64>,
    pub expected_retirement_date: Option<NaiveDate>,
    pub retirement_status: Option<String>,
    #[sqlx(try_from = "String")]
    pub scrape_status: ScrapeStatus,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub next_scrape_at: Option<DateTime<Utc>>,
    pub scrape_interval_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata site record, keyed by set number.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetadataSet {
    pub set_number: String,
    pub name: Option<String>,
    pub year_released: Option<i32>,
    pub pieces: Option<i32>,
    pub minifigs: Option<i32>,
    pub rrp_cents: Option<i64>,
    pub product_url: Option<String>,
    pub image_url: Option<String>,
    pub image_status: Option<String>,
    #[sqlx(try_from = "String")]
    pub scrape_status: ScrapeStatus,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub next_scrape_at: Option<DateTime<Utc>>,
    pub scrape_interval_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Community-board mention volume, keyed by set number.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RedditVolume {
    pub set_number: String,
    pub mention_count: Option<i32>,
    pub latest_post_at: Option<DateTime<Utc>>,
    pub top_post_title: Option<String>,
    pub top_post_score: Option<i32>,
    #[sqlx(try_from = "String")]
    pub scrape_status: ScrapeStatus,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub next_scrape_at: Option<DateTime<Utc>>,
    pub scrape_interval_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Retail listing record, keyed by the retailer's product ID.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RetailListing {
    pub product_id: String,
    pub name: Option<String>,
    pub price_cents: Option<i64>,
    pub sold_count: Option<i32>,
    pub source_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub scrape_status: ScrapeStatus,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub next_scrape_at: Option<DateTime<Utc>>,
    pub scrape_interval_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cross-source product row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Product {
    pub set_number: String,
    pub item_id: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_round_trips_through_str() {
        for source in [
            Source::Marketplace,
            Source::RetirementTracker,
            Source::MetadataSite,
            Source::Reddit,
            Source::RetailListing,
        ] {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
    }

    #[test]
    fn job_name_round_trips() {
        for source in Source::scheduled() {
            assert_eq!(Source::from_job_name(source.job_name()), Some(source));
        }
        assert_eq!(Source::from_job_name("scrape-nonsense"), None);
    }

    #[test]
    fn priority_orders_high_first() {
        assert!(ScrapePriority::High < ScrapePriority::Medium);
        assert!(ScrapePriority::Normal < ScrapePriority::Low);
        assert_eq!(ScrapePriority::High as i16, 1);
        assert_eq!(ScrapePriority::Low as i16, 4);
    }
}
