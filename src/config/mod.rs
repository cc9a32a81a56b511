//! Configuration module for the brickwatch application.
//!
//! Configuration is loaded from environment variables via figment. Duration
//! fields accept both numeric values (interpreted as seconds) and duration
//! strings with units ("30s", "5m", "1500ms").

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration containing all sub-configurations
#[derive(Deserialize, Clone)]
pub struct Config {
    /// Log level for the application
    ///
    /// This value is used to set the log level for this application's target
    /// specifically, e.g. "debug" behaves like "warn,brickwatch=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the control-plane HTTP server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database connection URL
    pub database_url: String,
    /// Graceful shutdown timeout duration
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// Base URL of the headless-browser rendering service
    #[serde(default = "default_browser_service_url")]
    pub browser_service_url: String,
    /// Optional auth token for the browser service
    #[serde(default)]
    pub browser_service_token: Option<String>,
    /// Directory set images are downloaded into
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    /// Source site URLs
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Job queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Circuit breaker configuration
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Per-source rate limiting configuration
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Number of queue consumers per process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_browser_service_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_image_dir() -> String {
    "./images".to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

/// Base URLs of the scraped sources
#[derive(Deserialize, Clone, Debug)]
pub struct SourcesConfig {
    /// Marketplace catalog base URL
    #[serde(default = "default_marketplace_base_url")]
    pub marketplace_base_url: String,
    /// Retirement tracker page URL
    #[serde(default = "default_retirement_tracker_url")]
    pub retirement_tracker_url: String,
    /// Metadata site base URL
    #[serde(default = "default_metadata_base_url")]
    pub metadata_base_url: String,
    /// Community board base URL
    #[serde(default = "default_reddit_base_url")]
    pub reddit_base_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            marketplace_base_url: default_marketplace_base_url(),
            retirement_tracker_url: default_retirement_tracker_url(),
            metadata_base_url: default_metadata_base_url(),
            reddit_base_url: default_reddit_base_url(),
        }
    }
}

fn default_marketplace_base_url() -> String {
    "https://www.bricklink.com".to_string()
}

fn default_retirement_tracker_url() -> String {
    "https://www.brickeconomy.com/sets/retiring-soon".to_string()
}

fn default_metadata_base_url() -> String {
    "https://brickset.com".to_string()
}

fn default_reddit_base_url() -> String {
    "https://www.reddit.com/r/legodeals".to_string()
}

/// Job queue configuration
#[derive(Deserialize, Clone, Debug)]
pub struct QueueConfig {
    /// Maximum delivery attempts per job before it is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Base delay for exponential retry backoff
    #[serde(
        default = "default_backoff_base",
        deserialize_with = "deserialize_duration"
    )]
    pub backoff_base: Duration,
    /// Cap applied to the computed backoff delay
    #[serde(
        default = "default_backoff_cap",
        deserialize_with = "deserialize_duration"
    )]
    pub backoff_cap: Duration,
    /// How many completed (and failed) jobs are retained for diagnostics
    #[serde(default = "default_completed_retention")]
    pub completed_retention: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
            completed_retention: default_completed_retention(),
        }
    }
}

fn default_max_attempts() -> i32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(2)
}

fn default_backoff_cap() -> Duration {
    Duration::from_secs(60)
}

fn default_completed_retention() -> i64 {
    1000
}

/// Circuit breaker configuration
#[derive(Deserialize, Clone, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_breaker_threshold")]
    pub threshold: i32,
    /// How long an open circuit waits before allowing a half-open probe
    #[serde(
        default = "default_breaker_cooldown",
        deserialize_with = "deserialize_duration"
    )]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_breaker_threshold(),
            cooldown: default_breaker_cooldown(),
        }
    }
}

fn default_breaker_threshold() -> i32 {
    5
}

fn default_breaker_cooldown() -> Duration {
    Duration::from_secs(300)
}

/// Per-source rate limiting configuration.
///
/// Each interval is the minimum gap between requests to that source's domain,
/// enforced process-wide and across processes via the shared bucket store.
#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitsConfig {
    /// Marketplace catalog pages (very conservative; the site documents a
    /// 15-requests-per-hour ceiling, expressed here as a 240s minimum gap)
    #[serde(
        default = "default_marketplace_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub marketplace_interval: Duration,
    /// Alternative knob for the marketplace: a requests-per-hour cap that is
    /// converted to the equivalent minimum gap. Takes precedence when set.
    #[serde(default)]
    pub marketplace_hourly_cap: Option<u32>,
    /// Retirement tracker page
    #[serde(
        default = "default_retirement_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub retirement_interval: Duration,
    /// Metadata site (search + product pages)
    #[serde(
        default = "default_metadata_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub metadata_interval: Duration,
    /// Community board JSON search endpoint
    #[serde(
        default = "default_reddit_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub reddit_interval: Duration,
    /// Random jitter added on top of each minimum gap
    #[serde(
        default = "default_rate_limit_jitter",
        deserialize_with = "deserialize_duration"
    )]
    pub jitter: Duration,
}

impl RateLimitsConfig {
    /// Effective marketplace gap after applying the hourly-cap knob.
    pub fn effective_marketplace_interval(&self) -> Duration {
        match self.marketplace_hourly_cap {
            Some(cap) if cap > 0 => Duration::from_secs(3600 / u64::from(cap)),
            _ => self.marketplace_interval,
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            marketplace_interval: default_marketplace_interval(),
            marketplace_hourly_cap: None,
            retirement_interval: default_retirement_interval(),
            metadata_interval: default_metadata_interval(),
            reddit_interval: default_reddit_interval(),
            jitter: default_rate_limit_jitter(),
        }
    }
}

fn default_marketplace_interval() -> Duration {
    Duration::from_secs(240)
}

fn default_retirement_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_metadata_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_reddit_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_rate_limit_jitter() -> Duration {
    Duration::from_millis(500)
}

/// Scheduler configuration
#[derive(Deserialize, Clone, Debug)]
pub struct SchedulerConfig {
    /// How often the sweep loop wakes up to scan repositories
    #[serde(
        default = "default_sweep_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub sweep_interval: Duration,
    /// How often the missing-data detector runs
    #[serde(
        default = "default_detect_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub detect_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            detect_interval: default_detect_interval(),
        }
    }
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_detect_interval() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

/// Duration parser configured to handle various time units with seconds as default
///
/// Supports seconds (default), milliseconds, and minutes. Allows whitespace
/// between the number and the unit, and multiple units summed together
/// ("2m 30s" = 150 seconds).
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and
/// string values.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
