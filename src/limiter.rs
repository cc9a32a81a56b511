//! Per-domain rate limiting.
//!
//! Two layers with one semantic: a minimum gap between requests to a domain.
//! In-process, a governor limiter per domain paces and serializes local
//! callers in arrival order. Cross-process, a shared `rate_limit_buckets`
//! row is advanced with an atomic compare-and-set, so independent worker
//! processes observe the same gap. Intervals are configured per source;
//! buckets are keyed by the host actually being fetched.

use crate::config::RateLimitsConfig;
use crate::data::models::Source;
use crate::error::{Result, ScrapeError};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter as GovernorLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use rand::Rng;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-source limit settings.
#[derive(Debug, Clone, Copy)]
pub struct DomainLimit {
    pub min_interval: Duration,
    pub jitter: Duration,
}

/// Process-wide rate limiter over the shared bucket store.
pub struct RateLimiter {
    pool: PgPool,
    limits: HashMap<Source, DomainLimit>,
    default_limit: DomainLimit,
    local: DashMap<String, Arc<DirectLimiter>>,
}

impl RateLimiter {
    pub fn new(pool: PgPool, config: &RateLimitsConfig) -> Self {
        let jitter = config.jitter;
        let mut limits = HashMap::new();
        for (source, interval) in [
            (Source::Marketplace, config.effective_marketplace_interval()),
            (Source::RetirementTracker, config.retirement_interval),
            (Source::MetadataSite, config.metadata_interval),
            (Source::Reddit, config.reddit_interval),
        ] {
            limits.insert(
                source,
                DomainLimit {
                    min_interval: interval,
                    jitter,
                },
            );
        }

        Self {
            pool,
            limits,
            default_limit: DomainLimit {
                min_interval: Duration::from_secs(1),
                jitter,
            },
            local: DashMap::new(),
        }
    }

    pub fn limit_for(&self, source: Source) -> DomainLimit {
        self.limits.get(&source).copied().unwrap_or(self.default_limit)
    }

    /// Block until the inter-request gap for this domain has elapsed, then
    /// record the request atomically in the shared store.
    ///
    /// Fails only with [`ScrapeError::RateLimiterUnavailable`] when the
    /// shared store is unreachable.
    pub async fn wait_for_slot(&self, source: Source, domain: &str) -> Result<()> {
        let limit = self.limit_for(source);

        // Local pacing first: releases waiters in arrival order and keeps
        // most contention away from the shared store.
        self.local_limiter(domain, limit).until_ready().await;

        // Cross-process gate: advance the bucket only if a full interval has
        // passed since the last recorded request by anyone.
        let interval_secs = limit.min_interval.as_secs_f64();
        loop {
            let updated = sqlx::query(
                "UPDATE rate_limit_buckets
                 SET last_request_at = NOW()
                 WHERE domain = $1
                   AND (last_request_at IS NULL
                        OR last_request_at <= NOW() - make_interval(secs => $2))",
            )
            .bind(domain)
            .bind(interval_secs)
            .execute(&self.pool)
            .await
            .map_err(ScrapeError::RateLimiterUnavailable)?;

            if updated.rows_affected() == 1 {
                break;
            }

            // Another process holds the slot; wait out the remaining gap.
            let remaining: Option<f64> = sqlx::query_scalar(
                "SELECT EXTRACT(EPOCH FROM
                     last_request_at + make_interval(secs => $2) - NOW())::float8
                 FROM rate_limit_buckets WHERE domain = $1",
            )
            .bind(domain)
            .bind(interval_secs)
            .fetch_optional(&self.pool)
            .await
            .map_err(ScrapeError::RateLimiterUnavailable)?
            .flatten();

            match remaining {
                Some(secs) if secs > 0.0 => {
                    tokio::time::sleep(Duration::from_secs_f64(secs.min(interval_secs))).await;
                }
                Some(_) => {} // slot just freed, retry the CAS immediately
                None => {
                    // Bucket row missing (fresh database); create and retry.
                    self.ensure_bucket(domain).await?;
                }
            }
        }

        if !limit.jitter.is_zero() {
            let jitter_ms = rand::rng().random_range(0..=limit.jitter.as_millis() as u64);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
        }

        Ok(())
    }

    async fn ensure_bucket(&self, domain: &str) -> Result<()> {
        sqlx::query("INSERT INTO rate_limit_buckets (domain) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(domain)
            .execute(&self.pool)
            .await
            .map_err(ScrapeError::RateLimiterUnavailable)?;
        Ok(())
    }

    fn local_limiter(&self, domain: &str, limit: DomainLimit) -> Arc<DirectLimiter> {
        self.local
            .entry(domain.to_string())
            .or_insert_with(|| {
                let quota = Quota::with_period(limit.min_interval.max(Duration::from_millis(1)))
                    .expect("non-zero rate limit interval");
                Arc::new(GovernorLimiter::direct(quota))
            })
            .clone()
    }
}
