//! Per-source circuit breaker over the shared store.
//!
//! Counters live in the `circuit_breakers` table so every worker process
//! observes the same state. Transitions are single-statement updates:
//!
//! * closed -> open      on reaching the failure threshold
//! * open -> half-open   on the first `is_open` query past the cooldown
//! * half-open -> closed on the first recorded success
//! * half-open -> open   on the first recorded failure

use crate::config::BreakerConfig;
use crate::data::models::Source;
use crate::error::Result;
use sqlx::PgPool;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl FromStr for BreakerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(BreakerState::Closed),
            "open" => Ok(BreakerState::Open),
            "half_open" => Ok(BreakerState::HalfOpen),
            other => Err(format!("unknown breaker state '{other}'")),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    pool: PgPool,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(pool: PgPool, config: BreakerConfig) -> Self {
        Self { pool, config }
    }

    /// Whether calls to this source should be short-circuited.
    ///
    /// An open circuit past its cooldown transitions to half-open here and
    /// lets one probe through.
    pub async fn is_open(&self, source: Source) -> Result<bool> {
        self.ensure_row(source).await?;

        sqlx::query(
            "UPDATE circuit_breakers
             SET state = 'half_open'
             WHERE source = $1 AND state = 'open'
               AND last_failure_at <= NOW() - make_interval(secs => $2)",
        )
        .bind(source.as_str())
        .bind(self.config.cooldown.as_secs_f64())
        .execute(&self.pool)
        .await?;

        let state: String =
            sqlx::query_scalar("SELECT state FROM circuit_breakers WHERE source = $1")
                .bind(source.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(state == "open")
    }

    /// Record a successful scrape: closes the circuit and resets the count.
    pub async fn record_success(&self, source: Source) -> Result<()> {
        sqlx::query(
            "INSERT INTO circuit_breakers (source, failure_count, state)
             VALUES ($1, 0, 'closed')
             ON CONFLICT (source) DO UPDATE SET failure_count = 0, state = 'closed'",
        )
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed scrape. A half-open probe failure re-opens
    /// immediately; otherwise the circuit opens once the threshold is hit.
    pub async fn record_failure(&self, source: Source) -> Result<()> {
        sqlx::query(
            "INSERT INTO circuit_breakers (source, failure_count, last_failure_at, state)
             VALUES ($1, 1, NOW(), CASE WHEN $2 <= 1 THEN 'open' ELSE 'closed' END)
             ON CONFLICT (source) DO UPDATE SET
                 failure_count = circuit_breakers.failure_count + 1,
                 last_failure_at = NOW(),
                 state = CASE
                     WHEN circuit_breakers.state = 'half_open' THEN 'open'
                     WHEN circuit_breakers.failure_count + 1 >= $2 THEN 'open'
                     ELSE circuit_breakers.state
                 END",
        )
        .bind(source.as_str())
        .bind(self.config.threshold)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current state and consecutive-failure count for one source.
    pub async fn state(&self, source: Source) -> Result<(BreakerState, i32)> {
        self.ensure_row(source).await?;

        let (state, count): (String, i32) = sqlx::query_as(
            "SELECT state, failure_count FROM circuit_breakers WHERE source = $1",
        )
        .bind(source.as_str())
        .fetch_one(&self.pool)
        .await?;

        let state = state
            .parse::<BreakerState>()
            .unwrap_or(BreakerState::Closed);
        Ok((state, count))
    }

    async fn ensure_row(&self, source: Source) -> Result<()> {
        sqlx::query("INSERT INTO circuit_breakers (source) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(source.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
