//! Durable priority job queue backed by Postgres.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so any number of worker processes can
//! poll concurrently without conflicts. Job state:
//! `waiting -> active -> completed | delayed | failed`, with `delayed` rows
//! promoted back to `waiting` once their backoff elapses.

use crate::config::QueueConfig;
use crate::data::models::{Job, JobState, ScrapePriority};
use crate::error::Result;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// How long an `active` job may hold its lock before it is considered
/// abandoned by a dead worker and becomes reclaimable.
const LOCK_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// An `active` job older than this is possibly stuck.
pub const STUCK_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// An `active` job older than this is critically stuck.
pub const CRITICAL_STUCK_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// A job to enqueue. `max_attempts` is stamped from the queue's config at
/// insert time.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub payload: Value,
    pub priority: ScrapePriority,
    pub delay: Option<Duration>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, payload: Value, priority: ScrapePriority) -> Self {
        Self {
            name: name.into(),
            payload,
            priority,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Per-state queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
}

/// Queue operations over the shared `scrape_jobs` table.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert one job. With a delay the job starts out `delayed` and is
    /// promoted to `waiting` once `execute_at` passes.
    pub async fn enqueue(&self, job: NewJob) -> Result<i64> {
        let delay_secs = job.delay.map(|d| d.as_secs_f64()).unwrap_or(0.0);
        let state = if delay_secs > 0.0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO scrape_jobs (name, payload, priority, state, max_attempts, execute_at)
             VALUES ($1, $2, $3, $4, $5, NOW() + make_interval(secs => $6))
             RETURNING id",
        )
        .bind(&job.name)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(state.as_str())
        .bind(self.config.max_attempts)
        .bind(delay_secs)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Batch insert jobs using UNNEST for a single round-trip.
    pub async fn batch_enqueue(&self, jobs: &[NewJob]) -> Result<Vec<Job>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = Vec::with_capacity(jobs.len());
        let mut payloads: Vec<Value> = Vec::with_capacity(jobs.len());
        let mut priorities: Vec<i16> = Vec::with_capacity(jobs.len());

        for job in jobs {
            names.push(job.name.clone());
            payloads.push(job.payload.clone());
            priorities.push(job.priority as i16);
        }

        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO scrape_jobs (name, payload, priority, state, max_attempts)
            SELECT v.name, v.payload, v.priority, 'waiting', $4
            FROM UNNEST($1::text[], $2::jsonb[], $3::smallint[])
                AS v(name, payload, priority)
            RETURNING *
            "#,
        )
        .bind(&names)
        .bind(&payloads)
        .bind(&priorities)
        .bind(self.config.max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(inserted)
    }

    /// Batch insert, skipping identifiers that already have a live job
    /// (waiting, active, or delayed) under the same name. Producers that
    /// bypass interval checks still must not double-queue an item.
    pub async fn batch_enqueue_unique(&self, jobs: &[NewJob]) -> Result<Vec<Job>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_name: HashMap<&str, Vec<String>> = HashMap::new();
        for job in jobs {
            if let Some(id) = job.payload.get("identifier").and_then(|v| v.as_str()) {
                by_name
                    .entry(job.name.as_str())
                    .or_default()
                    .push(id.to_string());
            }
        }

        let mut live: HashSet<(String, String)> = HashSet::new();
        for (name, ids) in &by_name {
            for id in self.find_existing_identifiers(name, ids).await? {
                live.insert((name.to_string(), id));
            }
        }

        let mut seen = HashSet::new();
        let fresh: Vec<NewJob> = jobs
            .iter()
            .filter(|job| {
                match job.payload.get("identifier").and_then(|v| v.as_str()) {
                    Some(id) => {
                        let key = (job.name.clone(), id.to_string());
                        !live.contains(&key) && seen.insert(key)
                    }
                    None => true,
                }
            })
            .cloned()
            .collect();

        self.batch_enqueue(&fresh).await
    }

    /// Atomically claim the next available job.
    ///
    /// Promotes ripe `delayed` jobs, then takes the highest-priority oldest
    /// `waiting` job (or an `active` job whose lock expired, abandoned by a
    /// dead worker). Sets `processed_on` and increments `attempts_made`.
    pub async fn claim(&self) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE scrape_jobs SET state = 'waiting'
             WHERE state = 'delayed' AND execute_at <= NOW()",
        )
        .execute(&mut *tx)
        .await?;

        let lock_expiry_secs = LOCK_EXPIRY.as_secs() as f64;
        let candidate: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM scrape_jobs
             WHERE execute_at <= NOW()
               AND (state = 'waiting'
                    OR (state = 'active'
                        AND locked_at < NOW() - make_interval(secs => $1)))
             ORDER BY priority ASC, queued_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(lock_expiry_secs)
        .fetch_optional(&mut *tx)
        .await?;

        let job = match candidate {
            Some(id) => Some(
                sqlx::query_as::<_, Job>(
                    "UPDATE scrape_jobs
                     SET state = 'active', locked_at = NOW(), processed_on = NOW(),
                         attempts_made = attempts_made + 1
                     WHERE id = $1
                     RETURNING *",
                )
                .bind(id)
                .fetch_one(&mut *tx)
                .await?,
            ),
            None => None,
        };

        tx.commit().await?;

        Ok(job)
    }

    /// Mark an active job completed.
    ///
    /// `attempts` is the number of fetch attempts the scrape actually
    /// consumed; the stored counter never decreases. A job the queue no
    /// longer knows (obliterated mid-flight) is a silent no-op.
    pub async fn ack(&self, job_id: i64, result: &Value, attempts: i32) -> Result<()> {
        sqlx::query(
            "UPDATE scrape_jobs
             SET state = 'completed', finished_on = NOW(), locked_at = NULL,
                 result = $2, attempts_made = GREATEST(attempts_made, $3)
             WHERE id = $1 AND state = 'active'",
        )
        .bind(job_id)
        .bind(result)
        .bind(attempts)
        .execute(&self.pool)
        .await?;

        self.trim(JobState::Completed).await?;
        Ok(())
    }

    /// Report an active job failed.
    ///
    /// While attempts remain the job is re-queued as `delayed` with
    /// exponential backoff (base * 2^(attempts-1) + jitter, capped);
    /// otherwise it is terminally `failed`. Unknown ids are silent no-ops.
    pub async fn fail(&self, job_id: i64, reason: &str, attempts: i32) -> Result<Option<JobState>> {
        let base_secs = self.config.backoff_base.as_secs_f64();
        let cap_secs = self.config.backoff_cap.as_secs_f64();

        let state: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE scrape_jobs
            SET attempts_made = GREATEST(attempts_made, $4),
                failed_reason = $2,
                locked_at = NULL,
                state = CASE
                    WHEN GREATEST(attempts_made, $4) < max_attempts THEN 'delayed'
                    ELSE 'failed'
                END,
                execute_at = CASE
                    WHEN GREATEST(attempts_made, $4) < max_attempts
                    THEN NOW() + make_interval(secs =>
                        LEAST($5, $3 * POWER(2, GREATEST(GREATEST(attempts_made, $4) - 1, 0)))
                        + random())
                    ELSE execute_at
                END,
                finished_on = CASE
                    WHEN GREATEST(attempts_made, $4) >= max_attempts THEN NOW()
                    ELSE finished_on
                END
            WHERE id = $1 AND state = 'active'
            RETURNING state
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .bind(base_secs)
        .bind(attempts)
        .bind(cap_secs)
        .fetch_optional(&self.pool)
        .await?;

        let state = state.and_then(|s| s.parse::<JobState>().ok());
        if state == Some(JobState::Failed) {
            self.trim(JobState::Failed).await?;
        }
        Ok(state)
    }

    /// Terminally fail a job without consuming further attempts.
    ///
    /// Used for short-circuited outcomes (circuit open) that must not burn
    /// the retry budget.
    pub async fn fail_terminal(&self, job_id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE scrape_jobs
             SET state = 'failed', finished_on = NOW(), locked_at = NULL, failed_reason = $2
             WHERE id = $1 AND state = 'active'",
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        self.trim(JobState::Failed).await?;
        Ok(())
    }

    /// Remove all jobs regardless of state. In-flight workers keep running;
    /// their eventual ack/fail hits no rows and is dropped silently.
    pub async fn obliterate(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scrape_jobs")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Per-state job counts in a single round-trip.
    pub async fn counts(&self) -> Result<JobCounts> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT
                COUNT(*) FILTER (WHERE state = 'waiting'),
                COUNT(*) FILTER (WHERE state = 'active'),
                COUNT(*) FILTER (WHERE state = 'completed'),
                COUNT(*) FILTER (WHERE state = 'failed'),
                COUNT(*) FILTER (WHERE state = 'delayed')
             FROM scrape_jobs",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(JobCounts {
            waiting: row.0,
            active: row.1,
            completed: row.2,
            failed: row.3,
            delayed: row.4,
        })
    }

    /// List jobs in a given state. Pending states order by dispatch order,
    /// terminal states newest-first.
    pub async fn list(&self, state: JobState, limit: i64) -> Result<Vec<Job>> {
        let order = match state {
            JobState::Completed | JobState::Failed => "finished_on DESC NULLS LAST",
            JobState::Active => "processed_on ASC",
            JobState::Waiting | JobState::Delayed => "priority ASC, queued_at ASC",
        };

        let jobs = sqlx::query_as::<_, Job>(&format!(
            "SELECT * FROM scrape_jobs WHERE state = $1 ORDER BY {order} LIMIT $2"
        ))
        .bind(state.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Identifiers among `candidates` that already have a live job
    /// (waiting, active, or delayed) under the given name. Used by the
    /// scheduler for de-duplication.
    pub async fn find_existing_identifiers(
        &self,
        name: &str,
        candidates: &[String],
    ) -> Result<HashSet<String>> {
        let existing: Vec<(String,)> = sqlx::query_as(
            "SELECT payload ->> 'identifier' FROM scrape_jobs
             WHERE name = $1
               AND state IN ('waiting', 'active', 'delayed')
               AND payload ->> 'identifier' = ANY($2)",
        )
        .bind(name)
        .bind(candidates)
        .fetch_all(&self.pool)
        .await?;

        Ok(existing.into_iter().map(|(id,)| id).collect())
    }

    /// Active jobs whose `processed_on` is older than the threshold.
    /// Surfaced by the control plane; the queue never kills them.
    pub async fn stuck_jobs(&self, older_than: Duration) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM scrape_jobs
             WHERE state = 'active'
               AND processed_on < NOW() - make_interval(secs => $1)
             ORDER BY processed_on ASC",
        )
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Force-unlock all active jobs back to `waiting`.
    ///
    /// Intended to be called once at startup to recover jobs left locked by
    /// a previous unclean shutdown (crash, OOM kill, etc.).
    pub async fn force_unlock_all(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scrape_jobs
             SET state = 'waiting', locked_at = NULL, queued_at = NOW()
             WHERE state = 'active'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal jobs beyond the retention window, oldest first.
    async fn trim(&self, state: JobState) -> Result<()> {
        sqlx::query(
            "DELETE FROM scrape_jobs
             WHERE state = $1 AND id NOT IN (
                 SELECT id FROM scrape_jobs
                 WHERE state = $1
                 ORDER BY finished_on DESC NULLS LAST
                 LIMIT $2
             )",
        )
        .bind(state.as_str())
        .bind(self.config.completed_retention)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
