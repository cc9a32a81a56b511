//! Control-plane routes.
//!
//! All operations are plain request-response: read queue state, obliterate
//! and repopulate, trigger a sweep or detection pass, force-scrape specific
//! items, import a pasted retail listing. Job producers here never mutate
//! repository data directly.

use crate::data::jobs::{CRITICAL_STUCK_THRESHOLD, JobCounts, NewJob, STUCK_THRESHOLD};
use crate::data::models::{Job, JobPayload, JobState, ScrapePriority, Source};
use crate::error::ScrapeError;
use crate::scraper::detector::DetectReport;
use crate::scraper::scheduler::PriorityCounts;
use crate::state::AppState;
use crate::status::WorkerState;
use crate::web::error::OpError;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use ts_rs::TS;

/// Jobs returned per state in the queue status view.
const JOBS_PER_STATE: i64 = 20;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/queue/status", get(queue_status))
        .route("/api/queue/reset", post(queue_reset))
        .route("/api/scheduler/run", post(scheduler_run))
        .route("/api/detect-missing", post(detect_missing))
        .route("/api/scrape/force", post(force_scrape))
        .route("/api/retail/import", post(retail_import))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Job record on the wire.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct JobDto {
    pub id: i64,
    pub name: String,
    pub data: Value,
    pub state: String,
    pub priority: i16,
    pub attempts_made: i32,
    pub max_attempts: i32,
    /// Enqueue time, epoch milliseconds.
    pub timestamp: i64,
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returnvalue: Option<Value>,
}

impl From<&Job> for JobDto {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            data: job.payload.clone(),
            state: job.state.as_str().to_string(),
            priority: job.priority as i16,
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
            timestamp: job.queued_at.timestamp_millis(),
            processed_on: job.processed_on.map(|t| t.timestamp_millis()),
            finished_on: job.finished_on.map(|t| t.timestamp_millis()),
            failed_reason: job.failed_reason.clone(),
            returnvalue: job.result.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    pub counts: JobCounts,
    pub jobs: QueueJobsDto,
    pub worker_status: WorkerState,
    pub stuck: StuckDto,
}

#[derive(Debug, Serialize)]
pub struct QueueJobsDto {
    pub waiting: Vec<JobDto>,
    pub active: Vec<JobDto>,
    pub completed: Vec<JobDto>,
    pub failed: Vec<JobDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckDto {
    pub possibly_stuck: usize,
    pub critically_stuck: usize,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let services: serde_json::Map<String, Value> = state
        .statuses
        .snapshot()
        .into_iter()
        .map(|(name, status)| {
            let age = state.statuses.report_age_secs(&name);
            (name, json!({ "status": status, "reportAgeSecs": age }))
        })
        .collect();
    Json(json!({ "status": "ok", "services": services }))
}

async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStatusResponse>, OpError> {
    let counts = state
        .queue
        .counts()
        .await
        .map_err(|e| OpError::internal("queue counts", e))?;

    let mut jobs = QueueJobsDto {
        waiting: Vec::new(),
        active: Vec::new(),
        completed: Vec::new(),
        failed: Vec::new(),
    };
    for (job_state, slot) in [
        (JobState::Waiting, &mut jobs.waiting),
        (JobState::Active, &mut jobs.active),
        (JobState::Completed, &mut jobs.completed),
        (JobState::Failed, &mut jobs.failed),
    ] {
        let listed = state
            .queue
            .list(job_state, JOBS_PER_STATE)
            .await
            .map_err(|e| OpError::internal("queue list", e))?;
        *slot = listed.iter().map(JobDto::from).collect();
    }

    let possibly_stuck = state
        .queue
        .stuck_jobs(STUCK_THRESHOLD)
        .await
        .map_err(|e| OpError::internal("stuck jobs", e))?;
    let critically_stuck = possibly_stuck
        .iter()
        .filter(|job| {
            job.processed_on.is_some_and(|t| {
                chrono::Utc::now() - t
                    > chrono::Duration::from_std(CRITICAL_STUCK_THRESHOLD)
                        .unwrap_or_else(|_| chrono::Duration::minutes(15))
            })
        })
        .count();

    Ok(Json(QueueStatusResponse {
        counts,
        jobs,
        worker_status: state.statuses.worker_state(),
        stuck: StuckDto {
            possibly_stuck: possibly_stuck.len(),
            critically_stuck,
        },
    }))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub cleared: TotalDto,
    pub repopulated: TotalDto,
}

#[derive(Debug, Serialize)]
pub struct TotalDto {
    pub total: u64,
}

async fn queue_reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, OpError> {
    let cleared = state
        .queue
        .obliterate()
        .await
        .map_err(|e| OpError::internal("queue obliterate", e))?;

    let report = state
        .scheduler
        .sweep(false)
        .await
        .map_err(|e| OpError::internal("queue repopulate", e))?;

    Ok(Json(ResetResponse {
        cleared: TotalDto { total: cleared },
        repopulated: TotalDto {
            total: report.jobs_enqueued as u64,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerRunResponse {
    pub jobs_queued: usize,
    pub priority_counts: PriorityCounts,
}

async fn scheduler_run(
    State(state): State<AppState>,
) -> Result<Json<SchedulerRunResponse>, OpError> {
    let report = state
        .scheduler
        .sweep(false)
        .await
        .map_err(|e| OpError::internal("scheduler sweep", e))?;

    Ok(Json(SchedulerRunResponse {
        jobs_queued: report.jobs_enqueued,
        priority_counts: report.priority_counts,
    }))
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub result: DetectReport,
}

async fn detect_missing(State(state): State<AppState>) -> Result<Json<DetectResponse>, OpError> {
    let result = state
        .detector
        .detect()
        .await
        .map_err(|e| OpError::internal("missing-data detection", e))?;
    Ok(Json(DetectResponse { result }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceScrapeRequest {
    pub item_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceScrapeResponse {
    pub result: ForceScrapeResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceScrapeResult {
    pub jobs_enqueued: usize,
}

/// Enqueue HIGH-priority marketplace scrapes for specific item ids,
/// bypassing interval and breaker checks. Items with a job already live in
/// the queue are skipped, never double-queued.
async fn force_scrape(
    State(state): State<AppState>,
    Json(request): Json<ForceScrapeRequest>,
) -> Result<Json<ForceScrapeResponse>, OpError> {
    if request.item_ids.is_empty() {
        return Err(OpError::invalid("itemIds must not be empty"));
    }
    if request.item_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(OpError::invalid("itemIds must not contain blanks"));
    }

    let jobs: Vec<NewJob> = request
        .item_ids
        .iter()
        .map(|id| {
            let payload = serde_json::to_value(JobPayload::new(id.clone()).forced())
                .unwrap_or_else(|_| json!({ "identifier": id, "force": true }));
            NewJob::new(
                Source::Marketplace.job_name(),
                payload,
                ScrapePriority::High,
            )
        })
        .collect();

    let inserted = state
        .queue
        .batch_enqueue_unique(&jobs)
        .await
        .map_err(|e| OpError::internal("force scrape enqueue", e))?;

    Ok(Json(ForceScrapeResponse {
        result: ForceScrapeResult {
            jobs_enqueued: inserted.len(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct RetailImportRequest {
    pub html: String,
    pub source_url: String,
}

#[derive(Debug, Serialize)]
pub struct RetailImportResponse {
    pub result: crate::data::models::UpsertCounts,
}

/// Import a user-pasted retail listing page.
async fn retail_import(
    State(state): State<AppState>,
    Json(request): Json<RetailImportRequest>,
) -> Result<Json<RetailImportResponse>, OpError> {
    if request.html.trim().is_empty() {
        return Err(OpError::invalid("html must not be empty"));
    }
    url::Url::parse(&request.source_url)
        .map_err(|e| OpError::invalid(format!("invalid source_url: {e}")))?;

    let counts = state
        .retail
        .import(&state.ctx, &request.html, &request.source_url)
        .await
        .map_err(|e| match e {
            ScrapeError::Parse(message) => OpError::invalid(message),
            other => OpError::internal("retail import", other),
        })?;

    Ok(Json(RetailImportResponse { result: counts }))
}
