#[allow(dead_code)]
mod helpers;

use brickwatch::data::jobs::{NewJob, STUCK_THRESHOLD};
use brickwatch::data::models::{JobState, ScrapePriority};
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;

fn job(name: &str, identifier: &str, priority: ScrapePriority) -> NewJob {
    NewJob::new(name, json!({ "identifier": identifier }), priority)
}

// ── claim ───────────────────────────────────────────────────────────

#[sqlx::test]
async fn claim_empty_queue_returns_none(pool: PgPool) {
    let queue = helpers::queue(&pool);
    assert!(queue.claim().await.unwrap().is_none());
}

#[sqlx::test]
async fn claim_moves_job_to_active_and_counts_attempt(pool: PgPool) {
    let queue = helpers::queue(&pool);
    let id = queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();

    let claimed = queue.claim().await.unwrap().expect("should return a job");
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.state, JobState::Active);
    assert_eq!(claimed.attempts_made, 1);
    assert!(claimed.processed_on.is_some());
    assert!(claimed.locked_at.is_some());
}

#[sqlx::test]
async fn claim_respects_priority_then_fifo(pool: PgPool) {
    let queue = helpers::queue(&pool);
    // Enqueued in order LOW, HIGH, NORMAL; HIGH must dispatch first.
    queue
        .enqueue(job("scrape-reddit", "1111", ScrapePriority::Low))
        .await
        .unwrap();
    queue
        .enqueue(job("scrape-reddit", "2222", ScrapePriority::High))
        .await
        .unwrap();
    queue
        .enqueue(job("scrape-reddit", "3333", ScrapePriority::Normal))
        .await
        .unwrap();

    let first = queue.claim().await.unwrap().unwrap();
    assert_eq!(first.payload["identifier"], "2222");

    let second = queue.claim().await.unwrap().unwrap();
    assert_eq!(second.payload["identifier"], "3333");

    let third = queue.claim().await.unwrap().unwrap();
    assert_eq!(third.payload["identifier"], "1111");
}

#[sqlx::test]
async fn fifo_within_same_priority(pool: PgPool) {
    let queue = helpers::queue(&pool);
    for identifier in ["first", "second", "third"] {
        queue
            .enqueue(job("scrape-marketplace", identifier, ScrapePriority::Normal))
            .await
            .unwrap();
    }

    for expected in ["first", "second", "third"] {
        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.payload["identifier"], expected);
    }
}

#[sqlx::test]
async fn delayed_jobs_wait_for_execute_at(pool: PgPool) {
    let queue = helpers::queue(&pool);
    let id = queue
        .enqueue(
            job("scrape-reddit", "75192", ScrapePriority::Normal)
                .with_delay(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

    assert!(queue.claim().await.unwrap().is_none());
    assert_eq!(queue.counts().await.unwrap().delayed, 1);

    // Ripen the delay; the next claim promotes and takes the job.
    sqlx::query("UPDATE scrape_jobs SET execute_at = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let claimed = queue.claim().await.unwrap().expect("ripe delayed job");
    assert_eq!(claimed.id, id);
}

#[sqlx::test]
async fn expired_locks_are_reclaimed(pool: PgPool) {
    let queue = helpers::queue(&pool);
    let id = queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();
    queue.claim().await.unwrap().unwrap();

    // A live lock blocks other claimers.
    assert!(queue.claim().await.unwrap().is_none());

    // Simulate a worker that died 11 minutes ago.
    sqlx::query("UPDATE scrape_jobs SET locked_at = NOW() - INTERVAL '11 minutes' WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let reclaimed = queue.claim().await.unwrap().expect("abandoned job");
    assert_eq!(reclaimed.id, id);
    assert_eq!(reclaimed.attempts_made, 2);
}

// ── ack / fail ──────────────────────────────────────────────────────

#[sqlx::test]
async fn ack_completes_and_stores_result(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();
    let claimed = queue.claim().await.unwrap().unwrap();

    queue
        .ack(claimed.id, &json!({ "recordsStored": 1 }), 2)
        .await
        .unwrap();

    let jobs = queue.list(JobState::Completed, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempts_made, 2);
    assert_eq!(jobs[0].result.as_ref().unwrap()["recordsStored"], 1);
    assert!(jobs[0].finished_on.is_some());
}

#[sqlx::test]
async fn fail_with_attempts_remaining_delays_with_backoff(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();
    let claimed = queue.claim().await.unwrap().unwrap();

    let state = queue.fail(claimed.id, "HTTP 503", 1).await.unwrap();
    assert_eq!(state, Some(JobState::Delayed));

    let jobs = queue.list(JobState::Delayed, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].failed_reason.as_deref(), Some("HTTP 503"));
    assert!(jobs[0].execute_at > jobs[0].queued_at);
}

#[sqlx::test]
async fn fail_at_max_attempts_is_terminal(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();
    let claimed = queue.claim().await.unwrap().unwrap();

    // The worker exhausted its in-process fetch attempts.
    let state = queue.fail(claimed.id, "HTTP 503", 3).await.unwrap();
    assert_eq!(state, Some(JobState::Failed));

    let jobs = queue.list(JobState::Failed, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempts_made, 3);
}

#[sqlx::test]
async fn fail_terminal_skips_remaining_attempts(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();
    let claimed = queue.claim().await.unwrap().unwrap();

    queue
        .fail_terminal(claimed.id, "circuit open for source 'marketplace'")
        .await
        .unwrap();

    let jobs = queue.list(JobState::Failed, 10).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempts_made, 1, "no extra attempts consumed");
}

// ── obliterate ──────────────────────────────────────────────────────

#[sqlx::test]
async fn obliterate_clears_all_states_and_drops_late_acks(pool: PgPool) {
    let queue = helpers::queue(&pool);
    for i in 0..10 {
        queue
            .enqueue(job("scrape-reddit", &format!("{i:04}"), ScrapePriority::Normal))
            .await
            .unwrap();
    }
    let in_flight = queue.claim().await.unwrap().unwrap();

    let cleared = queue.obliterate().await.unwrap();
    assert_eq!(cleared, 10);

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.waiting + counts.active + counts.delayed, 0);

    // The in-flight worker finishes later; its ack and fail must be no-ops.
    queue.ack(in_flight.id, &json!({}), 1).await.unwrap();
    assert_eq!(queue.fail(in_flight.id, "late", 1).await.unwrap(), None);
    assert_eq!(queue.counts().await.unwrap().completed, 0);
}

// ── retention & diagnostics ─────────────────────────────────────────

#[sqlx::test]
async fn completed_jobs_trim_to_retention(pool: PgPool) {
    let mut config = helpers::fast_queue_config();
    config.completed_retention = 5;
    let queue = brickwatch::data::jobs::JobQueue::new(pool.clone(), config);

    for i in 0..8 {
        queue
            .enqueue(job("scrape-reddit", &format!("{i:04}"), ScrapePriority::Normal))
            .await
            .unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        queue.ack(claimed.id, &json!({}), 1).await.unwrap();
    }

    assert_eq!(queue.counts().await.unwrap().completed, 5);
}

#[sqlx::test]
async fn find_existing_identifiers_sees_live_jobs_only(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-metadata", "75192", ScrapePriority::Normal))
        .await
        .unwrap();
    queue
        .enqueue(job("scrape-metadata", "10316", ScrapePriority::Normal))
        .await
        .unwrap();

    // Complete one of them; completed jobs no longer block re-enqueue.
    let claimed = queue.claim().await.unwrap().unwrap();
    let done: String = claimed.payload["identifier"].as_str().unwrap().to_string();
    queue.ack(claimed.id, &json!({}), 1).await.unwrap();

    let candidates = vec!["75192".to_string(), "10316".to_string(), "99999".to_string()];
    let existing = queue
        .find_existing_identifiers("scrape-metadata", &candidates)
        .await
        .unwrap();

    assert_eq!(existing.len(), 1);
    assert!(!existing.contains(&done));
}

#[sqlx::test]
async fn unique_enqueue_skips_identifiers_with_live_jobs(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();

    // Force-style enqueue for the same id plus a fresh one: only the fresh
    // id may land, whether the existing job is waiting or active.
    let batch = vec![
        job("scrape-marketplace", "75192-1", ScrapePriority::High),
        job("scrape-marketplace", "10316-1", ScrapePriority::High),
    ];
    let inserted = queue.batch_enqueue_unique(&batch).await.unwrap();
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].payload["identifier"], "10316-1");

    let claimed = queue.claim().await.unwrap().unwrap();
    assert_eq!(
        claimed.payload["identifier"], "10316-1",
        "the forced job dispatches first"
    );

    let inserted = queue
        .batch_enqueue_unique(&[job("scrape-marketplace", "10316-1", ScrapePriority::High)])
        .await
        .unwrap();
    assert!(inserted.is_empty(), "active jobs still block re-enqueue");

    // Duplicates inside one request collapse too.
    let inserted = queue
        .batch_enqueue_unique(&[
            job("scrape-marketplace", "76448-1", ScrapePriority::High),
            job("scrape-marketplace", "76448-1", ScrapePriority::High),
        ])
        .await
        .unwrap();
    assert_eq!(inserted.len(), 1);
}

#[sqlx::test]
async fn stuck_jobs_surface_after_threshold(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();
    let claimed = queue.claim().await.unwrap().unwrap();

    assert!(queue.stuck_jobs(STUCK_THRESHOLD).await.unwrap().is_empty());

    sqlx::query(
        "UPDATE scrape_jobs SET processed_on = NOW() - INTERVAL '12 minutes', \
         locked_at = NOW() WHERE id = $1",
    )
    .bind(claimed.id)
    .execute(&pool)
    .await
    .unwrap();

    let stuck = queue.stuck_jobs(STUCK_THRESHOLD).await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, claimed.id);
}

#[sqlx::test]
async fn force_unlock_recovers_jobs_from_unclean_shutdown(pool: PgPool) {
    let queue = helpers::queue(&pool);
    queue
        .enqueue(job("scrape-marketplace", "75192-1", ScrapePriority::Normal))
        .await
        .unwrap();
    queue.claim().await.unwrap().unwrap();

    let unlocked = queue.force_unlock_all().await.unwrap();
    assert_eq!(unlocked, 1);

    let reclaimed = queue.claim().await.unwrap();
    assert!(reclaimed.is_some(), "job is claimable again after recovery");
}
