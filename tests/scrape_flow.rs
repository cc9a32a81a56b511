//! End-to-end scrape scenarios against a fake fetcher: the happy path,
//! not-found handling, transient failures, exhausted retries, and the
//! circuit tripping after sustained failure.

#[allow(dead_code)]
mod helpers;

use brickwatch::breaker::BreakerState;
use brickwatch::data::models::{ScrapeStatus, Source};
use brickwatch::data::jobs::NewJob;
use brickwatch::data::models::{JobState, ScrapePriority};
use brickwatch::scraper::sources::{
    MarketplaceScraper, MetadataScraper, ScrapeTask, SourceScraper,
};
use chrono::{Duration, Utc};
use helpers::{FakeFetcher, FakeResponse};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

fn marketplace_scraper(pool: &PgPool) -> SourceScraper {
    SourceScraper::Marketplace(MarketplaceScraper::new(
        "https://www.bricklink.com".to_string(),
        helpers::marketplace_repo(pool),
        helpers::product_repo(pool),
    ))
}

fn metadata_scraper(pool: &PgPool) -> SourceScraper {
    SourceScraper::Metadata(MetadataScraper::new(
        "https://brickset.com".to_string(),
        helpers::metadata_repo(pool),
    ))
}

// ── S1: happy path ──────────────────────────────────────────────────

#[sqlx::test]
async fn happy_path_stores_record_payload_and_session(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::always(helpers::MARKETPLACE_PAGE));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = marketplace_scraper(&pool);

    let result = scraper.scrape(&ctx, &ScrapeTask::new("75192-1")).await;

    assert!(result.success, "scrape failed: {:?}", result.error);
    assert!(!result.not_found);
    assert_eq!(result.records_stored, 1);
    assert_eq!(result.retries, 1);

    // Exactly one repository row, scraped successfully.
    let item = helpers::marketplace_repo(&pool)
        .find_by_key("75192-1")
        .await
        .unwrap()
        .expect("row must exist");
    assert_eq!(item.scrape_status, ScrapeStatus::Success);
    assert_eq!(item.avg_price_new_cents, Some(84_999));

    // One session row with one stored product, one raw payload.
    let (session_count, stored): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(products_stored), 0) FROM scrape_sessions",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(session_count, 1);
    assert_eq!(stored, 1);

    let payload_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_payloads")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(payload_count, 1);

    // Breaker stays closed with a zero count.
    let (state, failures) = ctx.breaker.state(Source::Marketplace).await.unwrap();
    assert_eq!(state, BreakerState::Closed);
    assert_eq!(failures, 0);

    // Discovery: the product table learned about the set.
    let product = helpers::product_repo(&pool)
        .find("75192")
        .await
        .unwrap()
        .expect("product discovered");
    assert_eq!(product.item_id.as_deref(), Some("75192-1"));
}

// ── S2: not-found ───────────────────────────────────────────────────

#[sqlx::test]
async fn not_found_records_long_horizon_and_completes(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::new(vec![FakeResponse::Ok(
        helpers::METADATA_SEARCH_EMPTY.to_string(),
    )]));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = metadata_scraper(&pool);

    let result = scraper.scrape(&ctx, &ScrapeTask::new("77243")).await;

    assert!(result.success);
    assert!(result.not_found);
    assert_eq!(fetcher.call_count(), 1, "no retry on a not-found outcome");

    let row = helpers::metadata_repo(&pool)
        .find_by_key("77243")
        .await
        .unwrap()
        .expect("not_found row must persist");
    assert_eq!(row.scrape_status, ScrapeStatus::NotFound);
    assert_eq!(row.scrape_interval_days, 90);

    let next = row.next_scrape_at.expect("horizon set");
    assert!(next > Utc::now() + Duration::days(89));
    assert!(next < Utc::now() + Duration::days(91));

    // Not-found does not count as a breaker failure.
    let (state, failures) = ctx.breaker.state(Source::MetadataSite).await.unwrap();
    assert_eq!(state, BreakerState::Closed);
    assert_eq!(failures, 0);
}

// ── S3: transient failure then success ──────────────────────────────

#[sqlx::test]
async fn transient_failures_retry_and_complete(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::new(vec![
        FakeResponse::Http(503),
        FakeResponse::Http(503),
        FakeResponse::Ok(helpers::MARKETPLACE_PAGE.to_string()),
    ]));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = marketplace_scraper(&pool);

    let queue = helpers::queue(&pool);
    queue
        .enqueue(NewJob::new(
            "scrape-marketplace",
            json!({ "identifier": "75192-1" }),
            ScrapePriority::Normal,
        ))
        .await
        .unwrap();
    let job = queue.claim().await.unwrap().unwrap();

    let result = scraper.scrape(&ctx, &ScrapeTask::new("75192-1")).await;
    assert!(result.success);
    assert_eq!(result.retries, 3);
    assert_eq!(fetcher.call_count(), 3);

    // The pool reports the attempts actually consumed.
    queue
        .ack(job.id, &json!({ "recordsStored": 1 }), result.retries as i32)
        .await
        .unwrap();

    let completed = queue.list(JobState::Completed, 10).await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].attempts_made, 3);

    // Success resets the breaker.
    let (state, failures) = ctx.breaker.state(Source::Marketplace).await.unwrap();
    assert_eq!(state, BreakerState::Closed);
    assert_eq!(failures, 0);
}

// ── S4: exhausted retries ───────────────────────────────────────────

#[sqlx::test]
async fn exhausted_retries_fail_job_and_count_once(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::new(vec![
        FakeResponse::Http(503),
        FakeResponse::Http(503),
        FakeResponse::Http(503),
    ]));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = marketplace_scraper(&pool);

    let queue = helpers::queue(&pool);
    queue
        .enqueue(NewJob::new(
            "scrape-marketplace",
            json!({ "identifier": "75192-1" }),
            ScrapePriority::Normal,
        ))
        .await
        .unwrap();
    let job = queue.claim().await.unwrap().unwrap();

    let result = scraper.scrape(&ctx, &ScrapeTask::new("75192-1")).await;
    assert!(!result.success);
    assert_eq!(result.retries, 3);
    let reason = result.error.expect("failure reason");
    assert!(reason.contains("503"), "reason was: {reason}");

    let state = queue.fail(job.id, &reason, result.retries as i32).await.unwrap();
    assert_eq!(state, Some(JobState::Failed));

    let failed = queue.list(JobState::Failed, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].failed_reason.as_ref().unwrap().contains("503"));

    // One exhausted job counts exactly once toward the breaker.
    let (_, failures) = ctx.breaker.state(Source::Marketplace).await.unwrap();
    assert_eq!(failures, 1);
}

// ── S5: circuit trips ───────────────────────────────────────────────

#[sqlx::test]
async fn circuit_opens_after_sustained_failure_and_short_circuits(pool: PgPool) {
    let responses: Vec<FakeResponse> = (0..15).map(|_| FakeResponse::Http(503)).collect();
    let fetcher = Arc::new(FakeFetcher::new(responses));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = marketplace_scraper(&pool);

    for _ in 0..5 {
        let result = scraper.scrape(&ctx, &ScrapeTask::new("75192-1")).await;
        assert!(!result.success);
    }
    assert_eq!(fetcher.call_count(), 15);

    let (state, failures) = ctx.breaker.state(Source::Marketplace).await.unwrap();
    assert_eq!(state, BreakerState::Open);
    assert_eq!(failures, 5);

    // The sixth dispatch short-circuits without touching the fetcher.
    let result = scraper.scrape(&ctx, &ScrapeTask::new("75192-1")).await;
    assert!(!result.success);
    assert!(result.no_retry, "circuit-open must not burn queue attempts");
    assert!(result.error.unwrap().contains("circuit open"));
    assert_eq!(fetcher.call_count(), 15, "fetcher was not called");
}

// ── edge policies ───────────────────────────────────────────────────

#[sqlx::test]
async fn invalid_identifier_fails_without_fetching(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::new(Vec::new()));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = marketplace_scraper(&pool);

    let result = scraper
        .scrape(&ctx, &ScrapeTask::new("not an item id!"))
        .await;

    assert!(!result.success);
    assert!(result.no_retry);
    assert!(result.error.unwrap().contains("invalid input"));
    assert_eq!(fetcher.call_count(), 0);
}

#[sqlx::test]
async fn image_download_failure_does_not_fail_the_scrape(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::always(helpers::MARKETPLACE_PAGE));
    let ctx = helpers::context_with_images(&pool, fetcher, Arc::new(helpers::FailingImageStore));
    let scraper = marketplace_scraper(&pool);

    let result = scraper.scrape(&ctx, &ScrapeTask::new("75192-1")).await;
    assert!(result.success);

    let item = helpers::marketplace_repo(&pool)
        .find_by_key("75192-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.image_status.as_deref(), Some("failed"));
}

#[sqlx::test]
async fn two_hop_metadata_scrape_stores_both_payloads(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::new(vec![
        FakeResponse::Ok(helpers::METADATA_SEARCH_HIT.to_string()),
        FakeResponse::Ok(helpers::METADATA_PRODUCT_PAGE.to_string()),
    ]));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = metadata_scraper(&pool);

    let result = scraper.scrape(&ctx, &ScrapeTask::new("77243")).await;
    assert!(result.success, "scrape failed: {:?}", result.error);
    assert_eq!(result.retries, 1, "two hops live inside one attempt");
    assert_eq!(fetcher.call_count(), 2);

    // Both sub-fetches persisted their bytes under the same session.
    let payload_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_payloads")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(payload_count, 2);

    let set = helpers::metadata_repo(&pool)
        .find_by_key("77243")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(set.pieces, Some(7541));
}

#[sqlx::test]
async fn second_hop_failure_costs_one_attempt(pool: PgPool) {
    let fetcher = Arc::new(FakeFetcher::new(vec![
        FakeResponse::Ok(helpers::METADATA_SEARCH_HIT.to_string()),
        FakeResponse::Http(503),
        FakeResponse::Ok(helpers::METADATA_SEARCH_HIT.to_string()),
        FakeResponse::Ok(helpers::METADATA_PRODUCT_PAGE.to_string()),
    ]));
    let ctx = helpers::context(&pool, fetcher.clone());
    let scraper = metadata_scraper(&pool);

    let result = scraper.scrape(&ctx, &ScrapeTask::new("77243")).await;
    assert!(result.success, "scrape failed: {:?}", result.error);
    assert_eq!(result.retries, 2, "hop-2 failure consumed a single attempt");
}
