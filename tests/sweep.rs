//! Scheduler sweep, missing-data detection, queue reset, retail import, and
//! rate-limiter fairness.

#[allow(dead_code)]
mod helpers;

use brickwatch::config::SchedulerConfig;
use brickwatch::data::jobs::NewJob;
use brickwatch::data::models::{JobState, ScrapePriority, Source};
use brickwatch::limiter::RateLimiter;
use brickwatch::parsers::ParsedMarketplaceItem;
use brickwatch::scraper::detector::MissingDataDetector;
use brickwatch::scraper::scheduler::{Scheduler, SweepRepos};
use brickwatch::scraper::sources::RetailImporter;
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

fn detector(pool: &PgPool) -> Arc<MissingDataDetector> {
    Arc::new(MissingDataDetector::new(
        helpers::queue(pool),
        helpers::marketplace_repo(pool),
        helpers::metadata_repo(pool),
        helpers::retirement_repo(pool),
    ))
}

fn scheduler(pool: &PgPool) -> Scheduler {
    Scheduler::new(
        helpers::queue(pool),
        SweepRepos {
            marketplace: helpers::marketplace_repo(pool),
            retirement: helpers::retirement_repo(pool),
            metadata: helpers::metadata_repo(pool),
            reddit: helpers::reddit_repo(pool),
        },
        detector(pool),
        SchedulerConfig::default(),
    )
}

fn item(item_id: &str) -> ParsedMarketplaceItem {
    ParsedMarketplaceItem {
        item_id: item_id.to_string(),
        item_type: "S".to_string(),
        name: Some(format!("Set {item_id}")),
        times_sold_new: Some(10),
        times_sold_used: Some(5),
        ..Default::default()
    }
}

async fn job_identifiers(pool: &PgPool, name: &str) -> Vec<(String, i16)> {
    let rows: Vec<(String, i16)> = sqlx::query_as(
        "SELECT payload ->> 'identifier', priority FROM scrape_jobs
         WHERE name = $1 ORDER BY priority, payload ->> 'identifier'",
    )
    .bind(name)
    .fetch_all(pool)
    .await
    .unwrap();
    rows
}

// ── sweep: discovery ────────────────────────────────────────────────

#[sqlx::test]
async fn new_products_appear_in_the_next_sweep(pool: PgPool) {
    helpers::product_repo(&pool)
        .upsert("75192", Some("75192-1"), Some("Millennium Falcon"))
        .await
        .unwrap();

    let report = scheduler(&pool).sweep(false).await.unwrap();
    assert!(report.jobs_enqueued >= 3, "report: {report:?}");
    assert!(report.priority_counts.high >= 3);

    // Every source that tracks product cross-links got a HIGH discovery job.
    assert_eq!(
        job_identifiers(&pool, "scrape-marketplace").await,
        vec![("75192-1".to_string(), 1)]
    );
    assert_eq!(
        job_identifiers(&pool, "scrape-metadata").await,
        vec![("75192".to_string(), 1)]
    );
    assert_eq!(
        job_identifiers(&pool, "scrape-reddit").await,
        vec![("75192".to_string(), 1)]
    );
}

#[sqlx::test]
async fn sweep_deduplicates_against_live_jobs(pool: PgPool) {
    helpers::product_repo(&pool)
        .upsert("75192", Some("75192-1"), None)
        .await
        .unwrap();

    let first = scheduler(&pool).sweep(false).await.unwrap();
    assert!(first.jobs_enqueued > 0);

    let second = scheduler(&pool).sweep(false).await.unwrap();
    assert_eq!(second.jobs_enqueued, 0, "report: {second:?}");
}

// ── sweep: due rows and priorities ──────────────────────────────────

#[sqlx::test]
async fn due_rows_enqueue_with_overdue_escalation(pool: PgPool) {
    let repo = helpers::marketplace_repo(&pool);
    repo.upsert(&item("75192-1"), None).await.unwrap();
    repo.upsert(&item("10316-1"), None).await.unwrap();
    repo.upsert(&item("76448-1"), None).await.unwrap();

    // 75192-1 slightly due, 10316-1 overdue beyond one interval,
    // 76448-1 not due at all.
    sqlx::query(
        "UPDATE marketplace_items SET next_scrape_at = NOW() - INTERVAL '1 hour'
         WHERE item_id = '75192-1'",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "UPDATE marketplace_items SET next_scrape_at = NOW() - INTERVAL '10 days'
         WHERE item_id = '10316-1'",
    )
    .execute(&pool)
    .await
    .unwrap();

    scheduler(&pool).sweep(false).await.unwrap();

    let jobs = job_identifiers(&pool, "scrape-marketplace").await;
    assert_eq!(
        jobs,
        vec![
            ("10316-1".to_string(), ScrapePriority::Medium as i16),
            ("75192-1".to_string(), ScrapePriority::Normal as i16),
        ]
    );
}

#[sqlx::test]
async fn not_found_rows_are_never_swept(pool: PgPool) {
    let repo = helpers::metadata_repo(&pool);
    helpers::product_repo(&pool)
        .upsert("77243", None, None)
        .await
        .unwrap();
    repo.mark_not_found("77243", Utc::now() + Duration::days(90))
        .await
        .unwrap();

    scheduler(&pool).sweep(false).await.unwrap();

    assert!(
        job_identifiers(&pool, "scrape-metadata").await.is_empty(),
        "future-dated not_found row must not be re-enqueued"
    );
}

#[sqlx::test]
async fn force_sweep_bypasses_intervals(pool: PgPool) {
    let repo = helpers::marketplace_repo(&pool);
    repo.upsert(&item("75192-1"), None).await.unwrap();
    // Freshly scraped: next_scrape_at is a week out, a normal sweep skips it.

    let normal = scheduler(&pool).sweep(false).await.unwrap();
    assert_eq!(normal.jobs_enqueued, 0);

    let forced = scheduler(&pool).sweep(true).await.unwrap();
    assert!(forced.jobs_enqueued >= 1);
    assert!(
        job_identifiers(&pool, "scrape-marketplace")
            .await
            .iter()
            .any(|(id, _)| id == "75192-1")
    );
}

// ── S6: obliterate then repopulate ──────────────────────────────────

#[sqlx::test]
async fn queue_reset_obliterates_and_reseeds_from_repositories(pool: PgPool) {
    let queue = helpers::queue(&pool);
    for i in 0..10 {
        queue
            .enqueue(NewJob::new(
                "scrape-reddit",
                json!({ "identifier": format!("{i:04}") }),
                ScrapePriority::Normal,
            ))
            .await
            .unwrap();
    }

    let cleared = queue.obliterate().await.unwrap();
    assert_eq!(cleared, 10);
    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.waiting + counts.active + counts.delayed, 0);

    // Current repository state: one due marketplace item.
    let repo = helpers::marketplace_repo(&pool);
    repo.upsert(&item("75192-1"), None).await.unwrap();
    sqlx::query("UPDATE marketplace_items SET next_scrape_at = NOW() - INTERVAL '1 hour'")
        .execute(&pool)
        .await
        .unwrap();

    let report = scheduler(&pool).sweep(false).await.unwrap();
    assert_eq!(report.jobs_enqueued, 1);
    assert_eq!(queue.counts().await.unwrap().waiting, 1);
}

// ── missing-data detection ──────────────────────────────────────────

#[sqlx::test]
async fn detector_enqueues_high_priority_gap_fills(pool: PgPool) {
    // A marketplace row scraped successfully but with no volume buckets.
    let no_volume = ParsedMarketplaceItem {
        item_id: "75192-1".to_string(),
        item_type: "S".to_string(),
        name: Some("Millennium Falcon".to_string()),
        ..Default::default()
    };
    helpers::marketplace_repo(&pool)
        .upsert(&no_volume, None)
        .await
        .unwrap();

    // A product with no metadata row and no retirement row.
    helpers::product_repo(&pool)
        .upsert("75192", Some("75192-1"), None)
        .await
        .unwrap();

    let report = detector(&pool).detect().await.unwrap();
    assert_eq!(report.missing_volume, 1);
    assert_eq!(report.missing_metadata, 1);
    assert_eq!(report.missing_retirement, 1);
    assert!(report.jobs_enqueued >= 3);

    assert_eq!(
        job_identifiers(&pool, "scrape-marketplace").await,
        vec![("75192-1".to_string(), ScrapePriority::High as i16)]
    );
    assert_eq!(
        job_identifiers(&pool, "scrape-metadata").await,
        vec![("75192".to_string(), ScrapePriority::High as i16)]
    );
    assert_eq!(
        job_identifiers(&pool, "scrape-retirement").await,
        vec![("all".to_string(), ScrapePriority::High as i16)]
    );

    // A second pass finds the same gaps but enqueues nothing new.
    let second = detector(&pool).detect().await.unwrap();
    assert_eq!(second.jobs_enqueued, 0);
}

// ── retail import ───────────────────────────────────────────────────

const RETAIL_PAGE: &str = r#"
    <div class="product-card" data-product-id="8741231">
      <span class="name">LEGO 75192 Millennium Falcon</span>
      <span class="price">$789.00</span>
      <span class="sold">1,204 sold</span>
    </div>
    <div class="product-card" data-product-id="8741232">
      <span class="name">LEGO 10316 Rivendell</span>
      <span class="price">$420.50</span>
    </div>"#;

#[sqlx::test]
async fn retail_import_parses_and_upserts_cards(pool: PgPool) {
    let ctx = helpers::context(&pool, Arc::new(helpers::FakeFetcher::new(Vec::new())));
    let importer = RetailImporter::new(brickwatch::data::retail::RetailRepo::new(pool.clone()));

    let counts = importer
        .import(&ctx, RETAIL_PAGE, "https://shopee.com/shop/lego")
        .await
        .unwrap();
    assert_eq!(counts.created, 2);

    let listing = importer
        .import(&ctx, RETAIL_PAGE, "https://shopee.com/shop/lego")
        .await
        .unwrap();
    assert_eq!(listing.updated, 2, "re-import updates, never duplicates");

    // Pasted bytes went through the session + raw payload path.
    let (sessions, payloads): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM scrape_sessions), (SELECT COUNT(*) FROM raw_payloads)",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(sessions, 2);
    assert_eq!(payloads, 2);
}

// ── rate-limit fairness ─────────────────────────────────────────────

#[sqlx::test]
async fn concurrent_waiters_are_spaced_by_the_minimum_interval(pool: PgPool) {
    let mut limits = helpers::fast_rate_limits();
    limits.reddit_interval = std::time::Duration::from_millis(100);
    let limiter = Arc::new(RateLimiter::new(pool.clone(), &limits));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter
                .wait_for_slot(Source::Reddit, "www.reddit.com")
                .await
                .unwrap();
            std::time::Instant::now()
        }));
    }

    let mut completions: Vec<std::time::Instant> = Vec::new();
    for handle in handles {
        completions.push(handle.await.unwrap());
    }
    completions.sort();

    for pair in completions.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= std::time::Duration::from_millis(80),
            "waiters completed {gap:?} apart"
        );
    }
}

// ── priority ordering across producers (queue property) ────────────

#[sqlx::test]
async fn first_claim_after_mixed_enqueues_is_high(pool: PgPool) {
    let queue = helpers::queue(&pool);
    for (id, priority) in [
        ("1111", ScrapePriority::Low),
        ("2222", ScrapePriority::High),
        ("3333", ScrapePriority::Normal),
    ] {
        queue
            .enqueue(NewJob::new(
                "scrape-metadata",
                json!({ "identifier": id }),
                priority,
            ))
            .await
            .unwrap();
    }

    let first = queue.claim().await.unwrap().unwrap();
    assert_eq!(first.priority, ScrapePriority::High);
    assert_eq!(first.state, JobState::Active);
}
