// requires DATABASE_URL
use chrono::Utc;
use sched_config::SchedulerConfig;
use sched_db::{connect_from_env, migrate, upsert_candidate, NewCandidate};
use sched_ingest::{ingest_result, ResultReport};
use sched_schemas::{Bucket, ResultClassification};
use uuid::Uuid;

async fn seed_named_policy(pool: &sqlx::PgPool, campaign_id: Uuid, bucket: &str) {
    sqlx::query(
        "INSERT INTO named_publish_policy (name, campaign_id, rate_limit_bucket) VALUES ($1, $2, $3)",
    )
    .bind(format!("policy-{}", Uuid::new_v4()))
    .bind(campaign_id)
    .bind(bucket)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_codebase_and_campaign(pool: &sqlx::PgPool) -> (Uuid, Uuid) {
    let codebase_id: Uuid = sqlx::query_scalar(
        "INSERT INTO codebase (name, vcs_url, branch) VALUES ($1, $2, 'main') RETURNING id",
    )
    .bind(format!("codebase-{}", Uuid::new_v4()))
    .bind("https://example.invalid/repo.git")
    .fetch_one(pool)
    .await
    .unwrap();

    let campaign_id: Uuid = sqlx::query_scalar(
        "INSERT INTO campaign (name, command, publish_mode, default_duration_seconds) \
         VALUES ($1, 'do-the-thing', 'push', 1200) RETURNING id",
    )
    .bind(format!("campaign-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .unwrap();

    (codebase_id, campaign_id)
}

async fn seed_reserved_run(pool: &sqlx::PgPool) -> (Uuid, Uuid, Uuid) {
    let (codebase_id, campaign_id) = seed_codebase_and_campaign(pool).await;
    seed_reserved_run_for(pool, codebase_id, campaign_id).await
}

async fn seed_reserved_run_for(pool: &sqlx::PgPool, codebase_id: Uuid, campaign_id: Uuid) -> (Uuid, Uuid, Uuid) {
    let candidate = upsert_candidate(
        pool,
        &NewCandidate {
            codebase_id,
            campaign_id,
            change_set_id: None,
            context: Some("deadbeef".to_string()),
            value: Some(10.0),
            success_chance: None,
            bucket: Bucket::Default,
        },
    )
    .await
    .unwrap();

    let queue_item_id = sched_db::enqueue(
        pool,
        &sched_db::NewQueueItem {
            candidate_id: candidate.id,
            codebase_id,
            campaign_id,
            change_set_id: None,
            bucket: Bucket::Default,
            priority: -500,
            estimated_duration_secs: 600,
            success_probability: 0.5,
            earliest_start: None,
        },
    )
    .await
    .unwrap();

    let run_id = Uuid::new_v4();
    sched_db::claim_next(
        pool,
        "worker-1",
        run_id,
        Utc::now() + chrono::Duration::seconds(1200),
        &sched_db::QueueFilter::default(),
    )
    .await
    .unwrap()
    .expect("queue item must be claimable");

    (run_id, queue_item_id, candidate.id)
}

fn report(run_id: Uuid, result_code: &str) -> ResultReport {
    ResultReport {
        run_id,
        result_code: result_code.to_string(),
        failure_stage: None,
        failure_transient: None,
        result: Some("done".to_string()),
        result_branches: vec![],
        logs: vec![],
        value: Some(1.0),
        finish_time: Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn transient_result_requeues_into_reschedule_bucket() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let (run_id, queue_item_id, _candidate_id) = seed_reserved_run(&pool).await;

    let run = ingest_result(&pool, &config, report(run_id, "timeout")).await.unwrap();
    assert_eq!(run.classification, Some(ResultClassification::Transient));

    let items = sched_db::list(&pool, None, Some(Bucket::Reschedule), 10, 0).await.unwrap();
    assert!(items.iter().any(|i| i.id == queue_item_id));
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn no_op_result_removes_the_queue_item() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let (run_id, queue_item_id, _candidate_id) = seed_reserved_run(&pool).await;

    let run = ingest_result(&pool, &config, report(run_id, "nothing-to-do")).await.unwrap();
    assert_eq!(run.classification, Some(ResultClassification::NoOp));

    let still_reserved = sched_db::find_by_reserved_run(&pool, run_id).await.unwrap();
    assert!(still_reserved.is_none(), "terminal run must not still hold the queue item");
    let _ = queue_item_id;
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn duplicate_report_with_identical_payload_replays_without_conflict() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let (run_id, _queue_item_id, _candidate_id) = seed_reserved_run(&pool).await;
    let r = report(run_id, "success");

    let first = ingest_result(&pool, &config, r.clone()).await.unwrap();
    let second = ingest_result(&pool, &config, r).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.classification, second.classification);
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn report_for_an_unreserved_run_is_stale() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let err = ingest_result(&pool, &config, report(Uuid::new_v4(), "success"))
        .await
        .unwrap_err();
    assert!(matches!(err, sched_schemas::SchedulerError::Stale(_)));
}

/// S6: a later `nothing-new-to-do` run must not shift `last_effective_run`
/// away from an earlier success, even though it does become `last_run`.
#[tokio::test]
#[ignore = "requires database connection"]
async fn nothing_new_to_do_run_leaves_last_effective_run_unchanged() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let (codebase_id, campaign_id) = seed_codebase_and_campaign(&pool).await;

    let (r100, _, _) = seed_reserved_run_for(&pool, codebase_id, campaign_id).await;
    let run_r100 = ingest_result(&pool, &config, report(r100, "success")).await.unwrap();
    assert_eq!(run_r100.classification, Some(ResultClassification::Success));

    let (r101, _, _) = seed_reserved_run_for(&pool, codebase_id, campaign_id).await;
    let run_r101 = ingest_result(&pool, &config, report(r101, "nothing-new-to-do")).await.unwrap();
    assert_eq!(run_r101.classification, Some(ResultClassification::NoOp));

    let last_run: Uuid = sqlx::query_scalar(
        "SELECT run_id FROM last_run WHERE codebase_id = $1 AND campaign_id = $2",
    )
    .bind(codebase_id)
    .bind(campaign_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(last_run, r101, "last_run must follow the most recent finished run");

    let last_effective_run: Uuid = sqlx::query_scalar(
        "SELECT run_id FROM last_effective_runs WHERE codebase_id = $1 AND campaign_id = $2",
    )
    .bind(codebase_id)
    .bind(campaign_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(last_effective_run, r100, "a no-op run must not become the last effective run");

    assert!(
        sched_db::campaign_succeeded_for_codebase(&pool, codebase_id, campaign_id)
            .await
            .unwrap(),
        "dependency gating must still see R100 as the last effective (successful) run"
    );
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn permanent_failure_halves_the_rate_limit_cap_once_the_streak_hits() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig {
        slow_start_initial_cap: 4,
        slow_start_halving_streak: 1,
        ..SchedulerConfig::default()
    };

    let (codebase_id, campaign_id) = seed_codebase_and_campaign(&pool).await;
    let bucket = format!("bucket-{}", Uuid::new_v4());
    seed_named_policy(&pool, campaign_id, &bucket).await;

    let before = sched_db::rate_limit_get_or_init(&pool, &bucket, config.slow_start_initial_cap as i32)
        .await
        .unwrap();
    assert_eq!(before.cap, 4);

    let (run_id, _, _) = seed_reserved_run_for(&pool, codebase_id, campaign_id).await;
    let run = ingest_result(&pool, &config, report(run_id, "build-failed")).await.unwrap();
    assert_eq!(run.classification, Some(ResultClassification::Permanent));

    let after = sched_db::rate_limit_get_or_init(&pool, &bucket, config.slow_start_initial_cap as i32)
        .await
        .unwrap();
    assert_eq!(after.cap, 2, "a single failure already meets halving_streak = 1");
}
