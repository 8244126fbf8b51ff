// requires DATABASE_URL
use sched_assign::{AssignmentFilter, AssignmentService};
use sched_config::SchedulerConfig;
use sched_db::{connect_from_env, migrate, upsert_candidate, NewCandidate};
use sched_schemas::Bucket;
use uuid::Uuid;

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

#[tokio::test]
#[ignore = "requires database connection"]
async fn request_assignment_materializes_a_complete_bundle() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();

    let (codebase_id, campaign_id) = seed_codebase_and_campaign(&pool).await;
    let candidate = upsert_candidate(
        &pool,
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

    sched_db::enqueue(
        &pool,
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

    let service = AssignmentService::new(pool.clone());
    let config = SchedulerConfig::default();

    let outcome = service
        .request_assignment(&config, "worker-1", AssignmentFilter::default())
        .await
        .unwrap();
    let bundle = outcome.expect("queue had an eligible item");

    assert_eq!(bundle.codebase_id, codebase_id);
    assert_eq!(bundle.campaign_id, campaign_id);
    assert_eq!(bundle.command, "do-the-thing");
    assert_eq!(bundle.revision_hint.as_deref(), Some("deadbeef"));
    // lease = max(2*600, 600) = 1200s.
    let lease_seconds = (bundle.lease_expires_at - chrono::Utc::now()).num_seconds();
    assert!((1190..=1200).contains(&lease_seconds));

    // A second poll for the same worker/campaign finds nothing left.
    let second = service
        .request_assignment(&config, "worker-2", AssignmentFilter::default())
        .await
        .unwrap();
    assert!(second.is_err(), "item is reserved, should report no-work");
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn cancel_assignment_returns_item_to_the_queue() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();

    let (codebase_id, campaign_id) = seed_codebase_and_campaign(&pool).await;
    let candidate = upsert_candidate(
        &pool,
        &NewCandidate {
            codebase_id,
            campaign_id,
            change_set_id: None,
            context: None,
            value: Some(10.0),
            success_chance: None,
            bucket: Bucket::Default,
        },
    )
    .await
    .unwrap();

    let queue_item_id = sched_db::enqueue(
        &pool,
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

    let service = AssignmentService::new(pool.clone());
    let config = SchedulerConfig::default();
    service
        .request_assignment(&config, "worker-1", AssignmentFilter::default())
        .await
        .unwrap()
        .expect("queue had an eligible item");

    service.cancel_assignment(queue_item_id).await.unwrap();

    let reclaimed = service
        .request_assignment(&config, "worker-2", AssignmentFilter::default())
        .await
        .unwrap();
    assert!(reclaimed.is_ok(), "cancelled item must be reclaimable");
}
