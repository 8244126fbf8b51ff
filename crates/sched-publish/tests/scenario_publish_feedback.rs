// requires DATABASE_URL
use chrono::Utc;
use sched_config::SchedulerConfig;
use sched_db::{connect_from_env, migrate, upsert_candidate, NewCandidate, NewMergeProposal, NewRun};
use sched_publish::{on_merge_proposal_status_changed, on_publish_success};
use sched_schemas::{Bucket, ChangeSetState, MergeProposalStatus, ResultClassification};
use uuid::Uuid;

async fn seed(pool: &sqlx::PgPool) -> (Uuid, Uuid, Uuid) {
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
         VALUES ($1, 'do-the-thing', 'propose', 600) RETURNING id",
    )
    .bind(format!("campaign-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .unwrap();

    let change_set_id: Uuid = sqlx::query_scalar(
        "INSERT INTO change_set (codebase_id, campaign_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(codebase_id)
    .bind(campaign_id)
    .fetch_one(pool)
    .await
    .unwrap();

    (codebase_id, campaign_id, change_set_id)
}

async fn seed_successful_run(pool: &sqlx::PgPool, codebase_id: Uuid, campaign_id: Uuid, change_set_id: Uuid) -> Uuid {
    let candidate = upsert_candidate(
        pool,
        &NewCandidate {
            codebase_id,
            campaign_id,
            change_set_id: Some(change_set_id),
            context: None,
            value: Some(10.0),
            success_chance: None,
            bucket: Bucket::Default,
        },
    )
    .await
    .unwrap();

    let run_id = Uuid::new_v4();
    let now = Utc::now();
    sched_db::insert_run(
        pool,
        &NewRun {
            id: run_id,
            candidate_id: candidate.id,
            codebase_id,
            campaign_id,
            worker: "worker-1".to_string(),
            started_at: now,
            finished_at: Some(now),
            result_code: Some("success".to_string()),
            classification: Some(ResultClassification::Success),
            description: None,
            value: Some(1.0),
            report_payload_hash: "hash-1".to_string(),
        },
    )
    .await
    .unwrap();

    sched_db::insert_result_branches(
        pool,
        run_id,
        &[sched_db::NewResultBranch {
            role: "main".to_string(),
            revision: Some("rev-1".to_string()),
        }],
    )
    .await
    .unwrap();

    run_id
}

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

#[tokio::test]
#[ignore = "requires database connection"]
async fn publish_success_absorbs_branch_and_advances_change_set() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();

    let (codebase_id, campaign_id, change_set_id) = seed(&pool).await;
    let run_id = seed_successful_run(&pool, codebase_id, campaign_id, change_set_id).await;
    let config = SchedulerConfig::default();

    let state = on_publish_success(&pool, &config, run_id, "main", "propose").await.unwrap();
    assert_eq!(state, Some(ChangeSetState::Done));

    assert!(sched_db::all_branches_absorbed(&pool, run_id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn publish_success_grows_the_rate_limit_cap() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let (codebase_id, campaign_id, change_set_id) = seed(&pool).await;
    let bucket = format!("bucket-{}", Uuid::new_v4());
    seed_named_policy(&pool, campaign_id, &bucket).await;

    let before = sched_db::rate_limit_get_or_init(&pool, &bucket, config.slow_start_initial_cap as i32)
        .await
        .unwrap();
    assert_eq!(before.cap, config.slow_start_initial_cap as i32);

    let run_id = seed_successful_run(&pool, codebase_id, campaign_id, change_set_id).await;
    on_publish_success(&pool, &config, run_id, "main", "propose").await.unwrap();

    let after = sched_db::rate_limit_get_or_init(&pool, &bucket, config.slow_start_initial_cap as i32)
        .await
        .unwrap();
    assert_eq!(after.cap, before.cap + config.slow_start_growth_per_success as i32);
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn diverged_closed_proposal_enqueues_update_existing_mp_refresh() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let (codebase_id, campaign_id, change_set_id) = seed(&pool).await;
    let run_id = seed_successful_run(&pool, codebase_id, campaign_id, change_set_id).await;

    let mp_id = sched_publish::record_merge_proposal(
        &pool,
        &NewMergeProposal {
            change_set_id,
            run_id: Some(run_id),
            role: Some("main".to_string()),
            url: format!("https://example.invalid/mp/{}", Uuid::new_v4()),
            target_branch: Some("main".to_string()),
            revision: Some("rev-1".to_string()),
        },
    )
    .await
    .unwrap();

    on_merge_proposal_status_changed(
        &pool,
        &config,
        mp_id,
        MergeProposalStatus::Rejected,
        Some("rev-2"),
    )
    .await
    .unwrap();

    let items = sched_db::list(&pool, Some(campaign_id), Some(Bucket::UpdateExistingMp), 10, 0)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].priority, config.update_existing_mp_priority);
}

#[tokio::test]
#[ignore = "requires database connection"]
async fn rejected_proposal_with_matching_revision_does_not_enqueue_refresh() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();
    let config = SchedulerConfig::default();

    let (codebase_id, campaign_id, change_set_id) = seed(&pool).await;
    let run_id = seed_successful_run(&pool, codebase_id, campaign_id, change_set_id).await;

    let mp_id = sched_publish::record_merge_proposal(
        &pool,
        &NewMergeProposal {
            change_set_id,
            run_id: Some(run_id),
            role: Some("main".to_string()),
            url: format!("https://example.invalid/mp/{}", Uuid::new_v4()),
            target_branch: Some("main".to_string()),
            revision: Some("rev-1".to_string()),
        },
    )
    .await
    .unwrap();

    on_merge_proposal_status_changed(
        &pool,
        &config,
        mp_id,
        MergeProposalStatus::Rejected,
        Some("rev-1"),
    )
    .await
    .unwrap();

    let items = sched_db::list(&pool, Some(campaign_id), Some(Bucket::UpdateExistingMp), 10, 0)
        .await
        .unwrap();
    assert!(items.is_empty());
}
