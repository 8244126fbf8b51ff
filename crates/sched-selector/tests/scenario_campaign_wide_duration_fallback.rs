// requires DATABASE_URL
use chrono::Utc;
use sched_config::SchedulerConfig;
use sched_db::{connect_from_env, migrate, upsert_candidate, NewCandidate, NewRun};
use sched_schemas::{Bucket, ResultClassification};
use uuid::Uuid;

async fn seed_codebase(pool: &sqlx::PgPool) -> Uuid {
    sqlx::query_scalar("INSERT INTO codebase (name, vcs_url, branch) VALUES ($1, $2, 'main') RETURNING id")
        .bind(format!("codebase-{}", Uuid::new_v4()))
        .bind("https://example.invalid/repo.git")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn seed_campaign(pool: &sqlx::PgPool) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO campaign (name, command, publish_mode, default_duration_seconds) \
         VALUES ($1, 'do-the-thing', 'push', NULL) RETURNING id",
    )
    .bind(format!("campaign-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn record_finished_run(
    pool: &sqlx::PgPool,
    codebase_id: Uuid,
    campaign_id: Uuid,
    candidate_id: Uuid,
    duration_seconds: i64,
) {
    let started_at = Utc::now() - chrono::Duration::seconds(duration_seconds);
    sched_db::insert_run(
        pool,
        &NewRun {
            id: Uuid::new_v4(),
            candidate_id,
            codebase_id,
            campaign_id,
            worker: "seed-worker".to_string(),
            started_at,
            finished_at: Some(started_at + chrono::Duration::seconds(duration_seconds)),
            result_code: Some("success".to_string()),
            classification: Some(ResultClassification::Success),
            description: None,
            value: Some(1.0),
            report_payload_hash: Uuid::new_v4().to_string(),
        },
    )
    .await
    .unwrap();
}

/// A codebase with no run history of its own under a campaign should pick
/// up the campaign-wide duration estimate from a *different* codebase's
/// history under the same campaign, not just its own (empty) slice.
#[tokio::test]
#[ignore = "requires database connection"]
async fn candidate_with_no_own_history_uses_campaign_wide_duration() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();

    let campaign_id = seed_campaign(&pool).await;

    let seasoned_codebase = seed_codebase(&pool).await;
    let seasoned_candidate = upsert_candidate(
        &pool,
        &NewCandidate {
            codebase_id: seasoned_codebase,
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
    record_finished_run(&pool, seasoned_codebase, campaign_id, seasoned_candidate.id, 900).await;

    let fresh_codebase = seed_codebase(&pool).await;
    upsert_candidate(
        &pool,
        &NewCandidate {
            codebase_id: fresh_codebase,
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

    let config = SchedulerConfig::default();
    let proposals = sched_selector::select_candidates(&pool, &config, false).await.unwrap();

    let fresh_proposal = proposals
        .iter()
        .find(|p| p.candidate.codebase_id == fresh_codebase)
        .expect("fresh codebase's candidate must still be proposed");
    assert_eq!(
        fresh_proposal.item.estimated_duration_secs, 900,
        "estimate should fall back to the campaign-wide median from the seasoned codebase"
    );
}
