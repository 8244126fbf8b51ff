use sched_schemas::SchedulerError;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn campaign_dependencies(pool: &PgPool, campaign_id: Uuid) -> Result<Vec<Uuid>, SchedulerError> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT depends_on_campaign_id FROM campaign_dependency WHERE campaign_id = $1",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Whether the last *effective* (non-no-op) run of `campaign_id` against
/// `codebase_id` succeeded — the prerequisite check the Candidate
/// Selector needs for campaign-level dependency resolution (§4.4 step 2).
pub async fn campaign_succeeded_for_codebase(
    pool: &PgPool,
    codebase_id: Uuid,
    campaign_id: Uuid,
) -> Result<bool, SchedulerError> {
    let classification: Option<String> = sqlx::query_scalar(
        "SELECT classification FROM last_effective_runs WHERE codebase_id = $1 AND campaign_id = $2",
    )
    .bind(codebase_id)
    .bind(campaign_id)
    .fetch_optional(pool)
    .await?
    .flatten();
    Ok(classification.as_deref() == Some("success"))
}

pub async fn has_any_run(
    pool: &PgPool,
    codebase_id: Uuid,
    campaign_id: Uuid,
) -> Result<bool, SchedulerError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM run WHERE codebase_id = $1 AND campaign_id = $2 AND finished_at IS NOT NULL)",
    )
    .bind(codebase_id)
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn has_queue_item(
    pool: &PgPool,
    codebase_id: Uuid,
    campaign_id: Uuid,
    change_set_id: Option<Uuid>,
) -> Result<bool, SchedulerError> {
    let exists: bool = if let Some(cs) = change_set_id {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM queue WHERE codebase_id = $1 AND campaign_id = $2 AND change_set_id = $3)",
        )
        .bind(codebase_id)
        .bind(campaign_id)
        .bind(cs)
        .fetch_one(pool)
        .await?
    } else {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM queue WHERE codebase_id = $1 AND campaign_id = $2 AND change_set_id IS NULL)",
        )
        .bind(codebase_id)
        .bind(campaign_id)
        .fetch_one(pool)
        .await?
    };
    Ok(exists)
}
