use sched_schemas::SchedulerError;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitState {
    pub cap: i32,
    pub consecutive_permanent_failures: i32,
}

pub async fn get_or_init(pool: &PgPool, bucket: &str, initial_cap: i32) -> Result<RateLimitState, SchedulerError> {
    let row: (i32, i32) = sqlx::query_as(
        r#"
        INSERT INTO rate_limit_state (bucket, cap) VALUES ($1, $2)
        ON CONFLICT (bucket) DO UPDATE SET bucket = EXCLUDED.bucket
        RETURNING cap, consecutive_permanent_failures
        "#,
    )
    .bind(bucket)
    .bind(initial_cap)
    .fetch_one(pool)
    .await?;
    Ok(RateLimitState {
        cap: row.0,
        consecutive_permanent_failures: row.1,
    })
}

/// Slow start: grow the cap linearly and reset the failure streak.
pub async fn record_successful_absorption(
    pool: &PgPool,
    bucket: &str,
    growth: i32,
) -> Result<RateLimitState, SchedulerError> {
    let row: (i32, i32) = sqlx::query_as(
        r#"
        UPDATE rate_limit_state SET
            cap = cap + $2,
            consecutive_permanent_failures = 0,
            updated_at = now()
        WHERE bucket = $1
        RETURNING cap, consecutive_permanent_failures
        "#,
    )
    .bind(bucket)
    .bind(growth)
    .fetch_one(pool)
    .await?;
    Ok(RateLimitState {
        cap: row.0,
        consecutive_permanent_failures: row.1,
    })
}

/// Halve the cap (floor 1) once `halving_streak` permanent failures have
/// accumulated in a row; otherwise just record the failure.
pub async fn record_permanent_failure(
    pool: &PgPool,
    bucket: &str,
    halving_streak: i32,
) -> Result<RateLimitState, SchedulerError> {
    let row: (i32, i32) = sqlx::query_as(
        r#"
        UPDATE rate_limit_state SET
            cap = CASE
                WHEN consecutive_permanent_failures + 1 >= $2 THEN GREATEST(1, cap / 2)
                ELSE cap
            END,
            consecutive_permanent_failures = CASE
                WHEN consecutive_permanent_failures + 1 >= $2 THEN 0
                ELSE consecutive_permanent_failures + 1
            END,
            updated_at = now()
        WHERE bucket = $1
        RETURNING cap, consecutive_permanent_failures
        "#,
    )
    .bind(bucket)
    .bind(halving_streak)
    .fetch_one(pool)
    .await?;
    Ok(RateLimitState {
        cap: row.0,
        consecutive_permanent_failures: row.1,
    })
}

pub async fn open_merge_proposal_count(pool: &PgPool, bucket: &str) -> Result<i64, SchedulerError> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT count(*) FROM merge_proposal mp
        JOIN change_set cs ON cs.id = mp.change_set_id
        JOIN named_publish_policy pol ON pol.campaign_id = cs.campaign_id
        WHERE mp.status = 'open' AND pol.rate_limit_bucket = $1
        "#,
    )
    .bind(bucket)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
