use sched_schemas::SchedulerError;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewResultBranch {
    pub role: String,
    pub revision: Option<String>,
}

/// Append a run's reported branches, unabsorbed by default (§4.7 step 2).
pub async fn insert_result_branches(
    pool: &PgPool,
    run_id: Uuid,
    branches: &[NewResultBranch],
) -> Result<(), SchedulerError> {
    for b in branches {
        sqlx::query(
            "INSERT INTO result_branch (run_id, role, revision, absorbed) VALUES ($1, $2, $3, FALSE)",
        )
        .bind(run_id)
        .bind(&b.role)
        .bind(&b.revision)
        .execute(pool)
        .await?;
    }
    Ok(())
}
