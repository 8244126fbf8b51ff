use sched_schemas::SchedulerError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CodebaseRecord {
    pub id: Uuid,
    pub name: String,
    pub vcs_url: String,
    pub vcs_kind: String,
    pub subpath: Option<String>,
    pub branch: String,
}

pub async fn fetch_codebase(pool: &PgPool, id: Uuid) -> Result<Option<CodebaseRecord>, SchedulerError> {
    let row = sqlx::query("SELECT id, name, vcs_url, vcs_kind, subpath, branch FROM codebase WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|row| {
        Ok(CodebaseRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            vcs_url: row.try_get("vcs_url")?,
            vcs_kind: row.try_get("vcs_kind")?,
            subpath: row.try_get("subpath")?,
            branch: row.try_get("branch")?,
        })
    })
    .transpose()
}

/// Most recent run of the same `(codebase, campaign)` whose state the
/// next run could resume from — any finished run is eligible, the
/// Assignment Service decides whether resumption is actually usable.
pub async fn most_recent_run_id(
    pool: &PgPool,
    codebase_id: Uuid,
    campaign_id: Uuid,
) -> Result<Option<Uuid>, SchedulerError> {
    let id: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM run
        WHERE codebase_id = $1 AND campaign_id = $2 AND finished_at IS NOT NULL
        ORDER BY finished_at DESC LIMIT 1
        "#,
    )
    .bind(codebase_id)
    .bind(campaign_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}
