use sched_schemas::{MergeProposal, MergeProposalStatus, SchedulerError};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewPublish {
    pub run_id: Uuid,
    pub role: String,
    pub mode: String,
}

pub async fn record_publish(pool: &PgPool, p: &NewPublish) -> Result<Uuid, SchedulerError> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO publish (run_id, role, mode) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(p.run_id)
    .bind(&p.role)
    .bind(&p.mode)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn set_branch_absorbed(
    pool: &PgPool,
    run_id: Uuid,
    role: &str,
    absorbed: bool,
) -> Result<(), SchedulerError> {
    let result = sqlx::query(
        "UPDATE result_branch SET absorbed = $1 WHERE run_id = $2 AND role = $3",
    )
    .bind(absorbed)
    .bind(run_id)
    .bind(role)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(SchedulerError::NotFound(format!(
            "no result_branch for run {run_id} role {role}"
        )));
    }
    Ok(())
}

pub async fn all_branches_absorbed(pool: &PgPool, run_id: Uuid) -> Result<bool, SchedulerError> {
    let unabsorbed: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM result_branch WHERE run_id = $1 AND absorbed = FALSE",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;
    Ok(unabsorbed == 0)
}

fn status_str(s: MergeProposalStatus) -> &'static str {
    match s {
        MergeProposalStatus::Open => "open",
        MergeProposalStatus::Merged => "merged",
        MergeProposalStatus::Applied => "applied",
        MergeProposalStatus::Closed => "closed",
        MergeProposalStatus::Rejected => "rejected",
        MergeProposalStatus::Abandoned => "abandoned",
    }
}

fn parse_status(s: &str) -> MergeProposalStatus {
    match s {
        "merged" => MergeProposalStatus::Merged,
        "applied" => MergeProposalStatus::Applied,
        "closed" => MergeProposalStatus::Closed,
        "rejected" => MergeProposalStatus::Rejected,
        "abandoned" => MergeProposalStatus::Abandoned,
        _ => MergeProposalStatus::Open,
    }
}

#[derive(Debug, Clone)]
pub struct NewMergeProposal {
    pub change_set_id: Uuid,
    pub run_id: Option<Uuid>,
    pub role: Option<String>,
    pub url: String,
    pub target_branch: Option<String>,
    pub revision: Option<String>,
}

pub async fn record_merge_proposal(pool: &PgPool, p: &NewMergeProposal) -> Result<Uuid, SchedulerError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO merge_proposal (change_set_id, run_id, role, url, target_branch, revision)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(p.change_set_id)
    .bind(p.run_id)
    .bind(&p.role)
    .bind(&p.url)
    .bind(&p.target_branch)
    .bind(&p.revision)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn fetch_merge_proposal(pool: &PgPool, id: Uuid) -> Result<Option<MergeProposal>, SchedulerError> {
    let row = sqlx::query(
        "SELECT id, change_set_id, run_id, role, url, status, target_branch, revision \
         FROM merge_proposal WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(MergeProposal {
            id: row.try_get("id")?,
            change_set_id: row.try_get("change_set_id")?,
            run_id: row.try_get("run_id")?,
            role: row.try_get("role")?,
            url: row.try_get("url")?,
            status: parse_status(row.try_get::<String, _>("status")?.as_str()),
            target_branch: row.try_get("target_branch")?,
            revision: row.try_get("revision")?,
        })
    })
    .transpose()
}

/// Update a proposal's status, returning its `change_set_id` for the
/// caller's follow-up (§4.9).
pub async fn set_merge_proposal_status(
    pool: &PgPool,
    id: Uuid,
    status: MergeProposalStatus,
) -> Result<Uuid, SchedulerError> {
    let change_set_id: Uuid = sqlx::query_scalar(
        "UPDATE merge_proposal SET status = $1 WHERE id = $2 RETURNING change_set_id",
    )
    .bind(status_str(status))
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(change_set_id)
}
