use chrono::{DateTime, Utc};
use sched_schemas::{ResultClassification, Run, SchedulerError};
use sqlx::Row;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub worker: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_code: Option<String>,
    pub classification: Option<ResultClassification>,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub report_payload_hash: String,
}

fn classification_str(c: ResultClassification) -> &'static str {
    match c {
        ResultClassification::Success => "success",
        ResultClassification::Transient => "transient",
        ResultClassification::Permanent => "permanent",
        ResultClassification::NoOp => "no-op",
    }
}

fn parse_classification(s: Option<String>) -> Option<ResultClassification> {
    match s.as_deref() {
        Some("success") => Some(ResultClassification::Success),
        Some("transient") => Some(ResultClassification::Transient),
        Some("permanent") => Some(ResultClassification::Permanent),
        Some("no-op") => Some(ResultClassification::NoOp),
        _ => None,
    }
}

/// Insert a run, idempotent on `id`. A second insert with an identical
/// `report_payload_hash` returns the original row; a differing hash is a
/// [`SchedulerError::Conflict`] (duplicate report with different content).
pub async fn insert_run(pool: &PgPool, r: &NewRun) -> Result<Run, SchedulerError> {
    if let Some(existing) = fetch_run(pool, r.id).await? {
        let existing_hash: String = sqlx::query_scalar("SELECT report_payload_hash FROM run WHERE id = $1")
            .bind(r.id)
            .fetch_one(pool)
            .await?;
        if existing_hash == r.report_payload_hash {
            return Ok(existing);
        }
        return Err(SchedulerError::Conflict(format!(
            "run {} already recorded with a different report",
            r.id
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO run (id, candidate_id, codebase_id, campaign_id, worker, started_at,
                          finished_at, result_code, classification, description, value,
                          report_payload_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(r.id)
    .bind(r.candidate_id)
    .bind(r.codebase_id)
    .bind(r.campaign_id)
    .bind(&r.worker)
    .bind(r.started_at)
    .bind(r.finished_at)
    .bind(&r.result_code)
    .bind(r.classification.map(classification_str))
    .bind(&r.description)
    .bind(r.value)
    .bind(&r.report_payload_hash)
    .execute(pool)
    .await?;

    fetch_run(pool, r.id)
        .await?
        .ok_or_else(|| SchedulerError::Transient("run vanished immediately after insert".into()))
}

pub async fn fetch_run(pool: &PgPool, id: Uuid) -> Result<Option<Run>, SchedulerError> {
    let row = sqlx::query(
        r#"
        SELECT id, candidate_id, codebase_id, campaign_id, worker, started_at, finished_at,
               result_code, classification, description
        FROM run WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(Run {
            id: row.try_get("id")?,
            candidate_id: row.try_get("candidate_id")?,
            codebase_id: row.try_get("codebase_id")?,
            campaign_id: row.try_get("campaign_id")?,
            worker: row.try_get("worker")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            result_code: row.try_get("result_code")?,
            classification: parse_classification(row.try_get("classification")?),
            description: row.try_get("description")?,
        })
    })
    .transpose()
}

/// Historical runs for `(codebase, campaign)` finished within `window`,
/// most recent first — exactly the slice `sched-stats`'s pure functions
/// expect.
pub async fn historical_runs(
    pool: &PgPool,
    codebase_id: Uuid,
    campaign_id: Uuid,
    window: chrono::Duration,
) -> Result<Vec<Run>, SchedulerError> {
    let since = Utc::now() - window;
    let rows = sqlx::query(
        r#"
        SELECT id, candidate_id, codebase_id, campaign_id, worker, started_at, finished_at,
               result_code, classification, description
        FROM run
        WHERE codebase_id = $1 AND campaign_id = $2 AND finished_at >= $3
        ORDER BY finished_at DESC
        "#,
    )
    .bind(codebase_id)
    .bind(campaign_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows_to_runs(rows)
}

/// Historical runs for `campaign_id` across every codebase, finished
/// within `window`, most recent first — the campaign-wide tier
/// `sched-stats::estimate_duration_seconds` falls back to when a
/// codebase's own history is too thin.
pub async fn campaign_wide_runs(
    pool: &PgPool,
    campaign_id: Uuid,
    window: chrono::Duration,
) -> Result<Vec<Run>, SchedulerError> {
    let since = Utc::now() - window;
    let rows = sqlx::query(
        r#"
        SELECT id, candidate_id, codebase_id, campaign_id, worker, started_at, finished_at,
               result_code, classification, description
        FROM run
        WHERE campaign_id = $1 AND finished_at >= $2
        ORDER BY finished_at DESC
        "#,
    )
    .bind(campaign_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows_to_runs(rows)
}

fn rows_to_runs(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Run>, SchedulerError> {
    rows.into_iter()
        .map(|row| {
            Ok(Run {
                id: row.try_get("id")?,
                candidate_id: row.try_get("candidate_id")?,
                codebase_id: row.try_get("codebase_id")?,
                campaign_id: row.try_get("campaign_id")?,
                worker: row.try_get("worker")?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
                result_code: row.try_get("result_code")?,
                classification: parse_classification(row.try_get("classification")?),
                description: row.try_get("description")?,
            })
        })
        .collect()
}
