use chrono::{DateTime, Utc};
use sched_schemas::{Bucket, SchedulerError};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub change_set_id: Option<Uuid>,
    pub context: Option<String>,
    pub value: Option<f64>,
    pub success_chance: Option<f64>,
    pub bucket: Bucket,
}

#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub change_set_id: Option<Uuid>,
    pub context: Option<String>,
    pub value: Option<f64>,
    pub success_chance: Option<f64>,
    pub bucket: Bucket,
    pub requested_at: DateTime<Utc>,
    pub codebase_active: bool,
    pub codebase_removed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub active_codebases_only: bool,
    pub campaign_id: Option<Uuid>,
    pub codebase_id: Option<Uuid>,
}

fn parse_bucket(s: &str) -> Bucket {
    match s {
        "control" => Bucket::Control,
        "hook" => Bucket::Hook,
        "manual" => Bucket::Manual,
        "update-existing-mp" => Bucket::UpdateExistingMp,
        "update-new-mp" => Bucket::UpdateNewMp,
        "reschedule" => Bucket::Reschedule,
        "missing-deps" => Bucket::MissingDeps,
        _ => Bucket::Default,
    }
}

/// Insert a candidate, or update it in place if one already exists for the
/// same `(codebase, campaign, change_set)` triple (the natural key the
/// `candidate` table's unique constraint enforces).
pub async fn upsert_candidate(
    pool: &PgPool,
    c: &NewCandidate,
) -> Result<CandidateRecord, SchedulerError> {
    // See `sched_db::queue::enqueue`: the unique key is two partial indexes,
    // not one plain constraint, so the conflict target depends on whether
    // this candidate carries a change_set_id.
    let conflict_target = if c.change_set_id.is_some() {
        "(codebase_id, campaign_id, change_set_id) WHERE change_set_id IS NOT NULL"
    } else {
        "(codebase_id, campaign_id) WHERE change_set_id IS NULL"
    };
    let sql = format!(
        r#"
        INSERT INTO candidate (codebase_id, campaign_id, change_set_id, context, value, success_chance, bucket)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT {conflict_target} DO UPDATE SET
            context = EXCLUDED.context,
            value = EXCLUDED.value,
            success_chance = EXCLUDED.success_chance,
            bucket = EXCLUDED.bucket,
            retracted = FALSE
        RETURNING id, codebase_id, campaign_id, change_set_id, context, value,
                  success_chance, bucket, requested_at
        "#
    );
    let row = sqlx::query(&sql)
        .bind(c.codebase_id)
        .bind(c.campaign_id)
        .bind(c.change_set_id)
        .bind(&c.context)
        .bind(c.value)
        .bind(c.success_chance)
        .bind(c.bucket.as_str())
        .fetch_one(pool)
        .await?;

    Ok(CandidateRecord {
        id: row.try_get("id")?,
        codebase_id: row.try_get("codebase_id")?,
        campaign_id: row.try_get("campaign_id")?,
        change_set_id: row.try_get("change_set_id")?,
        context: row.try_get("context")?,
        value: row.try_get("value")?,
        success_chance: row.try_get("success_chance")?,
        bucket: parse_bucket(row.try_get::<String, _>("bucket")?.as_str()),
        requested_at: row.try_get("requested_at")?,
        codebase_active: true,
        codebase_removed: false,
    })
}

pub async fn fetch_candidate(pool: &PgPool, id: Uuid) -> Result<Option<CandidateRecord>, SchedulerError> {
    let row = sqlx::query(
        r#"
        SELECT c.id, c.codebase_id, c.campaign_id, c.change_set_id, c.context, c.value,
               c.success_chance, c.bucket, c.requested_at, cb.active, cb.removed
        FROM candidate c
        JOIN codebase cb ON cb.id = c.codebase_id
        WHERE c.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(CandidateRecord {
            id: row.try_get("id")?,
            codebase_id: row.try_get("codebase_id")?,
            campaign_id: row.try_get("campaign_id")?,
            change_set_id: row.try_get("change_set_id")?,
            context: row.try_get("context")?,
            value: row.try_get("value")?,
            success_chance: row.try_get("success_chance")?,
            bucket: parse_bucket(row.try_get::<String, _>("bucket")?.as_str()),
            requested_at: row.try_get("requested_at")?,
            codebase_active: row.try_get("active")?,
            codebase_removed: row.try_get("removed")?,
        })
    })
    .transpose()
}

pub async fn retract_candidate(
    pool: &PgPool,
    codebase_id: Uuid,
    campaign_id: Uuid,
    change_set_id: Option<Uuid>,
) -> Result<(), SchedulerError> {
    let change_set_clause = if change_set_id.is_some() {
        "change_set_id = $3"
    } else {
        "change_set_id IS NULL"
    };
    let sql = format!(
        "UPDATE candidate SET retracted = TRUE WHERE codebase_id = $1 AND campaign_id = $2 AND {change_set_clause}"
    );
    let mut query = sqlx::query(&sql).bind(codebase_id).bind(campaign_id);
    if let Some(cs) = change_set_id {
        query = query.bind(cs);
    }
    query.execute(pool).await?;
    Ok(())
}

pub async fn candidates(
    pool: &PgPool,
    filter: &CandidateFilter,
) -> Result<Vec<CandidateRecord>, SchedulerError> {
    let mut sql = String::from(
        r#"
        SELECT c.id, c.codebase_id, c.campaign_id, c.change_set_id, c.context, c.value,
               c.success_chance, c.bucket, c.requested_at, cb.active, cb.removed
        FROM candidate c
        JOIN codebase cb ON cb.id = c.codebase_id
        WHERE c.retracted = FALSE
        "#,
    );
    let mut binds: Vec<Uuid> = Vec::new();
    if filter.active_codebases_only {
        sql.push_str(" AND cb.active = TRUE AND cb.removed = FALSE");
    }
    if let Some(campaign_id) = filter.campaign_id {
        binds.push(campaign_id);
        sql.push_str(&format!(" AND c.campaign_id = ${}", binds.len()));
    }
    if let Some(codebase_id) = filter.codebase_id {
        binds.push(codebase_id);
        sql.push_str(&format!(" AND c.codebase_id = ${}", binds.len()));
    }

    let mut query = sqlx::query(&sql);
    for b in &binds {
        query = query.bind(*b);
    }

    let rows = query.fetch_all(pool).await?;
    rows.into_iter()
        .map(|row| {
            Ok(CandidateRecord {
                id: row.try_get("id")?,
                codebase_id: row.try_get("codebase_id")?,
                campaign_id: row.try_get("campaign_id")?,
                change_set_id: row.try_get("change_set_id")?,
                context: row.try_get("context")?,
                value: row.try_get("value")?,
                success_chance: row.try_get("success_chance")?,
                bucket: parse_bucket(row.try_get::<String, _>("bucket")?.as_str()),
                requested_at: row.try_get("requested_at")?,
                codebase_active: row.try_get("active")?,
                codebase_removed: row.try_get("removed")?,
            })
        })
        .collect()
}
