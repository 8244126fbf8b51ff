use chrono::{DateTime, Utc};
use sched_schemas::{Bucket, QueueItem, SchedulerError};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// `CASE` expression giving each bucket its dominant sort rank; mirrors
/// `Bucket`'s declaration order exactly (the enum is the source of truth,
/// this is the SQL-side mirror of it).
const BUCKET_RANK_CASE: &str = r#"
    CASE bucket
        WHEN 'control' THEN 0
        WHEN 'hook' THEN 1
        WHEN 'manual' THEN 2
        WHEN 'update-existing-mp' THEN 3
        WHEN 'update-new-mp' THEN 4
        WHEN 'reschedule' THEN 5
        WHEN 'missing-deps' THEN 6
        ELSE 7
    END
"#;

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

fn row_to_item(row: &sqlx::postgres::PgRow) -> Result<QueueItem, SchedulerError> {
    Ok(QueueItem {
        id: row.try_get("id")?,
        candidate_id: row.try_get("candidate_id")?,
        bucket: parse_bucket(row.try_get::<String, _>("bucket")?.as_str()),
        priority: row.try_get("priority")?,
        estimated_duration_secs: row.try_get("estimated_duration_seconds")?,
        success_probability: row.try_get("success_probability")?,
        created_at: row.try_get("created_at")?,
        last_scheduled_at: None,
    })
}

#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub candidate_id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub change_set_id: Option<Uuid>,
    pub bucket: Bucket,
    pub priority: i64,
    pub estimated_duration_secs: i64,
    pub success_probability: f64,
    pub earliest_start: Option<DateTime<Utc>>,
}

/// Enqueue, enforcing the `(codebase, campaign, change_set)` unique key.
/// A conflicting enqueue keeps the existing row but adopts the new
/// priority/bucket only if the new priority is strictly better (lower).
pub async fn enqueue(pool: &PgPool, item: &NewQueueItem) -> Result<Uuid, SchedulerError> {
    // The unique key is enforced by two partial indexes (NULL change_set_id
    // is not distinct for our purposes, unlike Postgres's default), so the
    // conflict target differs depending on whether this item carries one.
    let conflict_target = if item.change_set_id.is_some() {
        "(codebase_id, campaign_id, change_set_id) WHERE change_set_id IS NOT NULL"
    } else {
        "(codebase_id, campaign_id) WHERE change_set_id IS NULL"
    };
    let sql = format!(
        r#"
        INSERT INTO queue (candidate_id, codebase_id, campaign_id, change_set_id, bucket,
                            priority, estimated_duration_seconds, success_probability, earliest_start)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, now()))
        ON CONFLICT {conflict_target} DO UPDATE SET
            priority = LEAST(queue.priority, EXCLUDED.priority),
            bucket = CASE WHEN EXCLUDED.priority < queue.priority THEN EXCLUDED.bucket ELSE queue.bucket END,
            estimated_duration_seconds = EXCLUDED.estimated_duration_seconds,
            success_probability = EXCLUDED.success_probability
        RETURNING id
        "#
    );
    let row = sqlx::query(&sql)
        .bind(item.candidate_id)
        .bind(item.codebase_id)
        .bind(item.campaign_id)
        .bind(item.change_set_id)
        .bind(item.bucket.as_str())
        .bind(item.priority)
        .bind(item.estimated_duration_secs)
        .bind(item.success_probability)
        .bind(item.earliest_start)
        .fetch_one(pool)
        .await?;

    Ok(row.try_get("id")?)
}

#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub exclude_hosts: Vec<String>,
    pub exclude_campaigns: Vec<Uuid>,
    pub require_bucket_subset: Option<Vec<Bucket>>,
    pub min_priority: Option<i64>,
    pub campaign_id: Option<Uuid>,
    pub bucket: Option<Bucket>,
}

fn apply_filter(sql: &mut String, binds_desc: &mut Vec<String>, filter: &QueueFilter) {
    if !filter.exclude_hosts.is_empty() {
        binds_desc.push("exclude_hosts".into());
        sql.push_str(&format!(
            " AND cb.name <> ALL(${})",
            binds_desc.len()
        ));
    }
    if !filter.exclude_campaigns.is_empty() {
        binds_desc.push("exclude_campaigns".into());
        sql.push_str(&format!(" AND q.campaign_id <> ALL(${})", binds_desc.len()));
    }
    if let Some(buckets) = &filter.require_bucket_subset {
        if !buckets.is_empty() {
            binds_desc.push("bucket_subset".into());
            sql.push_str(&format!(" AND q.bucket = ANY(${})", binds_desc.len()));
        }
    }
    if filter.min_priority.is_some() {
        binds_desc.push("min_priority".into());
        sql.push_str(&format!(" AND q.priority >= ${}", binds_desc.len()));
    }
    if filter.campaign_id.is_some() {
        binds_desc.push("campaign_id".into());
        sql.push_str(&format!(" AND q.campaign_id = ${}", binds_desc.len()));
    }
    if filter.bucket.is_some() {
        binds_desc.push("bucket".into());
        sql.push_str(&format!(" AND q.bucket = ${}", binds_desc.len()));
    }
}

/// Bind the filter's dynamic values onto `query` in the exact order
/// [`apply_filter`] appended their placeholders.
macro_rules! bind_filter {
    ($query:expr, $filter:expr, $binds_desc:expr) => {{
        let mut q = $query;
        for desc in &$binds_desc {
            q = match desc.as_str() {
                "exclude_hosts" => q.bind($filter.exclude_hosts.clone()),
                "exclude_campaigns" => q.bind($filter.exclude_campaigns.clone()),
                "bucket_subset" => q.bind(
                    $filter
                        .require_bucket_subset
                        .as_ref()
                        .unwrap()
                        .iter()
                        .map(|b| b.as_str().to_string())
                        .collect::<Vec<_>>(),
                ),
                "min_priority" => q.bind($filter.min_priority.unwrap()),
                "campaign_id" => q.bind($filter.campaign_id.unwrap()),
                "bucket" => q.bind($filter.bucket.unwrap().as_str()),
                other => unreachable!("unknown filter bind: {other}"),
            };
        }
        q
    }};
}

/// Atomically pop the next eligible item and reserve it for `worker`
/// against the pre-allocated `run_id`, in one row-level-locked
/// transaction: `SELECT ... FOR UPDATE SKIP LOCKED` then an `UPDATE`.
pub async fn claim_next(
    pool: &PgPool,
    worker: &str,
    run_id: Uuid,
    lease_expires_at: DateTime<Utc>,
    filter: &QueueFilter,
) -> Result<Option<QueueItem>, SchedulerError> {
    let mut tx = pool.begin().await?;

    let mut sql = format!(
        r#"
        SELECT q.id, q.candidate_id, q.bucket, q.priority, q.estimated_duration_seconds,
               q.success_probability, q.created_at
        FROM queue q
        JOIN codebase cb ON cb.id = q.codebase_id
        WHERE q.reserved_by IS NULL AND q.earliest_start <= now()
        "#
    );
    let mut binds_desc = Vec::new();
    apply_filter(&mut sql, &mut binds_desc, filter);
    sql.push_str(&format!(
        " ORDER BY {BUCKET_RANK_CASE}, q.priority ASC, q.id ASC LIMIT 1 FOR UPDATE OF q SKIP LOCKED"
    ));

    let query = bind_filter!(sqlx::query(&sql), filter, binds_desc);
    let candidate_row = query.fetch_optional(&mut *tx).await?;

    let Some(row) = candidate_row else {
        tx.commit().await?;
        return Ok(None);
    };
    let item = row_to_item(&row)?;

    sqlx::query(
        r#"
        UPDATE queue SET reserved_by = $1, reserved_run_id = $2, assigned_at = now(), lease_expires_at = $3
        WHERE id = $4
        "#,
    )
    .bind(worker)
    .bind(run_id)
    .bind(lease_expires_at)
    .bind(item.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(item))
}

/// The reservation state the Result Ingestor needs to validate and act on
/// an incoming report (§4.7 step 1): which queue item `run_id` belongs to,
/// and the codebase/campaign/change-set/bucket/priority it carries.
#[derive(Debug, Clone)]
pub struct ReservedQueueItem {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub change_set_id: Option<Uuid>,
    pub bucket: Bucket,
    pub priority: i64,
    pub worker: String,
    pub assigned_at: Option<DateTime<Utc>>,
}

pub async fn find_by_reserved_run(
    pool: &PgPool,
    run_id: Uuid,
) -> Result<Option<ReservedQueueItem>, SchedulerError> {
    let row = sqlx::query(
        r#"
        SELECT id, candidate_id, codebase_id, campaign_id, change_set_id, bucket, priority,
               reserved_by, assigned_at
        FROM queue WHERE reserved_run_id = $1
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(ReservedQueueItem {
            id: row.try_get("id")?,
            candidate_id: row.try_get("candidate_id")?,
            codebase_id: row.try_get("codebase_id")?,
            campaign_id: row.try_get("campaign_id")?,
            change_set_id: row.try_get("change_set_id")?,
            bucket: parse_bucket(row.try_get::<String, _>("bucket")?.as_str()),
            priority: row.try_get("priority")?,
            worker: row.try_get("reserved_by")?,
            assigned_at: row.try_get("assigned_at")?,
        })
    })
    .transpose()
}

/// Tighten or extend an already-held reservation's lease, e.g. once the
/// Assignment Service has computed the real `2 × estimated_duration`
/// lease from the item a provisional `pop` returned.
pub async fn set_lease(pool: &PgPool, id: Uuid, lease_expires_at: DateTime<Utc>) -> Result<(), SchedulerError> {
    sqlx::query("UPDATE queue SET lease_expires_at = $1 WHERE id = $2")
        .bind(lease_expires_at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Release a reservation without otherwise touching priority/bucket
/// (worker cancellation path, §4.6).
pub async fn release_reservation(pool: &PgPool, id: Uuid) -> Result<(), SchedulerError> {
    sqlx::query(
        "UPDATE queue SET reserved_by = NULL, reserved_run_id = NULL, lease_expires_at = NULL WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove the queue item backing a completed run's reservation; returns
/// an error if the item is still reserved by someone else (programming
/// error per the Queue Manager's invariants).
pub async fn remove_queue_item(pool: &PgPool, id: Uuid) -> Result<(), SchedulerError> {
    sqlx::query("DELETE FROM queue WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn requeue(
    pool: &PgPool,
    id: Uuid,
    new_priority: i64,
    new_bucket: Option<Bucket>,
    earliest_start: Option<DateTime<Utc>>,
) -> Result<(), SchedulerError> {
    sqlx::query(
        r#"
        UPDATE queue SET
            priority = $1,
            bucket = COALESCE($2, bucket),
            earliest_start = COALESCE($3, earliest_start),
            reserved_by = NULL,
            reserved_run_id = NULL,
            lease_expires_at = NULL
        WHERE id = $4
        "#,
    )
    .bind(new_priority)
    .bind(new_bucket.map(|b| b.as_str()))
    .bind(earliest_start)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Leases past `now` get their reservation cleared and are bumped to
/// `reschedule` unless they already sit in a strictly higher bucket.
/// Returns the ids touched, for the Supervisor's notification feed.
pub async fn expire_leases(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Uuid>, SchedulerError> {
    let rows = sqlx::query(
        r#"
        UPDATE queue SET
            reserved_by = NULL,
            reserved_run_id = NULL,
            lease_expires_at = NULL,
            bucket = CASE
                WHEN bucket IN ('control', 'hook', 'manual', 'update-existing-mp', 'update-new-mp')
                    THEN bucket
                ELSE 'reschedule'
            END
        WHERE reserved_by IS NOT NULL AND lease_expires_at < $1
        RETURNING id
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(|r| Ok(r.try_get("id")?)).collect()
}

/// Every currently-unreserved queue item, for the Supervisor's per-tick
/// rescore/stuck-item sweep (§4.8) — reserved items' priority/bucket are
/// frozen by invariant (ii) and must not be touched here.
pub async fn list_unreserved(pool: &PgPool) -> Result<Vec<QueueItem>, SchedulerError> {
    let rows = sqlx::query(
        r#"
        SELECT id, candidate_id, bucket, priority, estimated_duration_seconds,
               success_probability, created_at
        FROM queue
        WHERE reserved_by IS NULL
        "#,
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_item).collect()
}

pub async fn position(pool: &PgPool, id: Uuid) -> Result<Option<i64>, SchedulerError> {
    let row = sqlx::query("SELECT position FROM queue_positions WHERE queue_id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| Ok(r.try_get("position")?)).transpose()
}

pub async fn list(
    pool: &PgPool,
    campaign_id: Option<Uuid>,
    bucket: Option<Bucket>,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueueItem>, SchedulerError> {
    let mut sql = String::from(
        r#"
        SELECT id, candidate_id, bucket, priority, estimated_duration_seconds,
               success_probability, created_at
        FROM queue q
        WHERE 1 = 1
        "#,
    );
    let mut binds_desc = Vec::new();
    if campaign_id.is_some() {
        binds_desc.push("campaign_id".to_string());
        sql.push_str(&format!(" AND campaign_id = ${}", binds_desc.len()));
    }
    if bucket.is_some() {
        binds_desc.push("bucket".to_string());
        sql.push_str(&format!(" AND bucket = ${}", binds_desc.len()));
    }
    sql.push_str(&format!(
        " ORDER BY {BUCKET_RANK_CASE}, priority ASC, id ASC LIMIT {limit} OFFSET {offset}"
    ));

    let mut query = sqlx::query(&sql);
    for desc in &binds_desc {
        query = match desc.as_str() {
            "campaign_id" => query.bind(campaign_id.unwrap()),
            "bucket" => query.bind(bucket.unwrap().as_str()),
            _ => unreachable!(),
        };
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_item).collect()
}
