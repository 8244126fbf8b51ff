use sched_schemas::{PublishMode, SchedulerError};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CampaignRecord {
    pub id: Uuid,
    pub name: String,
    pub command: String,
    pub publish_mode: PublishMode,
    pub default_duration_seconds: Option<i64>,
    pub default_success_chance: Option<f64>,
}

fn parse_publish_mode(s: &str) -> PublishMode {
    match s {
        "build-only" => PublishMode::BuildOnly,
        "bts" => PublishMode::Bts,
        "propose" => PublishMode::Propose,
        "attempt-push" => PublishMode::AttemptPush,
        "push" => PublishMode::Push,
        "push-derived" => PublishMode::PushDerived,
        _ => PublishMode::Skip,
    }
}

pub async fn fetch_campaign(pool: &PgPool, id: Uuid) -> Result<Option<CampaignRecord>, SchedulerError> {
    let row = sqlx::query(
        "SELECT id, name, command, publish_mode, default_duration_seconds, default_success_chance FROM campaign WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(CampaignRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            command: row.try_get("command")?,
            publish_mode: parse_publish_mode(row.try_get::<String, _>("publish_mode")?.as_str()),
            default_duration_seconds: row.try_get("default_duration_seconds")?,
            default_success_chance: row.try_get("default_success_chance")?,
        })
    })
    .transpose()
}

/// The `rate_limit_bucket` a campaign's named publish policy is subject
/// to, if it has one. A campaign with no policy row, or a policy with a
/// null bucket, is unlimited.
pub async fn rate_limit_bucket_for_campaign(
    pool: &PgPool,
    campaign_id: Uuid,
) -> Result<Option<String>, SchedulerError> {
    let bucket: Option<String> = sqlx::query_scalar(
        "SELECT rate_limit_bucket FROM named_publish_policy WHERE campaign_id = $1 AND rate_limit_bucket IS NOT NULL LIMIT 1",
    )
    .bind(campaign_id)
    .fetch_optional(pool)
    .await?
    .flatten();
    Ok(bucket)
}
