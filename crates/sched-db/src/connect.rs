use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect using `DATABASE_URL`, matching every other daemon/CLI entry
/// point in this workspace.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("connect to scheduler database")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStatus {
    pub reachable: bool,
    pub queue_depth: i64,
}

/// Cheap readiness probe used by `GET /ready` and `schedule --dry-run`.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM queue WHERE reserved_by IS NULL")
        .fetch_one(pool)
        .await
        .context("status query failed")?;
    Ok(DbStatus {
        reachable: true,
        queue_depth: row.0,
    })
}
