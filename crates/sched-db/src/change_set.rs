use sched_schemas::{ChangeSet, ChangeSetState, SchedulerError};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub async fn fetch_change_set(pool: &PgPool, id: Uuid) -> Result<Option<ChangeSet>, SchedulerError> {
    let row = sqlx::query(
        "SELECT id, codebase_id, campaign_id, state, branch_name, updated_at FROM change_set WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        Ok(ChangeSet {
            id: row.try_get("id")?,
            codebase_id: row.try_get("codebase_id")?,
            campaign_id: row.try_get("campaign_id")?,
            state: parse_state(row.try_get::<String, _>("state")?.as_str()),
            branch_name: row.try_get("branch_name")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .transpose()
}

fn parse_state(s: &str) -> ChangeSetState {
    match s {
        "working" => ChangeSetState::Working,
        "ready" => ChangeSetState::Ready,
        "publishing" => ChangeSetState::Publishing,
        "done" => ChangeSetState::Done,
        _ => ChangeSetState::Created,
    }
}

fn state_str(s: ChangeSetState) -> &'static str {
    match s {
        ChangeSetState::Created => "created",
        ChangeSetState::Working => "working",
        ChangeSetState::Ready => "ready",
        ChangeSetState::Publishing => "publishing",
        ChangeSetState::Done => "done",
    }
}

/// Re-derive and persist a change-set's state from the data the views
/// compute, never advancing backward (§4.7 step 5, invariant 4).
///
/// Transition rule: created -> working on first run; working -> ready
/// when every candidate has a terminal outcome and nothing is left in
/// `change_set_todo`; ready -> publishing when a publish has been
/// recorded for any of its runs; publishing -> done when
/// `change_set_unpublished` has nothing left for it.
pub async fn change_set_state(pool: &PgPool, id: Uuid) -> Result<ChangeSetState, SchedulerError> {
    let current: String = sqlx::query_scalar("SELECT state FROM change_set WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    let current = parse_state(&current);

    let has_any_run: bool = sqlx::query_scalar(
        r#"SELECT EXISTS (
            SELECT 1 FROM run r JOIN candidate c ON c.id = r.candidate_id
            WHERE c.change_set_id = $1
        )"#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    let todo: i64 = sqlx::query_scalar(
        "SELECT COALESCE((SELECT todo_count FROM change_set_todo WHERE change_set_id = $1), 0)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    let has_publish: bool = sqlx::query_scalar(
        r#"SELECT EXISTS (
            SELECT 1 FROM publish p
            JOIN run r ON r.id = p.run_id
            JOIN candidate c ON c.id = r.candidate_id
            WHERE c.change_set_id = $1
        )"#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    let unpublished: i64 = sqlx::query_scalar(
        "SELECT COALESCE((SELECT unpublished_count FROM change_set_unpublished WHERE change_set_id = $1), 0)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    let mut next = current;
    if next == ChangeSetState::Created && has_any_run {
        next = ChangeSetState::Working;
    }
    if next == ChangeSetState::Working && todo == 0 {
        next = ChangeSetState::Ready;
    }
    if next == ChangeSetState::Ready && has_publish {
        next = ChangeSetState::Publishing;
    }
    if next == ChangeSetState::Publishing && unpublished == 0 && has_publish {
        next = ChangeSetState::Done;
    }

    if next > current {
        sqlx::query("UPDATE change_set SET state = $1, updated_at = now() WHERE id = $2")
            .bind(state_str(next))
            .bind(id)
            .execute(pool)
            .await?;
    }

    Ok(next)
}
