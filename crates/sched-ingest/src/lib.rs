//! Result Ingestor (§4.7): accepts a worker's completion report, records
//! the run, unreserves the queue item, and decides the follow-up
//! (requeue, drop, or leave for the Publish Feedback Adapter).

use chrono::{DateTime, Duration, Utc};
use sched_config::SchedulerConfig;
use sched_db::{NewResultBranch, NewRun, PgPool};
use sched_schemas::{Bucket, ResultClassification, Run, SchedulerError};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The report a worker posts to `POST /assignment/{run_id}/result`.
#[derive(Debug, Clone)]
pub struct ResultReport {
    pub run_id: Uuid,
    pub result_code: String,
    pub failure_stage: Option<String>,
    pub failure_transient: Option<bool>,
    pub result: Option<String>,
    pub result_branches: Vec<NewResultBranch>,
    pub logs: Vec<String>,
    pub value: Option<f64>,
    pub finish_time: DateTime<Utc>,
}

/// Accept and apply a worker's result report (§4.7 steps 1-5).
///
/// Idempotent by `run_id`: a second call with a byte-identical report
/// returns the same [`Run`] without repeating any side effect; a second
/// call with a differing report is rejected with
/// [`SchedulerError::Conflict`].
pub async fn ingest_result(
    pool: &PgPool,
    config: &SchedulerConfig,
    report: ResultReport,
) -> Result<Run, SchedulerError> {
    let hash = report_hash(&report);

    if let Some(existing) = sched_db::fetch_run(pool, report.run_id).await? {
        // Replay: only the hash comparison in `insert_run` matters here,
        // every other field is already committed from the first report.
        let replay = NewRun {
            id: report.run_id,
            candidate_id: existing.candidate_id,
            codebase_id: existing.codebase_id,
            campaign_id: existing.campaign_id,
            worker: existing.worker.clone(),
            started_at: existing.started_at,
            finished_at: Some(report.finish_time),
            result_code: Some(report.result_code.clone()),
            classification: existing.classification,
            description: report.result.clone(),
            value: report.value,
            report_payload_hash: hash,
        };
        return sched_db::insert_run(pool, &replay).await;
    }

    let reserved = sched_db::find_by_reserved_run(pool, report.run_id)
        .await?
        .ok_or_else(|| SchedulerError::Stale(format!("no active reservation for run {}", report.run_id)))?;

    let started_at = reserved
        .assigned_at
        .ok_or_else(|| SchedulerError::Permanent(format!("queue item {} was never assigned", reserved.id)))?;

    if report.finish_time < started_at {
        return Err(SchedulerError::Permanent(format!(
            "run {} reports a finish_time before its own start (clock skew)",
            report.run_id
        )));
    }

    let classification = classify(config, &report.result_code)?;

    let new_run = NewRun {
        id: report.run_id,
        candidate_id: reserved.candidate_id,
        codebase_id: reserved.codebase_id,
        campaign_id: reserved.campaign_id,
        worker: reserved.worker.clone(),
        started_at,
        finished_at: Some(report.finish_time),
        result_code: Some(report.result_code.clone()),
        classification: Some(classification),
        description: report.result.clone(),
        value: report.value,
        report_payload_hash: hash,
    };

    let run = sched_db::insert_run(pool, &new_run).await?;
    sched_db::insert_result_branches(pool, report.run_id, &report.result_branches).await?;

    apply_follow_up(pool, config, &reserved, classification, report.failure_stage.as_deref()).await?;

    // Dependent-campaign follow-up runs (§4.7 step 4, success case) are not
    // scheduled directly here: the next Candidate Selector tick picks them
    // up on its own, since `campaign_succeeded_for_codebase` now observes
    // this run through `last_effective_runs`.
    if let Some(change_set_id) = reserved.change_set_id {
        sched_db::change_set_state(pool, change_set_id).await?;
    }

    Ok(run)
}

/// §4.7 step 4: decide what happens to the queue item now that its run
/// has a terminal classification.
///
/// `missing-deps` is not itself a [`ResultClassification`] — it is
/// signaled via `failure_stage` on a transient/permanent report — so it
/// is checked first and overrides the requeue bucket regardless of the
/// underlying classification.
async fn apply_follow_up(
    pool: &PgPool,
    config: &SchedulerConfig,
    reserved: &sched_db::ReservedQueueItem,
    classification: ResultClassification,
    failure_stage: Option<&str>,
) -> Result<(), SchedulerError> {
    if failure_stage == Some("missing-deps") {
        return sched_db::requeue(
            pool,
            reserved.id,
            reserved.priority + config.transient_penalty,
            Some(Bucket::MissingDeps),
            Some(Utc::now() + Duration::seconds(config.transient_cooldown_seconds)),
        )
        .await;
    }

    match classification {
        ResultClassification::Transient => {
            sched_db::requeue(
                pool,
                reserved.id,
                reserved.priority + config.transient_penalty,
                Some(Bucket::Reschedule),
                Some(Utc::now() + Duration::seconds(config.transient_cooldown_seconds)),
            )
            .await
        }
        ResultClassification::Permanent => {
            if let Some(bucket) = sched_db::rate_limit_bucket_for_campaign(pool, reserved.campaign_id).await? {
                sched_db::rate_limit_get_or_init(pool, &bucket, config.slow_start_initial_cap as i32).await?;
                sched_db::record_permanent_failure(pool, &bucket, config.slow_start_halving_streak as i32).await?;
            }
            sched_db::remove_queue_item(pool, reserved.id).await
        }
        ResultClassification::Success | ResultClassification::NoOp => {
            sched_db::remove_queue_item(pool, reserved.id).await
        }
    }
}

fn classify(config: &SchedulerConfig, code: &str) -> Result<ResultClassification, SchedulerError> {
    match config.classify_result_code(code) {
        Some(c) => Ok(c),
        None if config.strict_result_codes => {
            Err(SchedulerError::Permanent(format!("unrecognized result code: {code}")))
        }
        None => Ok(ResultClassification::Permanent),
    }
}

/// Deterministic hash of the report's content, used to tell a harmless
/// duplicate report from a conflicting one (§4.7 Idempotence).
fn report_hash(report: &ResultReport) -> String {
    let mut hasher = Sha256::new();
    hasher.update(report.run_id.as_bytes());
    hasher.update(report.result_code.as_bytes());
    hasher.update(report.failure_stage.as_deref().unwrap_or("").as_bytes());
    hasher.update([report.failure_transient.unwrap_or(false) as u8]);
    hasher.update(report.result.as_deref().unwrap_or("").as_bytes());
    for b in &report.result_branches {
        hasher.update(b.role.as_bytes());
        hasher.update(b.revision.as_deref().unwrap_or("").as_bytes());
    }
    for l in &report.logs {
        hasher.update(l.as_bytes());
    }
    hasher.update(report.value.unwrap_or(0.0).to_bits().to_be_bytes());
    hasher.update(report.finish_time.timestamp().to_be_bytes());
    hasher.update(report.finish_time.timestamp_subsec_nanos().to_be_bytes());
    hex::encode(hasher.finalize())
}
