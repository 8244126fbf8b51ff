//! Publish Feedback Adapter (§4.9): reacts to publish results and merge
//! proposal status changes fed in from outside the core, updating the
//! branches/change-sets those events concern.

use sched_config::SchedulerConfig;
use sched_db::{NewMergeProposal, NewPublish, NewQueueItem, PgPool};
use sched_schemas::{Bucket, ChangeSetState, MergeProposalStatus, SchedulerError};
use uuid::Uuid;

/// A publish succeeded for one of a run's result branches: mark that
/// role absorbed and recompute the owning change-set's state.
///
/// Matches spec.md §4.9's "on recorded publish success" rule exactly;
/// `on_merge_proposal_status_changed` calls this same function for a
/// `merged`/`applied` proposal rather than duplicating its effects.
pub async fn on_publish_success(
    pool: &PgPool,
    config: &SchedulerConfig,
    run_id: Uuid,
    role: &str,
    mode: &str,
) -> Result<Option<ChangeSetState>, SchedulerError> {
    sched_db::record_publish(
        pool,
        &NewPublish {
            run_id,
            role: role.to_string(),
            mode: mode.to_string(),
        },
    )
    .await?;
    sched_db::set_branch_absorbed(pool, run_id, role, true).await?;

    let run = sched_db::fetch_run(pool, run_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("run {run_id} not found")))?;
    let candidate = sched_db::fetch_candidate(pool, run.candidate_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("candidate {} not found", run.candidate_id)))?;

    if let Some(bucket) = sched_db::rate_limit_bucket_for_campaign(pool, candidate.campaign_id).await? {
        sched_db::rate_limit_get_or_init(pool, &bucket, config.slow_start_initial_cap as i32).await?;
        sched_db::record_successful_absorption(pool, &bucket, config.slow_start_growth_per_success as i32).await?;
    }

    match candidate.change_set_id {
        Some(change_set_id) => Ok(Some(sched_db::change_set_state(pool, change_set_id).await?)),
        None => Ok(None),
    }
}

/// A merge proposal's status changed. `observed_target_revision` is
/// whatever the external VCS watcher currently sees at the tip of the
/// proposal's target branch — the core never inspects a VCS itself, so
/// divergence is judged purely by comparing that observation against the
/// revision the proposal recorded when it was opened.
pub async fn on_merge_proposal_status_changed(
    pool: &PgPool,
    config: &SchedulerConfig,
    merge_proposal_id: Uuid,
    new_status: MergeProposalStatus,
    observed_target_revision: Option<&str>,
) -> Result<(), SchedulerError> {
    let proposal = sched_db::fetch_merge_proposal(pool, merge_proposal_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("merge proposal {merge_proposal_id} not found")))?;

    sched_db::set_merge_proposal_status(pool, merge_proposal_id, new_status).await?;

    match new_status {
        MergeProposalStatus::Merged | MergeProposalStatus::Applied => {
            if let (Some(run_id), Some(role)) = (proposal.run_id, proposal.role.as_deref()) {
                on_publish_success(pool, config, run_id, role, "propose").await?;
            }
        }
        MergeProposalStatus::Closed | MergeProposalStatus::Rejected => {
            let diverged = match (observed_target_revision, proposal.revision.as_deref()) {
                (Some(observed), Some(proposed)) => observed != proposed,
                _ => false,
            };
            if diverged {
                enqueue_refresh(pool, config, &proposal).await?;
            }
        }
        MergeProposalStatus::Open | MergeProposalStatus::Abandoned => {}
    }

    Ok(())
}

async fn enqueue_refresh(
    pool: &PgPool,
    config: &SchedulerConfig,
    proposal: &sched_schemas::MergeProposal,
) -> Result<Uuid, SchedulerError> {
    let change_set = sched_db::fetch_change_set(pool, proposal.change_set_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("change set {} not found", proposal.change_set_id)))?;
    let campaign = sched_db::fetch_campaign(pool, change_set.campaign_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("campaign {} not found", change_set.campaign_id)))?;

    let candidate = sched_db::upsert_candidate(
        pool,
        &sched_db::NewCandidate {
            codebase_id: change_set.codebase_id,
            campaign_id: change_set.campaign_id,
            change_set_id: Some(change_set.id),
            context: proposal.revision.clone(),
            value: None,
            success_chance: None,
            bucket: Bucket::UpdateExistingMp,
        },
    )
    .await?;

    sched_db::enqueue(
        pool,
        &NewQueueItem {
            candidate_id: candidate.id,
            codebase_id: change_set.codebase_id,
            campaign_id: change_set.campaign_id,
            change_set_id: Some(change_set.id),
            bucket: Bucket::UpdateExistingMp,
            priority: config.update_existing_mp_priority,
            estimated_duration_secs: campaign.default_duration_seconds.unwrap_or(900),
            success_probability: campaign.default_success_chance.unwrap_or(config.campaign_default_success_chance),
            earliest_start: None,
        },
    )
    .await
}

/// Record a new merge proposal observation (the VCS watcher's entry
/// point into this adapter, not named in §4.9 but implied by "read-only
/// from the core's perspective" — something has to create the row).
pub async fn record_merge_proposal(
    pool: &PgPool,
    proposal: &NewMergeProposal,
) -> Result<Uuid, SchedulerError> {
    sched_db::record_merge_proposal(pool, proposal).await
}
