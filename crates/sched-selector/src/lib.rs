use chrono::Duration;
use sched_config::SchedulerConfig;
use sched_db::{CandidateFilter, CandidateRecord, NewQueueItem, PgPool};
use sched_scoring::{score, ScoringInput};
use sched_schemas::{Bucket, SchedulerError};

/// Result of scoring one candidate, ready to hand to the Queue Manager.
#[derive(Debug, Clone)]
pub struct EnqueueProposal {
    pub candidate: CandidateRecord,
    pub item: NewQueueItem,
}

/// One tick of the Candidate Selector (§4.4): read eligible candidates,
/// resolve dependencies, skip ones that already have a queue item (unless
/// `refresh`), and score the rest.
pub async fn select_candidates(
    pool: &PgPool,
    config: &SchedulerConfig,
    refresh: bool,
) -> Result<Vec<EnqueueProposal>, SchedulerError> {
    let candidates = sched_db::candidates(
        pool,
        &CandidateFilter {
            active_codebases_only: true,
            ..Default::default()
        },
    )
    .await?;

    let mut proposals = Vec::new();

    for candidate in candidates {
        if candidate.codebase_removed || !candidate.codebase_active {
            continue;
        }

        if !dependencies_satisfied(pool, &candidate).await? {
            tracing::debug!(candidate_id = %candidate.id, "skipping candidate with unmet dependencies");
            continue;
        }

        if !refresh
            && sched_db::has_queue_item(pool, candidate.codebase_id, candidate.campaign_id, candidate.change_set_id)
                .await?
        {
            continue;
        }

        let Some(campaign) = sched_db::fetch_campaign(pool, candidate.campaign_id).await? else {
            tracing::warn!(campaign_id = %candidate.campaign_id, "candidate references unknown campaign");
            continue;
        };

        let window = Duration::days(config.stats_window_days);
        let codebase_campaign_runs =
            sched_db::historical_runs(pool, candidate.codebase_id, candidate.campaign_id, window).await?;
        let campaign_runs = sched_db::campaign_wide_runs(pool, candidate.campaign_id, window).await?;

        let is_first_run =
            !sched_db::has_any_run(pool, candidate.codebase_id, candidate.campaign_id).await?;

        let success_probability = sched_stats::success_probability(
            &codebase_campaign_runs,
            candidate.success_chance,
            config,
            chrono::Utc::now(),
        );
        let estimated_duration_seconds = sched_stats::estimate_duration_seconds(
            &codebase_campaign_runs,
            &campaign_runs,
            campaign.default_duration_seconds,
            config,
        );

        let input = ScoringInput {
            base_value: candidate.value.unwrap_or(0.0),
            publish_mode: campaign.publish_mode,
            is_first_run,
            success_probability,
            estimated_duration_seconds,
        };
        let scored = score(&input, config);

        let bucket = if candidate.bucket == Bucket::Default {
            Bucket::Default
        } else {
            candidate.bucket
        };

        let item = NewQueueItem {
            candidate_id: candidate.id,
            codebase_id: candidate.codebase_id,
            campaign_id: candidate.campaign_id,
            change_set_id: candidate.change_set_id,
            bucket,
            priority: scored.priority,
            estimated_duration_secs: estimated_duration_seconds,
            success_probability,
            earliest_start: None,
        };

        proposals.push(EnqueueProposal { candidate, item });
    }

    Ok(proposals)
}

async fn dependencies_satisfied(pool: &PgPool, candidate: &CandidateRecord) -> Result<bool, SchedulerError> {
    let deps = sched_db::campaign_dependencies(pool, candidate.campaign_id).await?;
    for dep_campaign_id in deps {
        if !sched_db::campaign_succeeded_for_codebase(pool, candidate.codebase_id, dep_campaign_id).await? {
            return Ok(false);
        }
    }
    Ok(true)
}
