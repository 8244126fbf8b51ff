//! Lifecycle Supervisor (§4.8): a fixed-tick pass over the queue that
//! expires stale leases, rescues candidates whose score has drifted
//! since they were enqueued, and flags items that have stopped moving.

use chrono::{DateTime, Duration, Utc};
use sched_config::SchedulerConfig;
use sched_db::{CandidateRecord, PgPool};
use sched_scoring::{score, ScoringInput};
use sched_schemas::{Bucket, SchedulerError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages broadcast over the internal event bus for downstream
/// observers (`GET /queue/stream`). The Supervisor only emits the
/// variants its own tick produces (`LeaseExpired`, `Requeued`,
/// `StuckItem`, `TickCompleted`); `Enqueued`, `Popped`, and `TerminalRun`
/// are emitted by whichever handler in `sched-daemon` calls into
/// `sched-selector`/`sched-assign`/`sched-ingest`, sharing this same
/// `BusMsg` type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Enqueued { queue_item_id: Uuid },
    Popped { queue_item_id: Uuid, worker: String },
    Requeued { queue_item_id: Uuid },
    TerminalRun { run_id: Uuid },
    LeaseExpired { queue_item_id: Uuid },
    StuckItem { queue_item_id: Uuid, bucket: Bucket, stalled_seconds: i64 },
    TickCompleted(TickSummary),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TickSummary {
    pub leases_expired: usize,
    pub items_rescored: usize,
    pub stuck_items: usize,
}

/// Run one supervisor pass. Cheap to call directly in tests; the
/// production run loop (`spawn_tick_loop`) just calls this on an
/// interval.
pub async fn run_tick(
    pool: &PgPool,
    config: &SchedulerConfig,
    bus: &tokio::sync::broadcast::Sender<BusMsg>,
    now: DateTime<Utc>,
) -> Result<TickSummary, SchedulerError> {
    let mut summary = TickSummary::default();

    for queue_item_id in sched_db::expire_leases(pool, now).await? {
        summary.leases_expired += 1;
        let _ = bus.send(BusMsg::LeaseExpired { queue_item_id });
        let _ = bus.send(BusMsg::Requeued { queue_item_id });
    }

    let unreserved = sched_db::list_unreserved(pool).await?;
    for item in unreserved {
        let Some(candidate) = sched_db::fetch_candidate(pool, item.candidate_id).await? else {
            continue;
        };
        let Some(campaign) = sched_db::fetch_campaign(pool, candidate.campaign_id).await? else {
            continue;
        };

        let rescored = rescore(pool, config, &candidate, &campaign, now).await?;
        if rescored.priority != item.priority {
            sched_db::requeue(pool, item.id, rescored.priority, None, None).await?;
            summary.items_rescored += 1;
            let _ = bus.send(BusMsg::Requeued { queue_item_id: item.id });
        }

        let age = now - item.created_at;
        if age > Duration::seconds(config.stuck_item_stall_seconds) && rescored.priority == item.priority {
            summary.stuck_items += 1;
            let _ = bus.send(BusMsg::StuckItem {
                queue_item_id: item.id,
                bucket: item.bucket,
                stalled_seconds: age.num_seconds(),
            });
        }
    }

    let _ = bus.send(BusMsg::TickCompleted(summary));
    Ok(summary)
}

struct Rescored {
    priority: i64,
}

/// Recompute a candidate's priority exactly as the Candidate Selector
/// would (§4.4's scoring pipeline), without touching bucket or
/// change-set state — only called against already-queued, unreserved
/// items, so a recomputed value equal to the stored one means nothing
/// material changed since the item was enqueued.
async fn rescore(
    pool: &PgPool,
    config: &SchedulerConfig,
    candidate: &CandidateRecord,
    campaign: &sched_db::CampaignRecord,
    now: DateTime<Utc>,
) -> Result<Rescored, SchedulerError> {
    let window = Duration::days(config.stats_window_days);
    let runs = sched_db::historical_runs(pool, candidate.codebase_id, candidate.campaign_id, window).await?;
    let is_first_run = !sched_db::has_any_run(pool, candidate.codebase_id, candidate.campaign_id).await?;

    let success_probability = sched_stats::success_probability(&runs, candidate.success_chance, config, now);
    let estimated_duration_seconds =
        sched_stats::estimate_duration_seconds(&runs, &runs, campaign.default_duration_seconds, config);

    let input = ScoringInput {
        base_value: candidate.value.unwrap_or(0.0),
        publish_mode: campaign.publish_mode,
        is_first_run,
        success_probability,
        estimated_duration_seconds,
    };
    Ok(Rescored { priority: score(&input, config).priority })
}

/// Spawn the production tick loop on the current Tokio runtime. A
/// fire-and-forget interval task, logging failures instead of
/// propagating them since there is no caller left to hand an error to.
pub fn spawn_tick_loop(
    pool: PgPool,
    config: SchedulerConfig,
    bus: tokio::sync::broadcast::Sender<BusMsg>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.supervisor_tick_seconds));
        loop {
            ticker.tick().await;
            match run_tick(&pool, &config, &bus, Utc::now()).await {
                Ok(summary) => {
                    tracing::debug!(
                        leases_expired = summary.leases_expired,
                        items_rescored = summary.items_rescored,
                        stuck_items = summary.stuck_items,
                        "supervisor tick completed"
                    );
                }
                Err(err) => tracing::warn!(error = %err, "supervisor tick failed"),
            }
        }
    })
}
