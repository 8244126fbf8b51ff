//! Assignment Service (§4.6): hands queue items to workers as reserved
//! run bundles, enforcing the lease/rate-limit rules the Queue Manager
//! itself is agnostic to.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sched_config::SchedulerConfig;
use sched_db::{CandidateRecord, PgPool, QueueFilter};
use sched_queue::QueueManager;
use sched_schemas::{QueueItem, SchedulerError};
use uuid::Uuid;

/// Capability/campaign restrictions a worker attaches to its poll, unioned
/// with whatever filter a caller already built for it (§4.6 step 2:
/// `pop(filter ∪ assignment_filters)`).
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub campaign_id: Option<Uuid>,
    pub exclude_campaigns: Vec<Uuid>,
    pub exclude_hosts: Vec<String>,
}

impl AssignmentFilter {
    fn into_queue_filter(self) -> QueueFilter {
        QueueFilter {
            exclude_hosts: self.exclude_hosts,
            exclude_campaigns: self.exclude_campaigns,
            campaign_id: self.campaign_id,
            ..Default::default()
        }
    }
}

/// Everything a worker needs to execute one run.
#[derive(Debug, Clone)]
pub struct AssignmentBundle {
    pub run_id: Uuid,
    pub queue_item_id: Uuid,
    pub candidate_id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub command: String,
    pub branch_url: String,
    pub subpath: Option<String>,
    pub vcs_kind: String,
    /// Opaque hint toward the commit/revision this candidate targets, when
    /// the candidate carried one in its `context` field.
    pub revision_hint: Option<String>,
    pub build_environment: HashMap<String, String>,
    /// A prior finished run of the same (codebase, campaign) a worker may
    /// resume from, if one exists.
    pub resume_from_run_id: Option<Uuid>,
    pub lease_expires_at: DateTime<Utc>,
    pub log_upload_token: String,
}

/// Returned instead of a bundle when nothing is eligible right now.
#[derive(Debug, Clone, Copy)]
pub struct NoWork {
    pub retry_after_seconds: i64,
}

/// How many times `request_assignment` will pop-then-reject a
/// rate-limited candidate before giving up and reporting no-work. Bounds
/// the work done per poll even if many campaigns share a saturated bucket.
const MAX_RATE_LIMIT_SKIPS: u32 = 8;

pub struct AssignmentService {
    pool: PgPool,
    queue: QueueManager,
}

impl AssignmentService {
    pub fn new(pool: PgPool) -> Self {
        let queue = QueueManager::new(pool.clone());
        AssignmentService { pool, queue }
    }

    /// Worker polling protocol steps 2-5: pop + reserve (skipping
    /// rate-limited campaigns), compute the lease, materialize the
    /// bundle. Rolls the reservation back if bundle materialization
    /// fails after the pop (§4.6 step 5).
    pub async fn request_assignment(
        &self,
        config: &SchedulerConfig,
        worker: &str,
        filter: AssignmentFilter,
    ) -> Result<Result<AssignmentBundle, NoWork>, SchedulerError> {
        let run_id = Uuid::new_v4();
        let mut queue_filter = filter.into_queue_filter();

        for _ in 0..MAX_RATE_LIMIT_SKIPS {
            let probe_expiry = Utc::now() + Duration::seconds(config.min_lease_seconds);
            let Some(item) = self.queue.pop(worker, run_id, probe_expiry, &queue_filter).await? else {
                return Ok(Err(NoWork {
                    retry_after_seconds: config.supervisor_tick_seconds as i64,
                }));
            };

            let candidate = sched_db::fetch_candidate(&self.pool, item.candidate_id)
                .await?
                .ok_or_else(|| SchedulerError::NotFound(format!("candidate {}", item.candidate_id)))?;

            match self.check_rate_limit(config, &candidate).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(
                        campaign_id = %candidate.campaign_id,
                        "candidate's publish bucket is saturated, skipping"
                    );
                    self.queue.release(item.id).await?;
                    queue_filter.exclude_campaigns.push(candidate.campaign_id);
                    continue;
                }
                Err(e) => {
                    self.queue.release(item.id).await?;
                    return Err(e);
                }
            }

            let lease_expires_at = lease_expiry(&item, config);
            match self
                .materialize_bundle(&item, &candidate, run_id, lease_expires_at)
                .await
            {
                Ok(bundle) => {
                    self.queue.extend_lease(item.id, lease_expires_at).await?;
                    return Ok(Ok(bundle));
                }
                Err(e) => {
                    self.queue.release(item.id).await?;
                    return Err(e);
                }
            }
        }

        Ok(Err(NoWork {
            retry_after_seconds: config.supervisor_tick_seconds as i64,
        }))
    }

    /// A worker relinquishing a reservation before reporting: the item
    /// returns to the queue at its original priority (§4.6 Cancellation).
    pub async fn cancel_assignment(&self, queue_item_id: Uuid) -> Result<(), SchedulerError> {
        self.queue.release(queue_item_id).await
    }

    async fn check_rate_limit(
        &self,
        config: &SchedulerConfig,
        candidate: &CandidateRecord,
    ) -> Result<bool, SchedulerError> {
        let Some(bucket) = sched_db::rate_limit_bucket_for_campaign(&self.pool, candidate.campaign_id).await?
        else {
            return Ok(true);
        };
        let state = sched_db::rate_limit_get_or_init(&self.pool, &bucket, config.slow_start_initial_cap as i32)
            .await?;
        let open = sched_db::open_merge_proposal_count(&self.pool, &bucket).await?;
        Ok(open < state.cap as i64)
    }

    async fn materialize_bundle(
        &self,
        item: &QueueItem,
        candidate: &CandidateRecord,
        run_id: Uuid,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<AssignmentBundle, SchedulerError> {
        let campaign = sched_db::fetch_campaign(&self.pool, candidate.campaign_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("campaign {}", candidate.campaign_id)))?;
        let codebase = sched_db::fetch_codebase(&self.pool, candidate.codebase_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("codebase {}", candidate.codebase_id)))?;
        let resume_from_run_id =
            sched_db::most_recent_run_id(&self.pool, candidate.codebase_id, candidate.campaign_id).await?;

        let mut build_environment = HashMap::new();
        build_environment.insert("SCHED_CAMPAIGN".to_string(), campaign.name.clone());
        build_environment.insert("SCHED_CODEBASE".to_string(), codebase.name.clone());

        Ok(AssignmentBundle {
            run_id,
            queue_item_id: item.id,
            candidate_id: candidate.id,
            codebase_id: candidate.codebase_id,
            campaign_id: candidate.campaign_id,
            command: campaign.command,
            branch_url: codebase.vcs_url,
            subpath: codebase.subpath,
            vcs_kind: codebase.vcs_kind,
            revision_hint: candidate.context.clone(),
            build_environment,
            resume_from_run_id,
            lease_expires_at,
            log_upload_token: log_upload_token(),
        })
    }
}

/// Lease duration = `max(2 × estimated_duration, min_lease)`, capped at
/// `max_lease` (§4.6 step 3).
fn lease_expiry(item: &QueueItem, config: &SchedulerConfig) -> DateTime<Utc> {
    let wanted = (item.estimated_duration_secs * 2).max(config.min_lease_seconds);
    let capped = wanted.min(config.max_lease_seconds);
    Utc::now() + Duration::seconds(capped)
}

fn log_upload_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_schemas::Bucket;

    fn item(estimated_duration_secs: i64) -> QueueItem {
        QueueItem {
            id: Uuid::new_v4(),
            candidate_id: Uuid::new_v4(),
            bucket: Bucket::Default,
            priority: 0,
            estimated_duration_secs,
            success_probability: 0.5,
            created_at: Utc::now(),
            last_scheduled_at: None,
        }
    }

    #[test]
    fn lease_is_twice_duration_when_above_minimum() {
        let config = SchedulerConfig::default();
        let expiry = lease_expiry(&item(1000), &config);
        let seconds = (expiry - Utc::now()).num_seconds();
        assert!((1990..=2000).contains(&seconds), "expected ~2000s, got {seconds}");
    }

    #[test]
    fn lease_floors_at_min_lease_seconds() {
        let config = SchedulerConfig::default();
        let expiry = lease_expiry(&item(10), &config);
        let seconds = (expiry - Utc::now()).num_seconds();
        assert!(
            (config.min_lease_seconds - 5..=config.min_lease_seconds).contains(&seconds),
            "expected ~{}s, got {seconds}",
            config.min_lease_seconds
        );
    }

    #[test]
    fn lease_caps_at_max_lease_seconds() {
        let config = SchedulerConfig::default();
        let expiry = lease_expiry(&item(i64::MAX / 4), &config);
        let seconds = (expiry - Utc::now()).num_seconds();
        assert!(
            (config.max_lease_seconds - 5..=config.max_lease_seconds).contains(&seconds),
            "expected ~{}s, got {seconds}",
            config.max_lease_seconds
        );
    }

    #[test]
    fn log_upload_tokens_are_unique_hex_strings() {
        let a = log_upload_token();
        let b = log_upload_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
