mod campaign;
mod candidate;
mod change_set;
mod codebase;
mod connect;
mod deps;
mod publish;
mod queue;
mod rate_limit;
mod result_branch;
mod retry;
mod run;

pub use campaign::{fetch_campaign, rate_limit_bucket_for_campaign, CampaignRecord};
pub use candidate::{
    candidates, fetch_candidate, retract_candidate, upsert_candidate, CandidateFilter, CandidateRecord,
    NewCandidate,
};
pub use codebase::{fetch_codebase, most_recent_run_id, CodebaseRecord};
pub use change_set::{change_set_state, fetch_change_set};
pub use deps::{campaign_dependencies, campaign_succeeded_for_codebase, has_any_run, has_queue_item};
pub use connect::{connect, connect_from_env, migrate, status, DbStatus};
pub use publish::{
    all_branches_absorbed, fetch_merge_proposal, record_merge_proposal, record_publish,
    set_branch_absorbed, set_merge_proposal_status, NewMergeProposal, NewPublish,
};
pub use queue::{
    claim_next, enqueue, expire_leases, find_by_reserved_run, list, list_unreserved, position,
    release_reservation, remove_queue_item, requeue, set_lease, NewQueueItem, QueueFilter,
    ReservedQueueItem,
};
pub use rate_limit::{
    get_or_init as rate_limit_get_or_init, open_merge_proposal_count, record_permanent_failure,
    record_successful_absorption, RateLimitState,
};
pub use result_branch::{insert_result_branches, NewResultBranch};
pub use retry::with_retry;
pub use run::{campaign_wide_runs, fetch_run, historical_runs, insert_run, NewRun};

pub use sqlx::PgPool;
