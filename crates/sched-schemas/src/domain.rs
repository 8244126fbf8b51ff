use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A version-controlled project the scheduler runs candidates against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Codebase {
    pub id: Uuid,
    pub name: String,
    pub vcs_url: String,
    pub vcs_kind: String,
    pub subpath: Option<String>,
    pub branch: String,
}

/// How a campaign's output should be published once a run succeeds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PublishMode {
    Skip,
    BuildOnly,
    Bts,
    Propose,
    AttemptPush,
    Push,
    PushDerived,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::Skip => "skip",
            PublishMode::BuildOnly => "build-only",
            PublishMode::Bts => "bts",
            PublishMode::Propose => "propose",
            PublishMode::AttemptPush => "attempt-push",
            PublishMode::Push => "push",
            PublishMode::PushDerived => "push-derived",
        }
    }
}

/// A recurring unit of work applied to every matching codebase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub command: String,
    pub publish_mode: PublishMode,
}

/// Dominant ordering bucket a queue item sorts into before priority/id.
///
/// Declaration order here IS sort order: `Control` is the most urgent,
/// `Default` the least. Keep this an enum (not a string code) so ordering
/// is exhaustive and checked by the compiler rather than by table lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    Control,
    Hook,
    Manual,
    UpdateExistingMp,
    UpdateNewMp,
    Reschedule,
    MissingDeps,
    Default,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Control => "control",
            Bucket::Hook => "hook",
            Bucket::Manual => "manual",
            Bucket::UpdateExistingMp => "update-existing-mp",
            Bucket::UpdateNewMp => "update-new-mp",
            Bucket::Reschedule => "reschedule",
            Bucket::MissingDeps => "missing-deps",
            Bucket::Default => "default",
        }
    }
}

/// A unit of requested work: "run this campaign against this codebase".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub codebase_id: Uuid,
    pub context: Option<String>,
    pub value: f64,
    pub bucket: Bucket,
    pub requested_at: DateTime<Utc>,
}

/// How a worker's reported result code should be treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResultClassification {
    Success,
    Transient,
    Permanent,
    NoOp,
}

/// One execution of a candidate by a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub worker: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_code: Option<String>,
    pub classification: Option<ResultClassification>,
    pub description: Option<String>,
}

impl Run {
    pub fn duration_seconds(&self) -> Option<i64> {
        let finished = self.finished_at?;
        Some((finished - self.started_at).num_seconds())
    }
}

/// A candidate waiting in the priority queue, carrying its computed score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub bucket: Bucket,
    /// Lower is more urgent; `-round(score * 1000)`.
    pub priority: i64,
    pub estimated_duration_secs: i64,
    pub success_probability: f64,
    pub created_at: DateTime<Utc>,
    pub last_scheduled_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Total ordering a queue pop must use: bucket, then priority, then id.
    pub fn sort_key(&self) -> (Bucket, i64, Uuid) {
        (self.bucket, self.priority, self.id)
    }
}

/// An active worker reservation over a queue item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub id: Uuid,
    pub queue_item_id: Uuid,
    pub run_id: Uuid,
    pub worker: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Monotonic progression of a logical change through the publish pipeline.
///
/// Derived from run/publish state, never written directly by a caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSetState {
    Created,
    Working,
    Ready,
    Publishing,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeSet {
    pub id: Uuid,
    pub codebase_id: Uuid,
    pub campaign_id: Uuid,
    pub state: ChangeSetState,
    pub branch_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergeProposalStatus {
    Open,
    Merged,
    /// The change was applied to the target branch directly rather than
    /// through a merge commit; treated as equivalent to `Merged`.
    Applied,
    Closed,
    Rejected,
    Abandoned,
}

/// External pull/merge request tracked against a change-set. Read-only
/// from the core's perspective: its `status`/`target_branch`/`revision`
/// are observations fed in by whatever watches the VCS host, never
/// derived here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeProposal {
    pub id: Uuid,
    pub change_set_id: Uuid,
    pub run_id: Option<Uuid>,
    pub role: Option<String>,
    pub url: String,
    pub status: MergeProposalStatus,
    pub target_branch: Option<String>,
    pub revision: Option<String>,
}
