mod domain;
mod error;

pub use domain::{
    Bucket, Campaign, ChangeSet, ChangeSetState, Codebase, Candidate, Lease, MergeProposal,
    MergeProposalStatus, PublishMode, QueueItem, ResultClassification, Run,
};
pub use error::{ErrorKind, SchedulerError, SchedulerResult};
