use chrono::{DateTime, Utc};
use sched_db::{NewQueueItem, PgPool, QueueFilter};
use sched_schemas::{Bucket, QueueItem, SchedulerError};
use uuid::Uuid;

/// Thin facade over `sched-db`'s queue primitives, naming its operations
/// after the Queue Manager component so callers read against one
/// consistent vocabulary.
pub struct QueueManager {
    pool: PgPool,
}

impl QueueManager {
    pub fn new(pool: PgPool) -> Self {
        QueueManager { pool }
    }

    pub async fn enqueue(&self, item: &NewQueueItem) -> Result<Uuid, SchedulerError> {
        sched_db::enqueue(&self.pool, item).await
    }

    /// `pop` atomically reserves the next eligible item for `worker`
    /// against `run_id`. There is no side-effect-free `peek` at the
    /// database layer — honoring invariant (ii) (priority/bucket frozen
    /// only once reserved) means any read that could race a reservation
    /// must go through the same row lock `pop` does, so `peek` is `pop`
    /// immediately followed by `release` when the caller only wants to look.
    pub async fn pop(
        &self,
        worker: &str,
        run_id: Uuid,
        lease_expires_at: DateTime<Utc>,
        filter: &QueueFilter,
    ) -> Result<Option<QueueItem>, SchedulerError> {
        sched_db::claim_next(&self.pool, worker, run_id, lease_expires_at, filter).await
    }

    pub async fn peek(&self, filter: &QueueFilter) -> Result<Option<QueueItem>, SchedulerError> {
        let probe_run = Uuid::new_v4();
        let expires = Utc::now();
        let item = sched_db::claim_next(&self.pool, "__peek__", probe_run, expires, filter).await?;
        if let Some(item) = &item {
            sched_db::release_reservation(&self.pool, item.id).await?;
        }
        Ok(item)
    }

    pub async fn reprioritize(&self, id: Uuid, new_priority: i64) -> Result<(), SchedulerError> {
        sched_db::requeue(&self.pool, id, new_priority, None, None).await
    }

    pub async fn rebucket(&self, id: Uuid, new_priority: i64, new_bucket: Bucket) -> Result<(), SchedulerError> {
        sched_db::requeue(&self.pool, id, new_priority, Some(new_bucket), None).await
    }

    pub async fn position(&self, id: Uuid) -> Result<Option<i64>, SchedulerError> {
        sched_db::position(&self.pool, id).await
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), SchedulerError> {
        sched_db::remove_queue_item(&self.pool, id).await
    }

    pub async fn list(
        &self,
        campaign_id: Option<Uuid>,
        bucket: Option<Bucket>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QueueItem>, SchedulerError> {
        sched_db::list(&self.pool, campaign_id, bucket, limit, offset).await
    }

    pub async fn release(&self, id: Uuid) -> Result<(), SchedulerError> {
        sched_db::release_reservation(&self.pool, id).await
    }

    /// Tighten or extend an already-held reservation's lease.
    pub async fn extend_lease(&self, id: Uuid, lease_expires_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        sched_db::set_lease(&self.pool, id, lease_expires_at).await
    }

    /// Requeue an expired-lease or cancelled item with bucket
    /// `reschedule`, unless it already sits in a strictly higher bucket
    /// (§4.6 lease expiry).
    pub async fn requeue_after_reservation_lost(
        &self,
        id: Uuid,
        original_priority: i64,
        current_bucket: Bucket,
    ) -> Result<(), SchedulerError> {
        let bucket = if current_bucket <= Bucket::UpdateNewMp {
            current_bucket
        } else {
            Bucket::Reschedule
        };
        sched_db::requeue(&self.pool, id, original_priority, Some(bucket), None).await
    }

    pub async fn expire_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, SchedulerError> {
        sched_db::expire_leases(&self.pool, now).await
    }

    pub async fn list_unreserved(&self) -> Result<Vec<QueueItem>, SchedulerError> {
        sched_db::list_unreserved(&self.pool).await
    }
}
