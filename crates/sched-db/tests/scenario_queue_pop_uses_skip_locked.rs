// requires DATABASE_URL
use chrono::Utc;
use sched_db::{claim_next, connect_from_env, enqueue, migrate, NewQueueItem, QueueFilter};
use sched_schemas::Bucket;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires database connection"]
async fn claim_next_is_exclusive_across_concurrent_workers() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();

    let item = NewQueueItem {
        candidate_id: Uuid::new_v4(),
        codebase_id: Uuid::new_v4(),
        campaign_id: Uuid::new_v4(),
        change_set_id: None,
        bucket: Bucket::Default,
        priority: -1000,
        estimated_duration_secs: 600,
        success_probability: 0.5,
        earliest_start: None,
    };
    enqueue(&pool, &item).await.unwrap();

    let lease = Utc::now() + chrono::Duration::seconds(600);
    let first = claim_next(&pool, "worker-a", Uuid::new_v4(), lease, &QueueFilter::default())
        .await
        .unwrap();
    assert!(first.is_some());

    let second = claim_next(&pool, "worker-b", Uuid::new_v4(), lease, &QueueFilter::default())
        .await
        .unwrap();
    assert!(second.is_none(), "reserved item must not be claimable twice");
}
