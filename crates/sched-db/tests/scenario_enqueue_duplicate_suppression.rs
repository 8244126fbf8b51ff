// requires DATABASE_URL
use sched_db::{connect_from_env, enqueue, migrate, NewQueueItem};
use sched_schemas::Bucket;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires database connection"]
async fn duplicate_enqueue_keeps_one_row_and_adopts_better_priority() {
    let pool = connect_from_env().await.unwrap();
    migrate(&pool).await.unwrap();

    let codebase_id = Uuid::new_v4();
    let campaign_id = Uuid::new_v4();
    let candidate_id = Uuid::new_v4();

    let item = NewQueueItem {
        candidate_id,
        codebase_id,
        campaign_id,
        change_set_id: None,
        bucket: Bucket::Default,
        priority: -5000,
        estimated_duration_secs: 900,
        success_probability: 0.5,
        earliest_start: None,
    };
    let first_id = enqueue(&pool, &item).await.unwrap();

    let mut better = item.clone();
    better.priority = -6000;
    let second_id = enqueue(&pool, &better).await.unwrap();

    assert_eq!(first_id, second_id);

    let priority: i64 = sqlx::query_scalar("SELECT priority FROM queue WHERE id = $1")
        .bind(first_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(priority, -6000);
}
