use std::sync::Arc;

use mediaflow_core::config::QueueConfig;
use mediaflow_core::models::{QueueTaskStatus, QueuedTask, TaskPriority};
use mediaflow_core::queue::{PersistentQueue, QueueJournal, SqliteQueueJournal};
use tempfile::TempDir;

const Q: &str = "media-submission";

async fn file_journal(dir: &TempDir) -> Arc<dyn QueueJournal> {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());
    Arc::new(SqliteQueueJournal::connect(&url).await.unwrap())
}

#[tokio::test]
async fn test_queue_survives_restart_through_sqlite_file() {
    let dir = TempDir::new().unwrap();

    {
        let queue = PersistentQueue::with_journal(QueueConfig::for_testing(), file_journal(&dir).await);
        queue.enqueue(QueuedTask::new("first", Q)).await.unwrap();
        queue
            .enqueue_with_priority("urgent", Q, TaskPriority::Urgent)
            .await
            .unwrap();
        queue.enqueue(QueuedTask::new("last", Q)).await.unwrap();
        queue.enqueue(QueuedTask::new("elsewhere", "archive")).await.unwrap();

        let head = queue.dequeue(Q).await.unwrap().unwrap();
        assert_eq!(head.task_id, "urgent");
        queue.complete_task("urgent", true, None).await.unwrap();
    }

    let restored = PersistentQueue::with_journal(QueueConfig::for_testing(), file_journal(&dir).await);
    assert_eq!(restored.restore().await.unwrap(), 3);
    assert_eq!(restored.position("first").await, Some(1));
    assert_eq!(restored.position("last").await, Some(2));
    assert_eq!(restored.position("elsewhere").await, Some(1));
    assert_eq!(
        restored.get("urgent").await.unwrap().status,
        QueueTaskStatus::Completed
    );
    assert_eq!(restored.statistics(Q).await.completed, 1);
}

#[tokio::test]
async fn test_cleared_queue_is_empty_after_restore() {
    let dir = TempDir::new().unwrap();
    let queue = PersistentQueue::with_journal(QueueConfig::for_testing(), file_journal(&dir).await);
    queue
        .enqueue_batch(vec![QueuedTask::new("a", Q), QueuedTask::new("b", Q)])
        .await
        .unwrap();
    assert_eq!(queue.clear(Q).await.unwrap(), 2);

    let restored = PersistentQueue::with_journal(QueueConfig::for_testing(), file_journal(&dir).await);
    assert_eq!(restored.restore().await.unwrap(), 0);
    assert!(restored.list(Q).await.is_empty());
}
