use std::sync::Arc;
use std::time::Duration;

use mediaflow_core::config::QueueConfig;
use mediaflow_core::models::{QueueTaskStatus, QueuedTask, StepType, TaskPriority, WorkflowConfig};
use mediaflow_core::queue::{EngineRunner, PersistentQueue, ProcessingStatus, QueueConsumer};

use crate::common::{ScriptedProcessor, TestEngine};

const Q: &str = "media-submission";

async fn wait_for_status(queue: &PersistentQueue, task_id: &str, status: QueueTaskStatus) -> bool {
    for _ in 0..500 {
        if queue.get(task_id).await.is_some_and(|task| task.status == status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn consumer_for(harness: &TestEngine, queue: Arc<PersistentQueue>) -> Arc<QueueConsumer> {
    let runner = EngineRunner::new(
        harness.engine.clone(),
        WorkflowConfig::default(),
        Duration::from_millis(5),
    );
    QueueConsumer::new(queue, Arc::new(runner))
}

#[tokio::test]
async fn test_queued_tasks_run_one_at_a_time_through_the_engine() {
    let processor = ScriptedProcessor::new();
    let harness = TestEngine::new(processor.clone());
    let queue = Arc::new(PersistentQueue::new(QueueConfig::for_testing()));
    for task_id in ["A", "B", "C"] {
        assert!(queue.enqueue(QueuedTask::new(task_id, Q)).await.unwrap());
    }
    assert_eq!(queue.position("C").await, Some(3));

    let consumer = consumer_for(&harness, queue.clone());
    assert!(consumer.start());
    assert!(wait_for_status(&queue, "C", QueueTaskStatus::Completed).await);
    for task_id in ["A", "B"] {
        assert_eq!(queue.get(task_id).await.unwrap().status, QueueTaskStatus::Completed);
    }

    // Serialized: every step of A ran before any step of B
    let order: Vec<String> = processor.calls().into_iter().map(|(task, _)| task).collect();
    let last_a = order.iter().rposition(|task| task == "A").unwrap();
    let first_b = order.iter().position(|task| task == "B").unwrap();
    assert!(last_a < first_b);

    let stats = queue.statistics(Q).await;
    assert_eq!((stats.completed, stats.failed), (3, 0));
    assert_eq!(stats.success_rate, 1.0);

    consumer.stop();
    consumer.join().await;
}

#[tokio::test]
async fn test_failed_workflow_marks_queue_entry_failed() {
    let processor = ScriptedProcessor::new();
    processor.fail_always(StepType::Download, "access denied to source");
    let harness = TestEngine::new(processor);
    let queue = Arc::new(PersistentQueue::new(QueueConfig::for_testing()));
    queue.enqueue(QueuedTask::new("denied", Q)).await.unwrap();

    let consumer = consumer_for(&harness, queue.clone());
    consumer.start();
    assert!(wait_for_status(&queue, "denied", QueueTaskStatus::Failed).await);
    assert!(queue.get("denied").await.unwrap().error_message.is_some());

    consumer.stop();
    consumer.join().await;
}

#[tokio::test]
async fn test_status_reflects_queue_and_priority_order() {
    let harness = TestEngine::new(ScriptedProcessor::new());
    let queue = Arc::new(PersistentQueue::new(QueueConfig::for_testing()));
    queue.enqueue_with_priority("n1", Q, TaskPriority::Normal).await.unwrap();
    queue.enqueue_with_priority("n2", Q, TaskPriority::Normal).await.unwrap();
    queue.enqueue_with_priority("u1", Q, TaskPriority::Urgent).await.unwrap();

    let consumer = consumer_for(&harness, queue.clone());
    consumer.pause();
    let status = consumer.status().await;
    assert!(!status.running);
    assert_eq!(status.processing_status, ProcessingStatus::Paused);
    assert_eq!(status.queue_length, 3);
    let order: Vec<(&str, usize)> = status
        .queued_tasks
        .iter()
        .map(|info| (info.task_id.as_str(), info.position))
        .collect();
    assert_eq!(order, vec![("u1", 1), ("n1", 2), ("n2", 3)]);
    assert!(status.current_task.is_none());
}
