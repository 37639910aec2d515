use proptest::prelude::*;

use mediaflow_core::models::{TaskPriority, WorkflowConfig};

pub fn priority_strategy() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Urgent),
        Just(TaskPriority::High),
        Just(TaskPriority::Normal),
        Just(TaskPriority::Low),
        Just(TaskPriority::Background),
    ]
}

/// One mutation applied to a queue under test
#[derive(Debug, Clone)]
pub enum QueueOp {
    Enqueue(u8, TaskPriority),
    Dequeue,
    Remove(u8),
    Reprioritize(u8, TaskPriority),
}

pub fn queue_op_strategy() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        4 => (0u8..24, priority_strategy()).prop_map(|(id, p)| QueueOp::Enqueue(id, p)),
        2 => Just(QueueOp::Dequeue),
        1 => (0u8..24).prop_map(QueueOp::Remove),
        1 => (0u8..24, priority_strategy()).prop_map(|(id, p)| QueueOp::Reprioritize(id, p)),
    ]
}

pub fn queue_ops_strategy() -> impl Strategy<Value = Vec<QueueOp>> {
    prop::collection::vec(queue_op_strategy(), 1..60)
}

/// Feature-flag combinations that pass validation
pub fn workflow_config_strategy() -> impl Strategy<Value = WorkflowConfig> {
    (any::<bool>(), any::<bool>(), any::<bool>(), 30u32..=600).prop_map(
        |(clipping, merging, segmented, segment_seconds)| {
            let mut config = if segmented {
                WorkflowConfig::segmented(segment_seconds)
            } else {
                WorkflowConfig::default()
            };
            config.enable_clipping = clipping;
            config.enable_merging = merging;
            config
        },
    )
}

/// Free text that contains none of the classifier keywords
pub fn neutral_text_strategy() -> impl Strategy<Value = String> {
    "[b-h ]{0,24}"
}
