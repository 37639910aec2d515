use std::time::Duration;

use mediaflow_core::constants::events;
use mediaflow_core::events::WorkflowStatusChanged;
use mediaflow_core::models::{StepType, WorkflowConfig};
use mediaflow_core::store::TaskStore;
use mediaflow_core::{StepStatus, WorkflowStatus};

use crate::common::{eventually, ScriptedProcessor, TestEngine};

#[tokio::test]
async fn test_default_plan_runs_every_step_in_order() {
    let processor = ScriptedProcessor::new();
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-1001", WorkflowConfig::default())
        .unwrap();
    let plan: Vec<StepType> = instance.steps.iter().map(|s| s.step_type).collect();
    assert_eq!(
        plan,
        vec![
            StepType::Download,
            StepType::Clip,
            StepType::Merge,
            StepType::Upload
        ]
    );

    assert_eq!(
        harness.settle(instance.instance_id).await,
        WorkflowStatus::Completed
    );
    assert_eq!(processor.executed_steps("video-1001"), plan);
    assert_eq!(processor.cleanups(), plan);

    let finished = harness.engine.get(instance.instance_id).unwrap();
    assert_eq!(finished.progress, 1.0);
    assert!(finished.completed_at.is_some());
    let positions: Vec<usize> = finished.steps.iter().map(|s| s.order_index).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
    assert!(finished
        .steps
        .iter()
        .all(|s| s.output_ref.as_deref().is_some_and(|r| r.contains("video-1001"))));
}

#[tokio::test]
async fn test_segmented_plan_places_segment_before_upload() {
    let processor = ScriptedProcessor::new();
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-seg", WorkflowConfig::segmented(120))
        .unwrap();
    assert_eq!(
        harness.settle(instance.instance_id).await,
        WorkflowStatus::Completed
    );
    assert_eq!(
        processor.executed_steps("video-seg"),
        vec![
            StepType::Download,
            StepType::Clip,
            StepType::Merge,
            StepType::Segment,
            StepType::Upload
        ]
    );
}

#[tokio::test]
async fn test_status_changes_are_published_and_stored() {
    let processor = ScriptedProcessor::new();
    let harness = TestEngine::new(processor);
    let mut events = harness.publisher.subscribe();

    let instance = harness
        .engine
        .start("video-events", WorkflowConfig::default())
        .unwrap();
    harness.settle(instance.instance_id).await;

    let mut workflow_statuses = Vec::new();
    let mut step_events = 0;
    while let Ok(event) = events.try_recv() {
        match event.name.as_str() {
            events::WORKFLOW_STATUS_CHANGED => {
                let change: WorkflowStatusChanged = event.payload().unwrap();
                workflow_statuses.push(change.new_status);
            }
            events::WORKFLOW_STEP_CHANGED => step_events += 1,
            _ => {}
        }
    }
    assert_eq!(
        workflow_statuses,
        vec![WorkflowStatus::Running, WorkflowStatus::Completed]
    );
    // Start and complete for each of the four steps
    assert_eq!(step_events, 8);

    let store = harness.store.clone();
    assert!(
        eventually(|| store
            .task_status("video-events")
            .is_some_and(|record| record.status == WorkflowStatus::Completed))
        .await
    );
}

#[tokio::test]
async fn test_stored_snapshot_matches_settled_status() {
    let processor = ScriptedProcessor::new();
    let harness = TestEngine::new(processor);

    let mut finished = Vec::new();
    for n in 0..25 {
        let instance = harness
            .engine
            .start(&format!("video-store-{n}"), WorkflowConfig::default())
            .unwrap();
        assert_eq!(
            harness.settle(instance.instance_id).await,
            WorkflowStatus::Completed
        );
        finished.push(instance.instance_id);
    }

    harness.engine.flush_store().await;
    for instance_id in finished {
        let stored = harness
            .store
            .load_instance(instance_id)
            .await
            .unwrap()
            .expect("instance was saved");
        assert_eq!(stored.status, WorkflowStatus::Completed);
        assert!(stored
            .steps
            .iter()
            .all(|step| step.status == StepStatus::Completed));
    }
}

#[tokio::test]
async fn test_output_rejected_by_validation_fails_the_step() {
    let processor = ScriptedProcessor::new();
    processor.reject_output(StepType::Download);
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-invalid", WorkflowConfig::default())
        .unwrap();
    assert_eq!(
        harness.settle(instance.instance_id).await,
        WorkflowStatus::Failed
    );

    let failed = harness.engine.get(instance.instance_id).unwrap();
    assert_eq!(failed.steps[0].status, StepStatus::Failed);
    assert_eq!(processor.executed_steps("video-invalid"), vec![StepType::Download]);
}

#[tokio::test]
async fn test_double_cancel_releases_grant_once() {
    let (processor, gate) = ScriptedProcessor::gated();
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-cancel", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;
    assert!(harness.engine.load_balancer().allocation(id).is_some());
    assert!(eventually(|| processor.calls().len() == 1).await);

    assert!(harness.engine.cancel(id));
    assert!(!harness.engine.cancel(id));
    assert_eq!(harness.engine.status(id), Some(WorkflowStatus::Cancelled));
    assert!(harness.engine.load_balancer().allocation(id).is_none());
    assert_eq!(harness.engine.load_balancer().stats().active_allocations, 0);

    // The in-flight step finishes into a cancelled workflow and nothing else runs
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(processor.calls().len(), 1);
    let stats = harness.engine.stats();
    assert_eq!((stats.cancelled, stats.active), (1, 0));
}

#[tokio::test]
async fn test_pause_holds_the_next_step_until_resume() {
    let (processor, gate) = ScriptedProcessor::gated();
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-pause", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;
    assert!(eventually(|| processor.calls().len() == 1).await);

    assert!(harness.engine.pause(id));
    assert!(!harness.engine.pause(id));
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(processor.calls().len(), 1);
    assert_eq!(harness.engine.status(id), Some(WorkflowStatus::Paused));

    assert!(harness.engine.resume(id));
    for expected in 2..=4 {
        assert!(eventually(|| processor.calls().len() == expected).await);
        gate.notify_one();
    }
    assert!(eventually(|| harness.engine.status(id) == Some(WorkflowStatus::Completed)).await);
}

#[tokio::test]
async fn test_cleanup_drops_only_expired_terminal_instances() {
    let processor = ScriptedProcessor::new();
    let harness = TestEngine::new(processor);

    let instance = harness
        .engine
        .start("video-old", WorkflowConfig::default())
        .unwrap();
    harness.settle(instance.instance_id).await;

    assert_eq!(harness.engine.cleanup(1), 0);
    assert_eq!(harness.engine.cleanup(0), 1);
    assert!(harness.engine.get(instance.instance_id).is_none());
    assert!(harness.engine.find_by_task_id("video-old").is_none());
}
