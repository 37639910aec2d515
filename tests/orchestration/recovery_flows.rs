use mediaflow_core::config::MediaflowConfig;
use mediaflow_core::models::{RecoveryStrategy, StepType, WorkflowConfig};
use mediaflow_core::{StepStatus, WorkflowStatus};

use crate::common::{eventually, ScriptedProcessor, TestEngine};

#[tokio::test]
async fn test_connection_refused_is_retried_until_upload_succeeds() {
    let processor = ScriptedProcessor::new();
    processor.fail_times(StepType::Upload, 1, "Connection refused by upload host");
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-retry", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;
    assert!(eventually(|| harness.engine.status(id) == Some(WorkflowStatus::Completed)).await);

    let uploads = processor
        .executed_steps("video-retry")
        .into_iter()
        .filter(|step| *step == StepType::Upload)
        .count();
    assert_eq!(uploads, 2);

    let history = harness.engine.recovery().history(id);
    assert!(!history.is_empty());
    assert!(history
        .iter()
        .all(|record| record.strategy == RecoveryStrategy::Retry));
    assert!(history.iter().any(|record| record.successful));
}

#[tokio::test]
async fn test_retry_limit_pauses_for_intervention() {
    let processor = ScriptedProcessor::new();
    processor.fail_always(StepType::Download, "network timeout while fetching source");
    let harness = TestEngine::new(processor.clone());
    let max_retries = MediaflowConfig::for_testing().recovery.max_retries as usize;

    let instance = harness
        .engine
        .start("video-flaky", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;
    let recovery = harness.engine.recovery().clone();
    assert!(eventually(|| recovery.paused_instances().contains_key(&id)).await);

    // The initial attempt plus one per retry
    assert_eq!(processor.executed_steps("video-flaky").len(), max_retries + 1);
    assert_eq!(harness.engine.status(id), Some(WorkflowStatus::Paused));
    let reason = recovery.paused_instances().remove(&id).unwrap();
    assert!(reason.contains("retry limit"), "unexpected reason: {reason}");

    // Still holding its grant while paused; cancelling releases it
    assert!(harness.engine.load_balancer().allocation(id).is_some());
    assert!(harness.engine.cancel(id));
    assert!(harness.engine.load_balancer().allocation(id).is_none());
    assert!(recovery.paused_instances().is_empty());
}

#[tokio::test]
async fn test_fatal_download_error_fails_the_workflow() {
    let processor = ScriptedProcessor::new();
    processor.fail_times(StepType::Download, 1, "No such file: source.mp4");
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-missing", WorkflowConfig::default())
        .unwrap();
    assert_eq!(
        harness.settle(instance.instance_id).await,
        WorkflowStatus::Failed
    );

    let failed = harness.engine.get(instance.instance_id).unwrap();
    assert!(failed.error_message.is_some());
    assert!(failed.steps[1..]
        .iter()
        .all(|step| step.status == StepStatus::Pending));
    assert!(harness
        .engine
        .load_balancer()
        .allocation(instance.instance_id)
        .is_none());
    assert_eq!(harness.engine.stats().failed, 1);
}

#[tokio::test]
async fn test_fatal_segment_error_is_skipped() {
    let processor = ScriptedProcessor::new();
    processor.fail_times(StepType::Segment, 1, "segmenter crashed");
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-segment", WorkflowConfig::segmented(120))
        .unwrap();
    let id = instance.instance_id;
    assert!(eventually(|| harness.engine.status(id) == Some(WorkflowStatus::Completed)).await);

    let finished = harness.engine.get(id).unwrap();
    assert_eq!(
        finished.step_status(StepType::Segment),
        Some(StepStatus::Skipped)
    );
    assert_eq!(
        finished.step_status(StepType::Upload),
        Some(StepStatus::Completed)
    );
    assert!(harness
        .engine
        .recovery()
        .history(id)
        .iter()
        .any(|record| record.strategy == RecoveryStrategy::SkipStep));
}

#[tokio::test]
async fn test_resource_failure_waits_for_capacity() {
    let (processor, gate) = ScriptedProcessor::gated();
    processor.fail_times(
        StepType::Merge,
        1,
        "writing merge output: No space left on device (os error 28)",
    );
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-disk", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;

    for expected in 1..=2 {
        assert!(eventually(|| processor.calls().len() == expected).await);
        gate.notify_one();
    }
    assert!(eventually(|| processor.calls().len() == 3).await);
    harness.set_pressure(95.0);
    gate.notify_one();

    let recovery = harness.engine.recovery().clone();
    assert!(eventually(|| recovery.waiting_instances().contains_key(&id)).await);
    assert_eq!(
        recovery.waiting_instances().get(&id).map(String::as_str),
        Some("disk_space")
    );
    assert_eq!(harness.engine.status(id), Some(WorkflowStatus::Paused));

    harness.set_pressure(10.0);
    for expected in 4..=5 {
        assert!(eventually(|| processor.calls().len() == expected).await);
        gate.notify_one();
    }
    assert!(eventually(|| harness.engine.status(id) == Some(WorkflowStatus::Completed)).await);
    assert!(recovery.waiting_instances().is_empty());
}

#[tokio::test]
async fn test_manual_recovery_resumes_paused_workflow() {
    let processor = ScriptedProcessor::new();
    processor.fail_times(StepType::Clip, 1, "invalid clip parameter: start after end");
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-config", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;
    let recovery = harness.engine.recovery().clone();
    assert!(eventually(|| recovery.paused_instances().contains_key(&id)).await);

    assert!(recovery.manual_recover(id, None));
    assert!(eventually(|| harness.engine.status(id) == Some(WorkflowStatus::Completed)).await);
    assert!(recovery
        .history(id)
        .iter()
        .any(|record| record.message == "manual recovery"));
}

#[tokio::test]
async fn test_failure_under_operator_pause_is_recorded_and_rerun_on_resume() {
    let (processor, gate) = ScriptedProcessor::gated();
    processor.fail_times(StepType::Download, 1, "Connection refused");
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-paused-fail", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;
    let download = instance.steps[0].step_id;
    assert!(eventually(|| processor.calls().len() == 1).await);

    assert!(harness.engine.pause(id));
    gate.notify_one();

    let recovery = harness.engine.recovery().clone();
    assert!(eventually(|| !recovery.history(id).is_empty()).await);
    let record = recovery.history(id).pop().unwrap();
    assert_eq!(record.strategy, RecoveryStrategy::Retry);
    assert_eq!(record.step_id, Some(download));
    assert!(record.successful);
    assert_eq!(recovery.retry_count(id, download), 1);
    // The operator's pause stands; nothing resumes it behind their back
    assert!(recovery.scheduled_strategy(id).is_none());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(harness.engine.status(id), Some(WorkflowStatus::Paused));
    assert_eq!(
        harness.engine.get(id).unwrap().steps[0].status,
        StepStatus::Failed
    );

    assert!(harness.engine.resume(id));
    for expected in 2..=5 {
        assert!(eventually(|| processor.calls().len() == expected).await);
        gate.notify_one();
    }
    assert!(eventually(|| harness.engine.status(id) == Some(WorkflowStatus::Completed)).await);
    assert_eq!(
        processor.executed_steps("video-paused-fail"),
        vec![
            StepType::Download,
            StepType::Download,
            StepType::Clip,
            StepType::Merge,
            StepType::Upload
        ]
    );
}

#[tokio::test]
async fn test_fatal_failure_under_operator_pause_fails_the_workflow() {
    let (processor, gate) = ScriptedProcessor::gated();
    processor.fail_times(StepType::Download, 1, "access denied to source");
    let harness = TestEngine::new(processor.clone());

    let instance = harness
        .engine
        .start("video-paused-fatal", WorkflowConfig::default())
        .unwrap();
    let id = instance.instance_id;
    assert!(eventually(|| processor.calls().len() == 1).await);

    assert!(harness.engine.pause(id));
    gate.notify_one();

    assert!(eventually(|| harness.engine.status(id) == Some(WorkflowStatus::Failed)).await);
    let record = harness.engine.recovery().history(id).pop().unwrap();
    assert_eq!(record.strategy, RecoveryStrategy::MarkAsFailed);
    assert!(harness.engine.load_balancer().allocation(id).is_none());
}
