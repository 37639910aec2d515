use mediaflow_core::config::MediaflowConfig;
use mediaflow_core::models::{AllocationTier, LoadBalancingStrategy, WorkflowConfig};
use mediaflow_core::{FlowError, StartRejection, WorkflowStatus};

use crate::common::{ScriptedProcessor, TestEngine};

#[tokio::test]
async fn test_high_pressure_refuses_new_workflows() {
    let harness = TestEngine::new(ScriptedProcessor::new());
    harness.set_pressure(90.0);

    let threshold = harness.monitor.threshold();
    assert_eq!(harness.monitor.recommended_concurrency(), threshold.min_concurrency);
    assert!(!harness.engine.load_balancer().can_start_new_workflow());
    assert_eq!(
        harness
            .engine
            .start("video-busy", WorkflowConfig::default())
            .unwrap_err(),
        FlowError::Rejected(StartRejection::ResourcesUnavailable)
    );
    assert_eq!(harness.engine.stats().rejected, 1);
}

#[tokio::test]
async fn test_low_pressure_allows_full_concurrency() {
    let harness = TestEngine::new(ScriptedProcessor::new());
    harness.set_pressure(40.0);

    let threshold = harness.monitor.threshold();
    assert_eq!(harness.monitor.recommended_concurrency(), threshold.max_concurrency);
    assert!(harness.engine.load_balancer().can_start_new_workflow());
}

#[tokio::test]
async fn test_concurrency_limit_caps_active_workflows() {
    let mut config = MediaflowConfig::for_testing();
    config.resources.max_concurrency = 2;
    config.resources.default_concurrency = 2;
    let (processor, _gate) = ScriptedProcessor::gated();
    let harness = TestEngine::with_config(config, processor);

    let first = harness.engine.start("video-a", WorkflowConfig::default()).unwrap();
    harness.engine.start("video-b", WorkflowConfig::default()).unwrap();
    assert!(matches!(
        harness.engine.start("video-c", WorkflowConfig::default()),
        Err(FlowError::Rejected(_))
    ));

    assert!(harness.engine.cancel(first.instance_id));
    assert!(harness.engine.start("video-c", WorkflowConfig::default()).is_ok());
    assert_eq!(harness.engine.active_instances().len(), 2);
}

#[tokio::test]
async fn test_grant_tier_follows_pressure() {
    let (processor, _gate) = ScriptedProcessor::gated();
    let harness = TestEngine::new(processor);

    harness.set_pressure(20.0);
    let light = harness.engine.start("video-light", WorkflowConfig::default()).unwrap();
    let grant = harness
        .engine
        .load_balancer()
        .allocation(light.instance_id)
        .unwrap();
    assert_eq!(grant.tier, AllocationTier::HighPerformance);

    harness.set_pressure(60.0);
    let busy = harness.engine.start("video-busy", WorkflowConfig::default()).unwrap();
    let grant = harness
        .engine
        .load_balancer()
        .allocation(busy.instance_id)
        .unwrap();
    assert_eq!(grant.tier, AllocationTier::Default);
}

#[tokio::test]
async fn test_rebalance_reports_effective_strategy() {
    let (processor, _gate) = ScriptedProcessor::gated();
    let harness = TestEngine::new(processor);
    harness.set_pressure(20.0);
    harness.engine.start("video-1", WorkflowConfig::default()).unwrap();
    harness.engine.start("video-2", WorkflowConfig::default()).unwrap();

    let active = harness.engine.active_instances();
    let result = harness.engine.load_balancer().rebalance(&active);
    assert_eq!(result.strategy, LoadBalancingStrategy::FairShare);
    assert_eq!(harness.engine.load_balancer().stats().rebalance_count, 1);

    assert!(harness
        .engine
        .active_instances()
        .iter()
        .all(|instance| instance.status == WorkflowStatus::Running));
}
