//! Wiring helpers that assemble an engine over fixed, settable resource readings.

use std::sync::Arc;
use std::time::Duration;

use mediaflow_core::config::MediaflowConfig;
use mediaflow_core::events::EventPublisher;
use mediaflow_core::orchestration::{LoadBalancer, ProcessingContract, WorkflowEngine};
use mediaflow_core::resources::{FixedSampler, ResourceMonitor};
use mediaflow_core::store::InMemoryTaskStore;
use mediaflow_core::WorkflowStatus;
use uuid::Uuid;

pub struct TestEngine {
    pub engine: Arc<WorkflowEngine>,
    pub sampler: Arc<FixedSampler>,
    pub monitor: Arc<ResourceMonitor>,
    pub store: Arc<InMemoryTaskStore>,
    pub publisher: EventPublisher,
}

impl TestEngine {
    pub fn new(processor: Arc<dyn ProcessingContract>) -> Self {
        Self::with_config(MediaflowConfig::for_testing(), processor)
    }

    pub fn with_config(config: MediaflowConfig, processor: Arc<dyn ProcessingContract>) -> Self {
        let sampler = Arc::new(FixedSampler::idle());
        let monitor = ResourceMonitor::new(config.resources.clone(), sampler.clone());
        monitor.sample();
        let load_balancer = LoadBalancer::new(&config.load_balancer, Arc::clone(&monitor));
        let store = Arc::new(InMemoryTaskStore::new());
        let publisher = EventPublisher::new(1024);
        let engine = WorkflowEngine::new(
            config,
            Arc::clone(&monitor),
            load_balancer,
            processor,
            store.clone(),
            publisher.clone(),
        );
        Self {
            engine,
            sampler,
            monitor,
            store,
            publisher,
        }
    }

    /// Set every utilization to `percent` and take a fresh sample
    pub fn set_pressure(&self, percent: f64) {
        self.sampler.set_uniform_usage(percent);
        self.monitor.sample();
    }

    pub async fn settle(&self, instance_id: Uuid) -> WorkflowStatus {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.engine
                .wait_until_settled(instance_id, Duration::from_millis(5)),
        )
        .await
        .expect("workflow did not settle in time")
        .expect("workflow is registered")
    }
}

/// Poll `condition` every 10ms for up to five seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
