use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use mediaflow_core::config::ResourceThreshold;
use mediaflow_core::constants::events;
use mediaflow_core::events::{EventPublisher, ResourceLoadChanged};
use mediaflow_core::models::ResourceSnapshot;
use mediaflow_core::resources::{
    FixedSampler, PublishingListener, ResourceListener, ResourceMonitor, WeakListener,
};

use crate::common::eventually;

#[derive(Default)]
struct EdgeRecorder {
    edges: Mutex<Vec<&'static str>>,
    changes: Mutex<usize>,
}

impl ResourceListener for EdgeRecorder {
    fn on_changed(
        &self,
        _previous: Option<&ResourceSnapshot>,
        _current: &ResourceSnapshot,
    ) -> anyhow::Result<()> {
        *self.changes.lock() += 1;
        Ok(())
    }

    fn on_high_load(&self, _snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        self.edges.lock().push("high");
        Ok(())
    }

    fn on_load_recovered(&self, _snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        self.edges.lock().push("recovered");
        Ok(())
    }
}

#[tokio::test]
async fn test_high_load_edges_fire_once_per_transition() {
    let sampler = Arc::new(FixedSampler::idle());
    let monitor = ResourceMonitor::new(ResourceThreshold::for_testing(), sampler.clone());
    let recorder = Arc::new(EdgeRecorder::default());
    monitor.add_listener(recorder.clone());

    for percent in [10.0, 97.0, 98.0, 20.0, 20.0] {
        sampler.set_uniform_usage(percent);
        monitor.sample();
    }

    assert_eq!(*recorder.edges.lock(), vec!["high", "recovered"]);
    assert_eq!(*recorder.changes.lock(), 5);
    assert_eq!(monitor.history().len(), 5);
}

#[tokio::test]
async fn test_weak_listener_does_not_keep_target_alive() {
    let monitor = ResourceMonitor::new(
        ResourceThreshold::for_testing(),
        Arc::new(FixedSampler::idle()),
    );
    let recorder = Arc::new(EdgeRecorder::default());
    monitor.add_listener(Arc::new(WeakListener::new(&recorder)));

    monitor.sample();
    assert_eq!(*recorder.changes.lock(), 1);

    let weak = Arc::downgrade(&recorder);
    drop(recorder);
    monitor.sample();
    assert!(weak.upgrade().is_none());
    assert_eq!(monitor.listener_count(), 1);
}

#[tokio::test]
async fn test_publishing_listener_emits_load_events() {
    let sampler = Arc::new(FixedSampler::idle());
    let monitor = ResourceMonitor::new(ResourceThreshold::for_testing(), sampler.clone());
    let publisher = EventPublisher::new(64);
    let mut receiver = publisher.subscribe();
    monitor.add_listener(Arc::new(PublishingListener::new(publisher)));

    monitor.sample();
    sampler.set_uniform_usage(99.0);
    monitor.sample();

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.name, events::RESOURCE_HIGH_LOAD);
    let payload: ResourceLoadChanged = event.payload().unwrap();
    assert!(payload.high_load);
    assert!(payload.pressure_score > 90.0);
}

#[tokio::test]
async fn test_background_sampler_keeps_readings_fresh() {
    let sampler = Arc::new(FixedSampler::idle());
    let monitor = ResourceMonitor::new(ResourceThreshold::for_testing(), sampler.clone());
    monitor.start();
    assert!(monitor.is_running());

    sampler.set_uniform_usage(95.0);
    assert!(eventually(|| monitor.is_high_load()).await);
    assert!(!monitor.is_available());
    assert_eq!(monitor.constrained_resource(), Some("disk_space"));

    monitor.stop();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn test_failed_sample_keeps_last_good_reading() {
    let sampler = Arc::new(FixedSampler::with_uniform_usage(42.0));
    let monitor = ResourceMonitor::new(ResourceThreshold::for_testing(), sampler.clone());
    monitor.sample();

    sampler.set_failing(true);
    let reading = monitor.sample();
    assert_eq!(reading.cpu_usage_percent, 42.0);
    assert_eq!(monitor.history().len(), 1);
}
