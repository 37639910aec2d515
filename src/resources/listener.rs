//! Callbacks fired by the resource monitor after every sample.

use std::sync::{Arc, Weak};
use tracing::warn;

use crate::constants::events;
use crate::events::{EventPublisher, ResourceLoadChanged};
use crate::models::ResourceSnapshot;

/// Receives resource transitions.
///
/// `on_changed` fires after every sample; the edge callbacks fire only when the
/// high-load signal flips. Errors are logged by the monitor and never stop
/// sampling.
pub trait ResourceListener: Send + Sync {
    fn on_changed(
        &self,
        _previous: Option<&ResourceSnapshot>,
        _current: &ResourceSnapshot,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_high_load(&self, _snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_load_recovered(&self, _snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Listener registration that does not keep the target alive.
///
/// Components that own an `Arc<ResourceMonitor>` register through this so the
/// monitor never holds a strong reference back to them.
pub struct WeakListener<T: ResourceListener> {
    target: Weak<T>,
}

impl<T: ResourceListener> WeakListener<T> {
    pub fn new(target: &Arc<T>) -> Self {
        Self {
            target: Arc::downgrade(target),
        }
    }
}

impl<T: ResourceListener> ResourceListener for WeakListener<T> {
    fn on_changed(
        &self,
        previous: Option<&ResourceSnapshot>,
        current: &ResourceSnapshot,
    ) -> anyhow::Result<()> {
        match self.target.upgrade() {
            Some(target) => target.on_changed(previous, current),
            None => Ok(()),
        }
    }

    fn on_high_load(&self, snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        match self.target.upgrade() {
            Some(target) => target.on_high_load(snapshot),
            None => Ok(()),
        }
    }

    fn on_load_recovered(&self, snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        match self.target.upgrade() {
            Some(target) => target.on_load_recovered(snapshot),
            None => Ok(()),
        }
    }
}

/// Forwards load edges to the event bus as `resource.*` events
pub struct PublishingListener {
    publisher: EventPublisher,
}

impl PublishingListener {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }
}

impl ResourceListener for PublishingListener {
    fn on_high_load(&self, snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        warn!(
            pressure = snapshot.pressure_score(),
            cpu = snapshot.cpu_usage_percent(),
            memory = snapshot.memory_usage_percent(),
            "⚠️ RESOURCES: High load detected"
        );
        self.publisher.publish_payload(
            events::RESOURCE_HIGH_LOAD,
            &ResourceLoadChanged::from_snapshot(snapshot, true),
        )?;
        Ok(())
    }

    fn on_load_recovered(&self, snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        self.publisher.publish_payload(
            events::RESOURCE_LOAD_RECOVERED,
            &ResourceLoadChanged::from_snapshot(snapshot, false),
        )?;
        Ok(())
    }
}
