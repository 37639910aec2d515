//! # Resource Monitor
//!
//! Samples host pressure on a fixed interval, keeps a time-windowed history and
//! notifies listeners when the high-load signal flips.
//!
//! ```text
//! sampler loop ──► sample() ──► history (retention window, capped)
//!                     │
//!                     ├── on_changed(previous, current)     every sample
//!                     ├── on_high_load(current)             rising edge
//!                     └── on_load_recovered(current)        falling edge
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigResult, ResourceThreshold};
use crate::constants::system::MAX_HISTORY_ENTRIES;
use crate::models::ResourceSnapshot;

use super::listener::ResourceListener;
use super::sampler::ResourceSampler;

pub struct ResourceMonitor {
    threshold: RwLock<ResourceThreshold>,
    sampler: Arc<dyn ResourceSampler>,
    current: RwLock<Option<ResourceSnapshot>>,
    history: Mutex<VecDeque<ResourceSnapshot>>,
    listeners: RwLock<Vec<Arc<dyn ResourceListener>>>,
    high_load: AtomicBool,
    active_workflows: AtomicUsize,
    sampler_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("threshold", &*self.threshold.read())
            .field("high_load", &self.high_load.load(Ordering::Relaxed))
            .field("running", &self.is_running())
            .finish()
    }
}

impl ResourceMonitor {
    pub fn new(threshold: ResourceThreshold, sampler: Arc<dyn ResourceSampler>) -> Arc<Self> {
        Arc::new(Self {
            threshold: RwLock::new(threshold),
            sampler,
            current: RwLock::new(None),
            history: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            high_load: AtomicBool::new(false),
            active_workflows: AtomicUsize::new(0),
            sampler_task: Mutex::new(None),
        })
    }

    /// Start the background sampler. Takes one reading immediately.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.sampler_task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Resource sampler already running");
            return;
        }

        self.sample();

        let interval = self.threshold.read().monitoring_interval();
        let monitor = Arc::downgrade(self);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match monitor.upgrade() {
                    Some(monitor) => {
                        monitor.sample();
                    }
                    None => break,
                }
            }
        }));

        info!(
            interval_ms = interval.as_millis() as u64,
            "📊 RESOURCES: Sampler started"
        );
    }

    pub fn stop(&self) {
        if let Some(handle) = self.sampler_task.lock().take() {
            handle.abort();
            info!("📊 RESOURCES: Sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sampler_task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Take a reading, record it and notify listeners.
    ///
    /// On sampler failure the last good reading (or the fallback) is returned
    /// and nothing is recorded.
    pub fn sample(&self) -> ResourceSnapshot {
        let mut reading = match self.sampler.sample() {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "Resource sampling failed, using last good reading");
                return self.current_snapshot();
            }
        };
        reading.active_workflows = self.active_workflows.load(Ordering::Relaxed);

        let previous = self.current.write().replace(reading.clone());
        self.record_history(&reading);

        let high_load = reading.is_high_load(&self.threshold.read());
        let was_high_load = self.high_load.swap(high_load, Ordering::SeqCst);

        debug!(
            pressure = reading.pressure_score(),
            cpu = reading.cpu_usage_percent(),
            memory = reading.memory_usage_percent(),
            disk = reading.disk_usage_percent(),
            threads = reading.thread_usage_percent(),
            active_workflows = reading.active_workflows,
            high_load = high_load,
            "Resource sample recorded"
        );

        self.notify_listeners(previous.as_ref(), &reading, was_high_load, high_load);
        reading
    }

    fn record_history(&self, reading: &ResourceSnapshot) {
        let cutoff = reading.captured_at - self.threshold.read().history_retention();
        let mut history = self.history.lock();
        history.push_back(reading.clone());
        while history
            .front()
            .is_some_and(|oldest| oldest.captured_at < cutoff)
        {
            history.pop_front();
        }
        while history.len() > MAX_HISTORY_ENTRIES {
            history.pop_front();
        }
    }

    fn notify_listeners(
        &self,
        previous: Option<&ResourceSnapshot>,
        current: &ResourceSnapshot,
        was_high_load: bool,
        high_load: bool,
    ) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_changed(previous, current) {
                warn!(error = %e, "Resource listener failed in on_changed");
            }
            if high_load && !was_high_load {
                if let Err(e) = listener.on_high_load(current) {
                    warn!(error = %e, "Resource listener failed in on_high_load");
                }
            } else if !high_load && was_high_load {
                if let Err(e) = listener.on_load_recovered(current) {
                    warn!(error = %e, "Resource listener failed in on_load_recovered");
                }
            }
        }
    }

    /// Latest recorded reading, or the fallback before the first sample
    pub fn current_snapshot(&self) -> ResourceSnapshot {
        self.current
            .read()
            .clone()
            .unwrap_or_else(ResourceSnapshot::fallback)
    }

    pub fn history(&self) -> Vec<ResourceSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn history_since(&self, window: chrono::Duration) -> Vec<ResourceSnapshot> {
        let cutoff = chrono::Utc::now() - window;
        self.history
            .lock()
            .iter()
            .filter(|reading| reading.captured_at >= cutoff)
            .cloned()
            .collect()
    }

    pub fn is_available(&self) -> bool {
        self.current_snapshot().is_sufficient(&self.threshold.read())
    }

    pub fn is_high_load(&self) -> bool {
        self.current_snapshot().is_high_load(&self.threshold.read())
    }

    pub fn pressure_score(&self) -> f64 {
        self.current_snapshot().pressure_score()
    }

    pub fn recommended_concurrency(&self) -> usize {
        let pressure = self.pressure_score();
        self.threshold.read().recommended_concurrency(pressure)
    }

    /// Name of the resource currently blocking availability, if any
    pub fn constrained_resource(&self) -> Option<&'static str> {
        self.current_snapshot()
            .most_constrained(&self.threshold.read())
    }

    pub fn threshold(&self) -> ResourceThreshold {
        self.threshold.read().clone()
    }

    /// Replace thresholds at runtime; a running sampler restarts with the new interval
    pub fn update_threshold(self: &Arc<Self>, threshold: ResourceThreshold) -> ConfigResult<()> {
        threshold.validate()?;
        let interval_ms = threshold.monitoring_interval_ms;
        *self.threshold.write() = threshold;

        if self.is_running() {
            self.stop();
            self.start();
        }
        info!(interval_ms, "📊 RESOURCES: Thresholds updated");
        Ok(())
    }

    pub fn add_listener(&self, listener: Arc<dyn ResourceListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Gauge of running workflows, stamped onto every reading
    pub fn set_active_workflows(&self, count: usize) {
        self.active_workflows.store(count, Ordering::Relaxed);
    }

    pub fn active_workflows(&self) -> usize {
        self.active_workflows.load(Ordering::Relaxed)
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.sampler_task.get_mut().take() {
            handle.abort();
        }
    }
}
