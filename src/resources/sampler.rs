//! Host metric sources for the resource monitor.

use chrono::Utc;
use parking_lot::Mutex;
use sysinfo::{Disks, ProcessesToUpdate, System};

use crate::constants::system::THREADS_PER_CPU;
use crate::models::ResourceSnapshot;

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("resource sampling unavailable: {0}")]
    Unavailable(String),
}

/// Source of raw resource readings.
///
/// Implementations must not block for long; the monitor calls them from its
/// sampling loop and from admission checks.
pub trait ResourceSampler: Send + Sync + 'static {
    /// Take a reading. `active_workflows` is filled in by the monitor.
    fn sample(&self) -> Result<ResourceSnapshot, SampleError>;
}

/// Real OS metrics via `sysinfo`
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime CPU counters so the first real sample has a delta to work with
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Result<ResourceSnapshot, SampleError> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total_memory_mb = system.total_memory() / BYTES_PER_MB;
        if total_memory_mb == 0 {
            return Err(SampleError::Unavailable(
                "total memory reported as zero".to_string(),
            ));
        }
        let used_memory_mb = system.used_memory() / BYTES_PER_MB;

        let disks = Disks::new_with_refreshed_list();
        let (total_disk_bytes, available_disk_bytes) = disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (
                    total.saturating_add(disk.total_space()),
                    available.saturating_add(disk.available_space()),
                )
            });

        let cpu_count = system.cpus().len().max(1) as u32;
        let max_threads = cpu_count * THREADS_PER_CPU;

        let active_threads = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                system
                    .process(pid)
                    .and_then(|process| process.tasks())
                    .map(|tasks| tasks.len() as u32)
            })
            // Platforms without per-task data: assume one worker per core
            .unwrap_or(cpu_count)
            .max(1);

        Ok(ResourceSnapshot {
            cpu_usage_percent: f64::from(system.global_cpu_usage()),
            total_memory_mb,
            used_memory_mb,
            total_disk_gb: total_disk_bytes / BYTES_PER_GB,
            used_disk_gb: total_disk_bytes.saturating_sub(available_disk_bytes) / BYTES_PER_GB,
            active_threads,
            max_threads,
            active_workflows: 0,
            load_average: System::load_average().one,
            captured_at: Utc::now(),
        })
    }
}

/// Settable in-memory sampler for tests and embedding
#[derive(Debug)]
pub struct FixedSampler {
    reading: Mutex<ResourceSnapshot>,
    failing: Mutex<bool>,
}

impl FixedSampler {
    pub fn new(reading: ResourceSnapshot) -> Self {
        Self {
            reading: Mutex::new(reading),
            failing: Mutex::new(false),
        }
    }

    /// Every utilization at `percent`, which also makes the pressure score `percent`
    pub fn with_uniform_usage(percent: f64) -> Self {
        Self::new(Self::uniform_snapshot(percent))
    }

    pub fn idle() -> Self {
        Self::with_uniform_usage(10.0)
    }

    pub fn uniform_snapshot(percent: f64) -> ResourceSnapshot {
        let percent = percent.clamp(0.0, 100.0);
        let scaled = |total: u64| ((total as f64) * percent / 100.0).round() as u64;
        ResourceSnapshot {
            cpu_usage_percent: percent,
            total_memory_mb: 10_000,
            used_memory_mb: scaled(10_000),
            total_disk_gb: 1_000,
            used_disk_gb: scaled(1_000),
            active_threads: scaled(1_000) as u32,
            max_threads: 1_000,
            active_workflows: 0,
            load_average: percent / 25.0,
            captured_at: Utc::now(),
        }
    }

    pub fn set(&self, reading: ResourceSnapshot) {
        *self.reading.lock() = reading;
    }

    pub fn set_uniform_usage(&self, percent: f64) {
        self.set(Self::uniform_snapshot(percent));
    }

    /// Make subsequent samples fail until reset
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> Result<ResourceSnapshot, SampleError> {
        if *self.failing.lock() {
            return Err(SampleError::Unavailable("fixed sampler set to fail".to_string()));
        }
        let mut reading = self.reading.lock().clone();
        reading.captured_at = Utc::now();
        Ok(reading)
    }
}
