//! # Resource Models
//!
//! Point-in-time host readings and the per-workflow grants derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::ResourceThreshold;

/// Immutable host reading produced by the resource monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_usage_percent: f64,
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,
    pub total_disk_gb: u64,
    pub used_disk_gb: u64,
    pub active_threads: u32,
    pub max_threads: u32,
    pub active_workflows: usize,
    pub load_average: f64,
    pub captured_at: DateTime<Utc>,
}

fn percent(used: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        (used / total * 100.0).clamp(0.0, 100.0)
    }
}

impl ResourceSnapshot {
    /// Conservative reading used before any successful sample exists
    pub fn fallback() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            total_memory_mb: 1024,
            used_memory_mb: 512,
            total_disk_gb: 100,
            used_disk_gb: 50,
            active_threads: 10,
            max_threads: 100,
            active_workflows: 0,
            load_average: 0.0,
            captured_at: Utc::now(),
        }
    }

    pub fn cpu_usage_percent(&self) -> f64 {
        self.cpu_usage_percent.clamp(0.0, 100.0)
    }

    pub fn memory_usage_percent(&self) -> f64 {
        percent(self.used_memory_mb as f64, self.total_memory_mb as f64)
    }

    pub fn disk_usage_percent(&self) -> f64 {
        percent(self.used_disk_gb as f64, self.total_disk_gb as f64)
    }

    pub fn thread_usage_percent(&self) -> f64 {
        percent(self.active_threads as f64, self.max_threads as f64)
    }

    pub fn available_memory_mb(&self) -> u64 {
        self.total_memory_mb.saturating_sub(self.used_memory_mb)
    }

    pub fn available_disk_gb(&self) -> u64 {
        self.total_disk_gb.saturating_sub(self.used_disk_gb)
    }

    /// Weighted 0-100 composite of CPU, memory, disk and thread utilization
    pub fn pressure_score(&self) -> f64 {
        self.cpu_usage_percent() * 0.3
            + self.memory_usage_percent() * 0.3
            + self.disk_usage_percent() * 0.2
            + self.thread_usage_percent() * 0.2
    }

    /// Every utilization is under its availability threshold
    pub fn is_sufficient(&self, threshold: &ResourceThreshold) -> bool {
        self.cpu_usage_percent() < threshold.cpu_threshold_percent
            && self.memory_usage_percent() < threshold.memory_threshold_percent
            && self.disk_usage_percent() < threshold.disk_threshold_percent
            && self.thread_usage_percent() < threshold.thread_threshold_percent
    }

    /// Any utilization exceeds its high-load threshold
    pub fn is_high_load(&self, threshold: &ResourceThreshold) -> bool {
        self.cpu_usage_percent() > threshold.high_load_cpu_percent
            || self.memory_usage_percent() > threshold.high_load_memory_percent
            || self.disk_usage_percent() > threshold.high_load_disk_percent
            || self.thread_usage_percent() > threshold.high_load_thread_percent
    }

    /// Name of the most constrained resource, used when waiting for recovery
    pub fn most_constrained(&self, threshold: &ResourceThreshold) -> Option<&'static str> {
        if self.disk_usage_percent() >= threshold.disk_threshold_percent {
            Some("disk_space")
        } else if self.memory_usage_percent() >= threshold.memory_threshold_percent {
            Some("memory")
        } else if self.cpu_usage_percent() >= threshold.cpu_threshold_percent {
            Some("cpu")
        } else if self.thread_usage_percent() >= threshold.thread_threshold_percent {
            Some("system_resource")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    #[default]
    Allocated,
    Suspended,
    Released,
    Expired,
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocated => write!(f, "allocated"),
            Self::Suspended => write!(f, "suspended"),
            Self::Released => write!(f, "released"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Sizing tier picked from current pressure at admission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationTier {
    HighPerformance,
    Default,
    Lightweight,
}

impl AllocationTier {
    pub fn for_pressure(pressure: f64) -> Self {
        use crate::constants::pressure::{TIER_DEFAULT, TIER_HIGH_PERFORMANCE};
        if pressure < TIER_HIGH_PERFORMANCE {
            Self::HighPerformance
        } else if pressure < TIER_DEFAULT {
            Self::Default
        } else {
            Self::Lightweight
        }
    }

    /// (cpu cores, memory MB, disk GB, threads, priority)
    fn shape(&self) -> (u32, u64, u64, u32, u32) {
        match self {
            Self::HighPerformance => (4, 4096, 20, 20, 8),
            Self::Default => (2, 2048, 10, 10, 5),
            Self::Lightweight => (1, 1024, 5, 5, 3),
        }
    }
}

impl fmt::Display for AllocationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighPerformance => write!(f, "high_performance"),
            Self::Default => write!(f, "default"),
            Self::Lightweight => write!(f, "lightweight"),
        }
    }
}

/// How running grants are reshaped during rebalancing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Higher-priority workflows receive larger priority weights
    Priority,
    /// The lightest grants receive extra threads
    LeastConnections,
    /// CPU and memory are split evenly across active workflows
    FairShare,
    /// Chooses one of the above from current pressure on every pass
    #[default]
    Adaptive,
}

impl LoadBalancingStrategy {
    /// Concrete strategy for a pressure score; non-adaptive strategies return themselves
    pub fn resolve(&self, pressure: f64) -> Self {
        use crate::constants::pressure::{ADAPTIVE_FAIR_SHARE, ADAPTIVE_PRIORITY};
        match self {
            Self::Adaptive if pressure < ADAPTIVE_FAIR_SHARE => Self::FairShare,
            Self::Adaptive if pressure <= ADAPTIVE_PRIORITY => Self::Priority,
            Self::Adaptive => Self::LeastConnections,
            concrete => *concrete,
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Priority => write!(f, "priority"),
            Self::LeastConnections => write!(f, "least_connections"),
            Self::FairShare => write!(f, "fair_share"),
            Self::Adaptive => write!(f, "adaptive"),
        }
    }
}

/// Per-workflow resource grant issued by the load balancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub allocation_id: Uuid,
    pub instance_id: Uuid,
    pub tier: AllocationTier,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub threads: u32,
    /// Relative weight; higher wins under the priority strategy
    pub priority: u32,
    pub status: AllocationStatus,
    pub reason: String,
    pub allocated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceAllocation {
    pub fn for_tier(instance_id: Uuid, tier: AllocationTier, reason: impl Into<String>) -> Self {
        let (cpu_cores, memory_mb, disk_gb, threads, priority) = tier.shape();
        let now = Utc::now();
        Self {
            allocation_id: Uuid::new_v4(),
            instance_id,
            tier,
            cpu_cores,
            memory_mb,
            disk_gb,
            threads,
            priority,
            status: AllocationStatus::Allocated,
            reason: reason.into(),
            allocated_at: now,
            updated_at: now,
        }
    }

    pub fn weight_score(&self) -> f64 {
        self.cpu_cores as f64 * 0.3
            + (self.memory_mb as f64 / 1024.0) * 0.3
            + self.disk_gb as f64 * 0.2
            + self.threads as f64 * 0.2
            + self.priority as f64 * 0.1
    }

    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Allocated
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
