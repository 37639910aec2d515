//! # Load Balancer / Admission Controller
//!
//! Decides whether a new workflow may start, sizes its resource grant from
//! current pressure and periodically reshapes running grants.
//!
//! ## Admission
//!
//! `can_start_new_workflow()` is false when intake is paused, when the number of
//! live grants has reached the concurrency limit, or when the resource monitor
//! reports insufficient resources. The concurrency limit is the smaller of the
//! tracked limit (adjusted by rebalancing and load callbacks) and the monitor's
//! current recommendation.
//!
//! `allocate()` performs the check and the insert under one admission lock so
//! two concurrent callers can never both take the last slot.
//!
//! ## Rebalancing strategies
//!
//! | Strategy          | Effect on running grants                                  |
//! |-------------------|-----------------------------------------------------------|
//! | priority          | grant priority = max(1, 10 - rank by workflow priority)   |
//! | least_connections | lightest half by weight score gets +2 threads (cap 20)    |
//! | fair_share        | cpu and memory split evenly across active workflows       |
//! | adaptive          | fair_share < 30 ≤ priority ≤ 70 < least_connections       |

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LoadBalancerConfig;
use crate::constants::system::{
    MAX_THREADS_PER_ALLOCATION, MIN_FAIR_SHARE_MEMORY_MB, PRESSURE_CHANGE_THRESHOLD,
};
use crate::models::{
    AllocationStatus, AllocationTier, LoadBalancingStrategy, ResourceAllocation, ResourceSnapshot,
    WorkflowInstance,
};
use crate::resources::{ResourceListener, ResourceMonitor, WeakListener};

/// Outcome of one rebalancing pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub adjusted: usize,
    pub paused: usize,
    pub resumed: usize,
    pub strategy: LoadBalancingStrategy,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerStats {
    pub total_allocations: u64,
    pub rejected_allocations: u64,
    pub rebalance_count: u64,
    pub last_rebalance_at: Option<DateTime<Utc>>,
    pub configured_strategy: LoadBalancingStrategy,
    pub effective_strategy: LoadBalancingStrategy,
    pub active_allocations: usize,
    pub concurrency_limit: usize,
    pub paused: bool,
    pub pressure_score: f64,
}

pub struct LoadBalancer {
    monitor: Arc<ResourceMonitor>,
    allocations: DashMap<Uuid, ResourceAllocation>,
    strategy: RwLock<LoadBalancingStrategy>,
    effective_strategy: RwLock<LoadBalancingStrategy>,
    concurrency_limit: AtomicUsize,
    paused: AtomicBool,
    admission_lock: Mutex<()>,
    total_allocations: AtomicU64,
    rejected_allocations: AtomicU64,
    rebalance_count: AtomicU64,
    last_rebalance_at: RwLock<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategy", &*self.strategy.read())
            .field("allocations", &self.allocations.len())
            .field("concurrency_limit", &self.concurrency_limit())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl LoadBalancer {
    /// Build the balancer and register it for load callbacks on `monitor`
    pub fn new(config: &LoadBalancerConfig, monitor: Arc<ResourceMonitor>) -> Arc<Self> {
        let initial_limit = monitor.recommended_concurrency();
        let pressure = monitor.pressure_score();
        let balancer = Arc::new(Self {
            allocations: DashMap::new(),
            strategy: RwLock::new(config.strategy),
            effective_strategy: RwLock::new(config.strategy.resolve(pressure)),
            concurrency_limit: AtomicUsize::new(initial_limit),
            paused: AtomicBool::new(false),
            admission_lock: Mutex::new(()),
            total_allocations: AtomicU64::new(0),
            rejected_allocations: AtomicU64::new(0),
            rebalance_count: AtomicU64::new(0),
            last_rebalance_at: RwLock::new(None),
            monitor,
        });
        balancer
            .monitor
            .add_listener(Arc::new(WeakListener::new(&balancer)));

        info!(
            strategy = %config.strategy,
            concurrency_limit = initial_limit,
            "⚖️ LOAD BALANCER: Initialized"
        );
        balancer
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    /// Effective limit: the tracked limit capped by the live recommendation
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
            .load(Ordering::SeqCst)
            .min(self.monitor.recommended_concurrency())
    }

    pub fn can_start_new_workflow(&self) -> bool {
        if self.is_paused() {
            debug!("New workflow intake is paused");
            return false;
        }

        let active = self.allocations.len();
        let limit = self.concurrency_limit();
        if active >= limit {
            debug!(active, limit, "Concurrency limit reached");
            return false;
        }

        if !self.monitor.is_available() {
            debug!("Insufficient system resources for a new workflow");
            return false;
        }

        true
    }

    /// Issue a grant for `instance`, or `None` when admission is refused.
    ///
    /// Asking again for an instance that already holds a grant returns that grant.
    pub fn allocate(&self, instance: &WorkflowInstance) -> Option<ResourceAllocation> {
        let _admission = self.admission_lock.lock();

        if let Some(existing) = self.allocations.get(&instance.instance_id) {
            return Some(existing.clone());
        }

        if !self.can_start_new_workflow() {
            self.rejected_allocations.fetch_add(1, Ordering::SeqCst);
            warn!(
                instance_id = %instance.instance_id,
                task_id = %instance.task_id,
                "🚫 LOAD BALANCER: Allocation rejected"
            );
            return None;
        }

        let pressure = self.monitor.pressure_score();
        let tier = AllocationTier::for_pressure(pressure);
        let reason = format!(
            "strategy: {}, pressure: {:.1}%",
            self.effective_strategy(),
            pressure
        );
        let allocation = ResourceAllocation::for_tier(instance.instance_id, tier, reason);
        self.allocations
            .insert(instance.instance_id, allocation.clone());
        self.total_allocations.fetch_add(1, Ordering::SeqCst);

        info!(
            instance_id = %instance.instance_id,
            allocation_id = %allocation.allocation_id,
            tier = %tier,
            cpu_cores = allocation.cpu_cores,
            memory_mb = allocation.memory_mb,
            threads = allocation.threads,
            "✅ LOAD BALANCER: Resources allocated"
        );
        Some(allocation)
    }

    /// Remove and return the grant; `None` when there was nothing to release
    pub fn release(&self, instance_id: Uuid) -> Option<ResourceAllocation> {
        match self.allocations.remove(&instance_id) {
            Some((_, mut allocation)) => {
                allocation.status = AllocationStatus::Released;
                allocation.touch();
                info!(
                    instance_id = %instance_id,
                    allocation_id = %allocation.allocation_id,
                    "♻️ LOAD BALANCER: Resources released"
                );
                Some(allocation)
            }
            None => {
                debug!(instance_id = %instance_id, "No allocation to release");
                None
            }
        }
    }

    pub fn allocation(&self, instance_id: Uuid) -> Option<ResourceAllocation> {
        self.allocations.get(&instance_id).map(|entry| entry.clone())
    }

    pub fn active_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn rebalance(&self, active: &[WorkflowInstance]) -> RebalanceResult {
        let snapshot = self.monitor.current_snapshot();
        let pressure = snapshot.pressure_score();
        let mut adjusted = 0;
        let mut paused = 0;
        let mut resumed = 0;

        let configured = *self.strategy.read();
        let strategy = configured.resolve(pressure);
        {
            let mut effective = self.effective_strategy.write();
            if *effective != strategy {
                info!(from = %*effective, to = %strategy, "⚖️ LOAD BALANCER: Strategy switched");
                *effective = strategy;
                adjusted += 1;
            }
        }

        let recommended = self.monitor.recommended_concurrency();
        let previous_limit = self.concurrency_limit.swap(recommended, Ordering::SeqCst);
        if previous_limit != recommended {
            info!(
                from = previous_limit,
                to = recommended,
                "⚖️ LOAD BALANCER: Concurrency limit adjusted"
            );
            adjusted += 1;
        }

        adjusted += match strategy {
            LoadBalancingStrategy::Priority => self.rebalance_by_priority(active),
            LoadBalancingStrategy::LeastConnections => self.rebalance_by_least_connections(),
            LoadBalancingStrategy::FairShare => self.rebalance_by_fair_share(active, &snapshot),
            // resolve() never yields Adaptive
            LoadBalancingStrategy::Adaptive => 0,
        };

        if self.monitor.is_high_load() {
            if self.pause_new_workflows() {
                paused += 1;
            }
        } else if self.resume_new_workflows() {
            resumed += 1;
        }

        self.rebalance_count.fetch_add(1, Ordering::SeqCst);
        *self.last_rebalance_at.write() = Some(Utc::now());

        let description = format!(
            "rebalanced with {strategy}: concurrency limit {recommended}, pressure {pressure:.1}%"
        );
        info!(
            adjusted,
            paused,
            resumed,
            strategy = %strategy,
            active = active.len(),
            "⚖️ LOAD BALANCER: Rebalance complete"
        );

        RebalanceResult {
            adjusted,
            paused,
            resumed,
            strategy,
            description,
        }
    }

    fn rebalance_by_priority(&self, active: &[WorkflowInstance]) -> usize {
        let mut ranked: Vec<&WorkflowInstance> = active.iter().collect();
        // Lower TaskPriority value is more urgent; sort is stable so ties keep order
        ranked.sort_by_key(|instance| instance.config.priority.value());

        let mut adjusted = 0;
        for (rank, instance) in ranked.iter().enumerate() {
            if let Some(mut allocation) = self.allocations.get_mut(&instance.instance_id) {
                let priority = 10u32.saturating_sub(rank as u32).max(1);
                if allocation.priority != priority {
                    allocation.priority = priority;
                    allocation.touch();
                    adjusted += 1;
                }
            }
        }
        adjusted
    }

    fn rebalance_by_least_connections(&self) -> usize {
        let mut weighted: Vec<(Uuid, f64)> = self
            .allocations
            .iter()
            .map(|entry| (*entry.key(), entry.weight_score()))
            .collect();
        weighted.sort_by(|a, b| a.1.total_cmp(&b.1));

        let lighter_half = weighted.len() / 2;
        let mut adjusted = 0;
        for (instance_id, _) in weighted.into_iter().take(lighter_half) {
            if let Some(mut allocation) = self.allocations.get_mut(&instance_id) {
                let threads = (allocation.threads + 2).min(MAX_THREADS_PER_ALLOCATION);
                if allocation.threads != threads {
                    allocation.threads = threads;
                    allocation.touch();
                    adjusted += 1;
                }
            }
        }
        adjusted
    }

    fn rebalance_by_fair_share(
        &self,
        active: &[WorkflowInstance],
        snapshot: &ResourceSnapshot,
    ) -> usize {
        if active.is_empty() {
            return 0;
        }
        let count = active.len() as u64;
        // Rough core estimate from the live thread count
        let total_cores = u64::from(snapshot.active_threads / 10);
        let cpu_share = (total_cores / count).max(1) as u32;
        let memory_share = (snapshot.total_memory_mb / count / 2).max(MIN_FAIR_SHARE_MEMORY_MB);

        let mut adjusted = 0;
        for instance in active {
            if let Some(mut allocation) = self.allocations.get_mut(&instance.instance_id) {
                let mut changed = false;
                if allocation.cpu_cores != cpu_share {
                    allocation.cpu_cores = cpu_share;
                    adjusted += 1;
                    changed = true;
                }
                if allocation.memory_mb != memory_share {
                    allocation.memory_mb = memory_share;
                    adjusted += 1;
                    changed = true;
                }
                if changed {
                    allocation.touch();
                }
            }
        }
        adjusted
    }

    /// Returns true when this call changed the paused flag
    pub fn pause_new_workflows(&self) -> bool {
        let changed = self
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            warn!("⏸️ LOAD BALANCER: New workflow intake paused");
        }
        changed
    }

    /// Returns true when this call changed the paused flag
    pub fn resume_new_workflows(&self) -> bool {
        let changed = self
            .paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            info!("▶️ LOAD BALANCER: New workflow intake resumed");
        }
        changed
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_strategy(&self, strategy: LoadBalancingStrategy) {
        let previous = std::mem::replace(&mut *self.strategy.write(), strategy);
        *self.effective_strategy.write() = strategy.resolve(self.monitor.pressure_score());
        info!(from = %previous, to = %strategy, "⚖️ LOAD BALANCER: Strategy updated");
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        *self.strategy.read()
    }

    pub fn effective_strategy(&self) -> LoadBalancingStrategy {
        *self.effective_strategy.read()
    }

    pub fn stats(&self) -> LoadBalancerStats {
        LoadBalancerStats {
            total_allocations: self.total_allocations.load(Ordering::SeqCst),
            rejected_allocations: self.rejected_allocations.load(Ordering::SeqCst),
            rebalance_count: self.rebalance_count.load(Ordering::SeqCst),
            last_rebalance_at: *self.last_rebalance_at.read(),
            configured_strategy: self.strategy(),
            effective_strategy: self.effective_strategy(),
            active_allocations: self.allocations.len(),
            concurrency_limit: self.concurrency_limit(),
            paused: self.is_paused(),
            pressure_score: self.monitor.pressure_score(),
        }
    }
}

impl ResourceListener for LoadBalancer {
    fn on_changed(
        &self,
        previous: Option<&ResourceSnapshot>,
        current: &ResourceSnapshot,
    ) -> anyhow::Result<()> {
        let Some(previous) = previous else {
            return Ok(());
        };
        let (old_pressure, new_pressure) = (previous.pressure_score(), current.pressure_score());
        if (new_pressure - old_pressure).abs() > PRESSURE_CHANGE_THRESHOLD {
            let recommended = self.monitor.recommended_concurrency();
            let previous_limit = self.concurrency_limit.swap(recommended, Ordering::SeqCst);
            if previous_limit != recommended {
                info!(
                    from = previous_limit,
                    to = recommended,
                    old_pressure,
                    new_pressure,
                    "⚖️ LOAD BALANCER: Concurrency limit follows pressure swing"
                );
            }
        }
        Ok(())
    }

    fn on_high_load(&self, snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        warn!(
            pressure = snapshot.pressure_score(),
            "⚠️ LOAD BALANCER: High load, pausing intake"
        );
        self.pause_new_workflows();
        let current = self.concurrency_limit.load(Ordering::SeqCst);
        let reduced = (current / 2).max(1);
        self.concurrency_limit.store(reduced, Ordering::SeqCst);
        Ok(())
    }

    fn on_load_recovered(&self, snapshot: &ResourceSnapshot) -> anyhow::Result<()> {
        info!(
            pressure = snapshot.pressure_score(),
            "✅ LOAD BALANCER: Load recovered, resuming intake"
        );
        self.resume_new_workflows();
        self.concurrency_limit
            .store(self.monitor.recommended_concurrency(), Ordering::SeqCst);
        Ok(())
    }
}
