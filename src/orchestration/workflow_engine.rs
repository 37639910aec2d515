//! # Workflow Engine
//!
//! Public entry point for running workflows: admission, the instance
//! registry, per-instance execution and lifecycle control.
//!
//! ## Architecture
//!
//! ```text
//!  start(task_id, config)
//!        │ validate ─▶ admission ─▶ duplicate check ─▶ allocate ─▶ register
//!        ▼
//!  ┌──────────────┐ spawn  ┌──────────────────┐ StepFailed ┌─────────────────┐
//!  │WorkflowEngine│───────▶│ run task          │──────────▶│ RecoveryManager │
//!  │  registry    │        │ TaskOrchestrator  │           └────────┬────────┘
//!  └──────────────┘        └──────────────────┘                    │
//!        ▲                                                         │
//!        └──────────── WorkflowControl (pause/resume/reset/skip) ◀─┘
//! ```
//!
//! ## Key Responsibilities
//!
//! - **Admission**: configuration validation, the load balancer's admission
//!   check, at most one non-terminal instance per task id and a resource
//!   grant. Rejections come back as [`StartRejection`] values.
//! - **Execution**: each admitted instance runs on its own tokio task. A
//!   per-instance flag keeps at most one run task alive; a resume that lands
//!   while a step is still in flight is picked up when that step finishes.
//! - **Terminal bookkeeping**: the grant is released, recovery state is
//!   cleared and statistics are updated exactly once, when an instance first
//!   reaches a terminal state.
//! - **Background work**: periodic rebalancing of active grants and cleanup of
//!   expired instances.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::load_balancer::LoadBalancer;
use super::processing::ProcessingContract;
use super::recovery::{RecoveryManager, WorkflowControl};
use super::state_manager::StateManager;
use super::task_orchestrator::{SharedInstance, TaskOrchestrator};
use crate::config::MediaflowConfig;
use crate::constants::system::CLEANUP_INTERVAL_SECS;
use crate::error::{FlowError, Result, StartRejection};
use crate::events::{EventPublisher, WorkflowStatusChanged};
use crate::logging::log_workflow_operation;
use crate::models::{WorkflowConfig, WorkflowInstance};
use crate::resources::ResourceMonitor;
use crate::state_machine::{StepEvent, StepStatus, WorkflowEvent, WorkflowStatus};
use crate::store::TaskStore;

/// Registry entry: the instance plus its single-runner flag
struct InstanceSlot {
    instance: SharedInstance,
    executing: AtomicBool,
}

#[derive(Debug, Default)]
struct EngineCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub active: usize,
    pub registered: usize,
}

pub struct WorkflowEngine {
    config: MediaflowConfig,
    monitor: Arc<ResourceMonitor>,
    load_balancer: Arc<LoadBalancer>,
    orchestrator: TaskOrchestrator,
    recovery: Arc<RecoveryManager>,
    instances: DashMap<Uuid, Arc<InstanceSlot>>,
    /// Serializes the duplicate check with registration
    admission: Mutex<()>,
    active: AtomicUsize,
    counters: EngineCounters,
    background: Mutex<Vec<JoinHandle<()>>>,
    self_ref: Weak<WorkflowEngine>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("instances", &self.instances.len())
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    pub fn new(
        config: MediaflowConfig,
        monitor: Arc<ResourceMonitor>,
        load_balancer: Arc<LoadBalancer>,
        processor: Arc<dyn ProcessingContract>,
        store: Arc<dyn TaskStore>,
        publisher: EventPublisher,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<Self>| {
            let control: Weak<dyn WorkflowControl> = self_ref.clone();
            let recovery = RecoveryManager::new(
                config.recovery.clone(),
                Arc::clone(&monitor),
                publisher.clone(),
                control,
            );
            let orchestrator = TaskOrchestrator::new(processor, StateManager::new(publisher, store));

            info!(
                rebalance_enabled = config.engine.rebalance_enabled,
                max_retries = config.recovery.max_retries,
                "🏗️ WORKFLOW ENGINE: Initialized"
            );

            Self {
                config,
                monitor,
                load_balancer,
                orchestrator,
                recovery,
                instances: DashMap::new(),
                admission: Mutex::new(()),
                active: AtomicUsize::new(0),
                counters: EngineCounters::default(),
                background: Mutex::new(Vec::new()),
                self_ref: self_ref.clone(),
            }
        })
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn publisher(&self) -> &EventPublisher {
        self.orchestrator.state().publisher()
    }

    /// Admit and launch a workflow for `task_id`.
    ///
    /// Returns a snapshot of the registered instance; execution continues in
    /// the background.
    pub fn start(&self, task_id: &str, config: WorkflowConfig) -> Result<WorkflowInstance> {
        if let Err(reason) = config.validate() {
            return Err(self.reject(task_id, StartRejection::InvalidConfiguration(reason)));
        }

        let _admission = self.admission.lock();

        if !self.load_balancer.can_start_new_workflow() {
            let rejection = if self.load_balancer.is_paused() {
                StartRejection::IntakePaused
            } else {
                StartRejection::ResourcesUnavailable
            };
            return Err(self.reject(task_id, rejection));
        }

        if let Some(existing) = self.find_active_by_task_id(task_id) {
            return Err(self.reject(
                task_id,
                StartRejection::DuplicateTask {
                    task_id: task_id.to_string(),
                    instance_id: existing,
                },
            ));
        }

        let mut instance =
            WorkflowInstance::new(task_id, config, self.config.recovery.max_retries);
        let Some(allocation) = self.load_balancer.allocate(&instance) else {
            return Err(self.reject(task_id, StartRejection::AllocationDenied));
        };
        instance.allocation_id = Some(allocation.allocation_id);

        let instance_id = instance.instance_id;
        let snapshot = instance.clone();
        self.instances.insert(
            instance_id,
            Arc::new(InstanceSlot {
                instance: Arc::new(Mutex::new(instance)),
                executing: AtomicBool::new(false),
            }),
        );
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.monitor.set_active_workflows(active);
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        self.orchestrator.state().persist_instance(&snapshot);

        log_workflow_operation(
            "start",
            instance_id,
            task_id,
            &snapshot.status.to_string(),
            Some(&format!(
                "steps={} tier_cpu={} tier_memory_mb={}",
                snapshot.steps.len(),
                allocation.cpu_cores,
                allocation.memory_mb
            )),
        );

        if !self.spawn_run(instance_id) {
            self.fail_instance(instance_id, "no async runtime available to execute the workflow");
            return Err(FlowError::Internal(
                "workflow could not be scheduled for execution".to_string(),
            ));
        }
        Ok(snapshot)
    }

    fn reject(&self, task_id: &str, rejection: StartRejection) -> FlowError {
        self.counters.rejected.fetch_add(1, Ordering::SeqCst);
        warn!(task_id = %task_id, reason = %rejection, "🚫 Workflow start rejected");
        FlowError::Rejected(rejection)
    }

    /// Cancel any non-terminal instance; false when already terminal or unknown
    pub fn cancel(&self, instance_id: Uuid) -> bool {
        let cancelled = self
            .apply_workflow_event(instance_id, WorkflowEvent::Cancel)
            .is_some();
        if cancelled {
            info!(instance_id = %instance_id, "🛑 Workflow cancelled");
        }
        cancelled
    }

    /// Pause a running instance at its next checkpoint
    pub fn pause(&self, instance_id: Uuid) -> bool {
        let paused = self
            .apply_workflow_event(instance_id, WorkflowEvent::Pause)
            .is_some();
        if paused {
            info!(instance_id = %instance_id, "⏸️ Workflow paused");
        }
        paused
    }

    /// Resume a paused instance.
    ///
    /// Failed steps are reset to pending and any scheduled recovery is
    /// dropped, so the operator's resume takes precedence.
    pub fn resume(&self, instance_id: Uuid) -> bool {
        let Some(slot) = self.slot(instance_id) else {
            return false;
        };
        {
            let mut instance = slot.instance.lock();
            if instance.status != WorkflowStatus::Paused {
                return false;
            }
            let failed: Vec<Uuid> = instance
                .steps
                .iter()
                .filter(|step| step.status == StepStatus::Failed)
                .map(|step| step.step_id)
                .collect();
            for step_id in failed {
                if let Err(e) =
                    self.orchestrator
                        .state()
                        .transition_step(&mut instance, step_id, StepEvent::Retry)
                {
                    warn!(instance_id = %instance_id, error = %e, "Could not reset failed step");
                }
            }
        }
        self.recovery.clear_instance(instance_id);
        self.resume_instance(instance_id)
    }

    fn resume_instance(&self, instance_id: Uuid) -> bool {
        if self
            .apply_workflow_event(instance_id, WorkflowEvent::Resume)
            .is_none()
        {
            return false;
        }
        info!(instance_id = %instance_id, "▶️ Workflow resumed");
        self.spawn_run(instance_id);
        true
    }

    fn fail_instance(&self, instance_id: Uuid, message: &str) -> bool {
        let failed = self
            .apply_workflow_event(instance_id, WorkflowEvent::fail_with_error(message))
            .is_some();
        if failed {
            error!(instance_id = %instance_id, error = %message, "💥 Workflow failed");
        }
        failed
    }

    /// Drop terminal instances that finished more than `older_than_hours` ago
    pub fn cleanup(&self, older_than_hours: u64) -> usize {
        let now = chrono::Utc::now();
        // Capped at a century so the chrono conversion cannot overflow
        let max_age = chrono::Duration::hours(older_than_hours.min(876_000) as i64);
        let expired: Vec<Uuid> = self
            .instances
            .iter()
            .filter(|entry| entry.value().instance.lock().is_expired(now, max_age))
            .map(|entry| *entry.key())
            .collect();

        for instance_id in &expired {
            self.instances.remove(instance_id);
            self.recovery.forget_instance(*instance_id);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), older_than_hours, "🧹 Expired workflow instances removed");
        }
        expired.len()
    }

    pub fn get(&self, instance_id: Uuid) -> Option<WorkflowInstance> {
        self.slot(instance_id)
            .map(|slot| slot.instance.lock().clone())
    }

    pub fn status(&self, instance_id: Uuid) -> Option<WorkflowStatus> {
        self.slot(instance_id).map(|slot| slot.instance.lock().status)
    }

    /// Snapshots of every non-terminal instance
    pub fn active_instances(&self) -> Vec<WorkflowInstance> {
        self.slots()
            .into_iter()
            .filter_map(|slot| {
                let instance = slot.instance.lock();
                (!instance.is_terminal()).then(|| instance.clone())
            })
            .collect()
    }

    /// The non-terminal instance for a task, or else its most recent one
    pub fn find_by_task_id(&self, task_id: &str) -> Option<WorkflowInstance> {
        let mut matches: Vec<WorkflowInstance> = self
            .slots()
            .into_iter()
            .filter_map(|slot| {
                let instance = slot.instance.lock();
                (instance.task_id == task_id).then(|| instance.clone())
            })
            .collect();
        matches.sort_by_key(|instance| (!instance.is_terminal(), instance.created_at));
        matches.pop()
    }

    fn find_active_by_task_id(&self, task_id: &str) -> Option<Uuid> {
        self.slots().into_iter().find_map(|slot| {
            let instance = slot.instance.lock();
            (instance.task_id == task_id && !instance.is_terminal()).then_some(instance.instance_id)
        })
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            started: self.counters.started.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            cancelled: self.counters.cancelled.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            registered: self.instances.len(),
        }
    }

    /// Wait until the instance is terminal or paused; `None` if it is unknown
    pub async fn wait_until_settled(
        &self,
        instance_id: Uuid,
        poll_interval: Duration,
    ) -> Option<WorkflowStatus> {
        loop {
            let status = self.status(instance_id)?;
            if status.is_terminal() || status == WorkflowStatus::Paused {
                return Some(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Spawn the periodic rebalancer (when enabled) and the expiry sweep
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut background = self.background.lock();
        if !background.is_empty() {
            debug!("Background tasks already running");
            return;
        }

        if self.config.engine.rebalance_enabled {
            let engine = Arc::downgrade(self);
            let period = self.config.load_balancer.rebalance_interval();
            background.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(engine) = engine.upgrade() else {
                        break;
                    };
                    let active = engine.active_instances();
                    if active.is_empty() {
                        continue;
                    }
                    let result = engine.load_balancer.rebalance(&active);
                    debug!(
                        strategy = %result.strategy,
                        adjusted = result.adjusted,
                        "Periodic rebalance finished"
                    );
                }
            }));
        }

        let engine = Arc::downgrade(self);
        let retention_hours = self.config.engine.retention_hours;
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.cleanup(retention_hours);
            }
        }));

        info!(tasks = background.len(), "🔄 WORKFLOW ENGINE: Background tasks started");
    }

    /// Stop background loops and scheduled recoveries; running steps finish on their own
    pub fn shutdown(&self) {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        self.recovery.shutdown();
        info!(active = self.active.load(Ordering::SeqCst), "🛑 WORKFLOW ENGINE: Shut down");
    }

    /// Wait until queued store writes have been applied
    pub async fn flush_store(&self) {
        self.orchestrator.state().flush().await;
    }

    fn slot(&self, instance_id: Uuid) -> Option<Arc<InstanceSlot>> {
        self.instances
            .get(&instance_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Clone the slots out so no map guard is held while instance locks are taken
    fn slots(&self) -> Vec<Arc<InstanceSlot>> {
        self.instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Apply a workflow transition and, on the first terminal state, settle
    /// the grant, recovery state and counters.
    fn apply_workflow_event(
        &self,
        instance_id: Uuid,
        event: WorkflowEvent,
    ) -> Option<WorkflowStatusChanged> {
        let slot = self.slot(instance_id)?;
        let change = {
            let mut instance = slot.instance.lock();
            match self
                .orchestrator
                .state()
                .transition_workflow(&mut instance, event)
            {
                Ok(change) => {
                    self.orchestrator.state().persist_instance(&instance);
                    change
                }
                Err(e) => {
                    debug!(instance_id = %instance_id, error = %e, "Workflow transition rejected");
                    return None;
                }
            }
        };

        if change.new_status.is_terminal() {
            self.on_terminal(&change);
        }
        Some(change)
    }

    fn on_terminal(&self, change: &WorkflowStatusChanged) {
        if self.load_balancer.release(change.instance_id).is_none() {
            debug!(instance_id = %change.instance_id, "No resource grant to release");
        }
        self.recovery.clear_instance(change.instance_id);

        let active = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .map(|previous| previous.saturating_sub(1))
            .unwrap_or(0);
        self.monitor.set_active_workflows(active);

        let counter = match change.new_status {
            WorkflowStatus::Completed => &self.counters.completed,
            WorkflowStatus::Failed => &self.counters.failed,
            WorkflowStatus::Cancelled => &self.counters.cancelled,
            WorkflowStatus::Pending | WorkflowStatus::Running | WorkflowStatus::Paused => return,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        log_workflow_operation(
            "finish",
            change.instance_id,
            &change.task_id,
            &change.new_status.to_string(),
            Some(&format!("progress={:.2}", change.progress)),
        );
    }

    /// Start a run task unless one is already executing this instance
    fn spawn_run(&self, instance_id: Uuid) -> bool {
        let Some(slot) = self.slot(instance_id) else {
            return false;
        };
        if slot
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(instance_id = %instance_id, "Run task already active, it will pick up the resume");
            return true;
        }

        let (Some(engine), Ok(runtime)) = (
            self.self_ref.upgrade(),
            tokio::runtime::Handle::try_current(),
        ) else {
            slot.executing.store(false, Ordering::SeqCst);
            warn!(instance_id = %instance_id, "Cannot spawn workflow run task");
            return false;
        };

        runtime.spawn(async move { engine.run(slot).await });
        true
    }

    async fn run(self: Arc<Self>, slot: Arc<InstanceSlot>) {
        loop {
            let result = self.orchestrator.orchestrate(&slot.instance).await;
            self.settle_run(&slot.instance, result);

            slot.executing.store(false, Ordering::SeqCst);
            let runnable = {
                let instance = slot.instance.lock();
                instance.status == WorkflowStatus::Running
                    && instance
                        .current_step()
                        .map_or(true, |step| step.status == StepStatus::Pending)
            };
            if !runnable
                || slot
                    .executing
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
    }

    fn settle_run(&self, shared: &SharedInstance, result: Result<()>) {
        let instance_id = shared.lock().instance_id;
        match result {
            Ok(()) => {
                let finished = {
                    let instance = shared.lock();
                    instance.status == WorkflowStatus::Running && instance.current_step().is_none()
                };
                if finished
                    && self
                        .apply_workflow_event(instance_id, WorkflowEvent::Complete)
                        .is_some()
                {
                    info!(instance_id = %instance_id, "🏁 Workflow completed");
                }
            }
            Err(FlowError::StepFailed {
                step_id, message, ..
            }) => {
                let (snapshot, step) = {
                    let instance = shared.lock();
                    (instance.clone(), instance.step(step_id).cloned())
                };
                if snapshot.status.is_terminal() {
                    debug!(
                        instance_id = %instance_id,
                        status = %snapshot.status,
                        error = %message,
                        "Step failed after the workflow finished, nothing to recover"
                    );
                    return;
                }
                let handled = step.is_some_and(|step| {
                    self.recovery.handle_failure(&snapshot, &step, &message)
                });
                if !handled {
                    self.fail_instance(instance_id, &message);
                }
            }
            Err(e) => {
                error!(instance_id = %instance_id, error = %e, "Orchestration error");
                self.fail_instance(instance_id, &e.to_string());
            }
        }
    }
}

impl WorkflowControl for WorkflowEngine {
    fn pause_for_recovery(&self, instance_id: Uuid, reason: &str) -> bool {
        let paused = self
            .apply_workflow_event(instance_id, WorkflowEvent::Pause)
            .is_some();
        if paused {
            info!(instance_id = %instance_id, reason = %reason, "⏸️ Workflow paused for recovery");
        }
        paused
    }

    fn resume_after_recovery(&self, instance_id: Uuid) -> bool {
        self.resume_instance(instance_id)
    }

    fn fail_workflow(&self, instance_id: Uuid, message: &str) -> bool {
        self.fail_instance(instance_id, message)
    }

    fn reset_step(&self, instance_id: Uuid, step_id: Uuid) -> bool {
        self.transition_step(instance_id, step_id, StepEvent::Retry)
    }

    fn skip_step(&self, instance_id: Uuid, step_id: Uuid, reason: &str) -> bool {
        self.transition_step(instance_id, step_id, StepEvent::skip_with_reason(reason))
    }

    fn failed_step(&self, instance_id: Uuid) -> Option<Uuid> {
        let slot = self.slot(instance_id)?;
        let instance = slot.instance.lock();
        instance
            .steps
            .iter()
            .find(|step| step.status == StepStatus::Failed)
            .map(|step| step.step_id)
    }
}

impl WorkflowEngine {
    fn transition_step(&self, instance_id: Uuid, step_id: Uuid, event: StepEvent) -> bool {
        let Some(slot) = self.slot(instance_id) else {
            return false;
        };
        let mut instance = slot.instance.lock();
        match self
            .orchestrator
            .state()
            .transition_step(&mut instance, step_id, event)
        {
            Ok(_) => {
                self.orchestrator.state().persist_instance(&instance);
                true
            }
            Err(e) => {
                debug!(instance_id = %instance_id, error = %e, "Step transition rejected");
                false
            }
        }
    }
}

impl Drop for WorkflowEngine {
    fn drop(&mut self) {
        for handle in self.background.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceThreshold;
    use crate::models::{StepType, WorkflowStep};
    use crate::orchestration::processing::ProcessingResult;
    use crate::resources::FixedSampler;
    use crate::store::InMemoryTaskStore;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Completes every step, optionally blocking each execution on a gate
    #[derive(Default)]
    struct GatedProcessor {
        gate: Option<Arc<Notify>>,
        fail_on: Option<(StepType, &'static str)>,
    }

    #[async_trait]
    impl ProcessingContract for GatedProcessor {
        async fn execute(&self, _instance: &WorkflowInstance, step_type: StepType) -> ProcessingResult {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match self.fail_on {
                Some((failing, message)) if failing == step_type => ProcessingResult::failure(message),
                _ => ProcessingResult::success([format!("/out/{step_type}")]),
            }
        }
    }

    fn engine_with(processor: GatedProcessor) -> (Arc<WorkflowEngine>, Arc<FixedSampler>) {
        let sampler = Arc::new(FixedSampler::idle());
        let monitor = ResourceMonitor::new(ResourceThreshold::for_testing(), sampler.clone());
        monitor.sample();
        let config = MediaflowConfig::for_testing();
        let load_balancer = LoadBalancer::new(&config.load_balancer, Arc::clone(&monitor));
        let engine = WorkflowEngine::new(
            config,
            monitor,
            load_balancer,
            Arc::new(processor),
            Arc::new(InMemoryTaskStore::new()),
            EventPublisher::new(256),
        );
        (engine, sampler)
    }

    async fn settle(engine: &WorkflowEngine, instance_id: Uuid) -> WorkflowStatus {
        tokio::time::timeout(
            Duration::from_secs(5),
            engine.wait_until_settled(instance_id, Duration::from_millis(5)),
        )
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn test_workflow_runs_to_completion_and_releases_grant() {
        let (engine, _) = engine_with(GatedProcessor::default());
        let instance = engine.start("task-1", WorkflowConfig::default()).unwrap();
        assert!(instance.allocation_id.is_some());

        assert_eq!(settle(&engine, instance.instance_id).await, WorkflowStatus::Completed);
        assert!(engine.load_balancer().allocation(instance.instance_id).is_none());

        let finished = engine.get(instance.instance_id).unwrap();
        assert_eq!(finished.progress, 1.0);
        assert!(finished
            .steps
            .iter()
            .all(|step: &WorkflowStep| step.status == StepStatus::Completed));
        let stats = engine.stats();
        assert_eq!((stats.started, stats.completed, stats.active), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_duplicate_task_is_rejected_while_active() {
        let gate = Arc::new(Notify::new());
        let (engine, _) = engine_with(GatedProcessor {
            gate: Some(gate.clone()),
            ..GatedProcessor::default()
        });
        let first = engine.start("task-dup", WorkflowConfig::default()).unwrap();

        let err = engine.start("task-dup", WorkflowConfig::default()).unwrap_err();
        assert_eq!(
            err,
            FlowError::Rejected(StartRejection::DuplicateTask {
                task_id: "task-dup".to_string(),
                instance_id: first.instance_id,
            })
        );

        assert!(engine.cancel(first.instance_id));
        assert!(engine.start("task-dup", WorkflowConfig::default()).is_ok());
        assert_eq!(engine.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_and_paused_intake_are_rejected() {
        let (engine, _) = engine_with(GatedProcessor::default());
        let mut config = WorkflowConfig::default();
        config.segmentation.enabled = true;
        assert!(matches!(
            engine.start("task-bad", config),
            Err(FlowError::Rejected(StartRejection::InvalidConfiguration(_)))
        ));

        engine.load_balancer().pause_new_workflows();
        assert_eq!(
            engine.start("task-2", WorkflowConfig::default()).unwrap_err(),
            FlowError::Rejected(StartRejection::IntakePaused)
        );
        assert!(engine.active_instances().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let gate = Arc::new(Notify::new());
        let (engine, _) = engine_with(GatedProcessor {
            gate: Some(gate.clone()),
            ..GatedProcessor::default()
        });
        let instance = engine.start("task-cancel", WorkflowConfig::default()).unwrap();

        assert!(engine.cancel(instance.instance_id));
        assert!(!engine.cancel(instance.instance_id));
        assert_eq!(engine.status(instance.instance_id), Some(WorkflowStatus::Cancelled));
        assert!(engine.load_balancer().allocation(instance.instance_id).is_none());
        assert_eq!(engine.stats().cancelled, 1);

        // The in-flight step finishes without reviving the workflow
        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.status(instance.instance_id), Some(WorkflowStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_pause_and_resume_continue_from_checkpoint() {
        let gate = Arc::new(Notify::new());
        let (engine, _) = engine_with(GatedProcessor {
            gate: Some(gate.clone()),
            ..GatedProcessor::default()
        });
        let instance = engine.start("task-pause", WorkflowConfig::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(engine.pause(instance.instance_id));
        assert!(!engine.pause(instance.instance_id));
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let paused = engine.get(instance.instance_id).unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);
        assert_eq!(paused.steps[0].status, StepStatus::Completed);
        assert_eq!(paused.steps[1].status, StepStatus::Pending);

        assert!(engine.resume(instance.instance_id));
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gate.notify_one();
        }
        assert_eq!(settle(&engine, instance.instance_id).await, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_fatal_failure_fails_workflow() {
        let (engine, _) = engine_with(GatedProcessor {
            fail_on: Some((StepType::Clip, "source file not found")),
            ..GatedProcessor::default()
        });
        let instance = engine.start("task-fatal", WorkflowConfig::default()).unwrap();

        assert_eq!(settle(&engine, instance.instance_id).await, WorkflowStatus::Failed);
        let failed = engine.get(instance.instance_id).unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("source file not found"));
        assert!(engine.load_balancer().allocation(instance.instance_id).is_none());
        assert_eq!(engine.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_terminal_instances() {
        let (engine, _) = engine_with(GatedProcessor::default());
        let instance = engine.start("task-old", WorkflowConfig::default()).unwrap();
        settle(&engine, instance.instance_id).await;

        assert_eq!(engine.cleanup(1), 0);
        {
            let slot = engine.slot(instance.instance_id).unwrap();
            slot.instance.lock().completed_at =
                Some(chrono::Utc::now() - chrono::Duration::hours(2));
        }
        assert_eq!(engine.cleanup(1), 1);
        assert!(engine.get(instance.instance_id).is_none());
    }
}
