//! # Recovery Manager
//!
//! Turns a failed step into a recovery action and keeps the audit trail.
//!
//! ## Strategy Table
//!
//! | Error type    | Condition                         | Strategy             |
//! |---------------|-----------------------------------|----------------------|
//! | Temporary     | retry counter < step `max_retries`| Retry                |
//! | Temporary     | retry counter exhausted           | PauseForIntervention |
//! | Configuration | -                                 | PauseForIntervention |
//! | Resource      | -                                 | WaitForResource      |
//! | Fatal         | step type is skippable            | SkipStep             |
//! | Fatal         | otherwise                         | MarkAsFailed         |
//!
//! ## Execution
//!
//! - **Retry** pauses the workflow and schedules one delayed resumption per
//!   instance. When it fires, the failed step goes back to pending and the
//!   workflow resumes.
//! - **WaitForResource** pauses the workflow and polls the resource monitor
//!   until resources are available again, then resets and resumes.
//! - **PauseForIntervention** pauses with a reason; only
//!   [`RecoveryManager::manual_recover`] brings the workflow back.
//! - **SkipStep** marks the failed step skipped and lets the workflow go on.
//! - **MarkAsFailed** fails the workflow and drops all transient recovery
//!   state for it.
//!
//! A step that fails while its workflow is already paused (an operator pause
//! that landed mid-step) is still classified and recorded. Skip and fail are
//! applied at once. Retry, wait and intervention are recorded and deferred;
//! the operator's resume resets the failed step and runs it again.
//!
//! The manager acts on workflows through the [`WorkflowControl`] seam, which
//! the engine implements. It holds the control weakly so the engine can own
//! the manager without a reference cycle.

use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error_classifier::{resource_type_for, ErrorClassifier, KeywordErrorClassifier};
use crate::config::RecoveryConfig;
use crate::events::{EventPublisher, RecoveryAttempted};
use crate::logging::log_recovery_operation;
use crate::models::{ErrorType, RecoveryRecord, RecoveryStrategy, WorkflowInstance, WorkflowStep};
use crate::resources::ResourceMonitor;
use crate::state_machine::WorkflowStatus;

/// Operations the recovery manager needs from whoever owns the workflows
pub trait WorkflowControl: Send + Sync {
    /// Running → Paused
    fn pause_for_recovery(&self, instance_id: Uuid, reason: &str) -> bool;

    /// Paused → Running, and resume execution
    fn resume_after_recovery(&self, instance_id: Uuid) -> bool;

    /// Terminal failure
    fn fail_workflow(&self, instance_id: Uuid, message: &str) -> bool;

    /// Failed step back to pending
    fn reset_step(&self, instance_id: Uuid, step_id: Uuid) -> bool;

    fn skip_step(&self, instance_id: Uuid, step_id: Uuid, reason: &str) -> bool;

    /// First step currently in the failed state
    fn failed_step(&self, instance_id: Uuid) -> Option<Uuid>;
}

/// Delayed work owned by the manager for one instance
struct ScheduledRecovery {
    generation: u64,
    strategy: RecoveryStrategy,
    handle: AbortHandle,
}

pub struct RecoveryManager {
    config: RecoveryConfig,
    classifier: Arc<dyn ErrorClassifier>,
    monitor: Arc<ResourceMonitor>,
    publisher: EventPublisher,
    control: Weak<dyn WorkflowControl>,
    retry_counters: DashMap<(Uuid, Uuid), u32>,
    history: DashMap<Uuid, VecDeque<RecoveryRecord>>,
    paused: DashMap<Uuid, String>,
    waiting: DashMap<Uuid, String>,
    scheduled: DashMap<Uuid, ScheduledRecovery>,
    generation: AtomicU64,
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("classifier", &self.classifier.classifier_name())
            .field("paused", &self.paused.len())
            .field("waiting", &self.waiting.len())
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}

impl RecoveryManager {
    pub fn new(
        config: RecoveryConfig,
        monitor: Arc<ResourceMonitor>,
        publisher: EventPublisher,
        control: Weak<dyn WorkflowControl>,
    ) -> Arc<Self> {
        Self::with_classifier(
            config,
            Arc::new(KeywordErrorClassifier::new()),
            monitor,
            publisher,
            control,
        )
    }

    pub fn with_classifier(
        config: RecoveryConfig,
        classifier: Arc<dyn ErrorClassifier>,
        monitor: Arc<ResourceMonitor>,
        publisher: EventPublisher,
        control: Weak<dyn WorkflowControl>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            classifier,
            monitor,
            publisher,
            control,
            retry_counters: DashMap::new(),
            history: DashMap::new(),
            paused: DashMap::new(),
            waiting: DashMap::new(),
            scheduled: DashMap::new(),
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn classify(&self, message: &str) -> ErrorType {
        self.classifier.classify(message)
    }

    pub fn determine_strategy(
        &self,
        error_type: ErrorType,
        instance_id: Uuid,
        step: &WorkflowStep,
    ) -> RecoveryStrategy {
        match error_type {
            ErrorType::Temporary => {
                if self.retry_count(instance_id, step.step_id) < step.max_retries {
                    RecoveryStrategy::Retry
                } else {
                    RecoveryStrategy::PauseForIntervention
                }
            }
            ErrorType::Configuration => RecoveryStrategy::PauseForIntervention,
            ErrorType::Resource => RecoveryStrategy::WaitForResource,
            ErrorType::Fatal => {
                if self.config.is_skippable(step.step_type) {
                    RecoveryStrategy::SkipStep
                } else {
                    RecoveryStrategy::MarkAsFailed
                }
            }
        }
    }

    /// Classify a step failure and carry out the matching strategy.
    ///
    /// Returns false when no strategy could be applied; the caller then owns
    /// the failure.
    pub fn handle_failure(
        self: &Arc<Self>,
        instance: &WorkflowInstance,
        step: &WorkflowStep,
        message: &str,
    ) -> bool {
        let error_type = self.classify(message);
        let strategy = self.determine_strategy(error_type, instance.instance_id, step);

        info!(
            instance_id = %instance.instance_id,
            task_id = %instance.task_id,
            step_type = %step.step_type,
            error_type = %error_type,
            strategy = %strategy,
            "🩹 Recovering from step failure"
        );

        let Some(control) = self.control.upgrade() else {
            warn!(instance_id = %instance.instance_id, "Workflow control is gone, cannot recover");
            return false;
        };

        let paused = instance.status == WorkflowStatus::Paused;
        let (successful, detail) = match strategy {
            RecoveryStrategy::Retry if paused => self.defer_retry(instance.instance_id, step),
            RecoveryStrategy::Retry => self.schedule_retry(&*control, instance, step),
            RecoveryStrategy::WaitForResource if paused => (
                true,
                format!(
                    "workflow paused, wait for {} deferred until resume",
                    resource_type_for(message)
                ),
            ),
            RecoveryStrategy::WaitForResource => {
                self.wait_for_resource(&*control, instance, step, message)
            }
            RecoveryStrategy::PauseForIntervention => {
                let reason = if error_type == ErrorType::Temporary {
                    format!(
                        "retry limit of {} reached for {} step: {message}",
                        step.max_retries, step.step_type
                    )
                } else {
                    format!("{error_type} error in {} step: {message}", step.step_type)
                };
                if paused {
                    self.paused.insert(instance.instance_id, reason.clone());
                    (true, reason)
                } else {
                    self.pause_for_intervention(&*control, instance.instance_id, reason)
                }
            }
            RecoveryStrategy::SkipStep => {
                let reason = format!("skipped after {error_type} error: {message}");
                let skipped = control.skip_step(instance.instance_id, step.step_id, &reason);
                if skipped && !paused {
                    // Only needed when something paused the workflow meanwhile
                    control.resume_after_recovery(instance.instance_id);
                }
                (skipped, reason)
            }
            RecoveryStrategy::MarkAsFailed => {
                let failed = control.fail_workflow(instance.instance_id, message);
                self.clear_instance(instance.instance_id);
                (failed, format!("{} step failed: {message}", step.step_type))
            }
        };

        self.record(
            RecoveryRecord::new(
                instance.instance_id,
                Some(step.step_id),
                Some(error_type),
                strategy,
                message,
                successful,
            )
            .with_reason(detail),
        );
        successful
    }

    fn schedule_retry(
        self: &Arc<Self>,
        control: &dyn WorkflowControl,
        instance: &WorkflowInstance,
        step: &WorkflowStep,
    ) -> (bool, String) {
        let instance_id = instance.instance_id;
        let step_id = step.step_id;

        // One pending resumption per instance
        let dashmap::mapref::entry::Entry::Vacant(slot) = self.scheduled.entry(instance_id) else {
            debug!(instance_id = %instance_id, "Recovery already scheduled");
            return (true, "recovery already scheduled".to_string());
        };

        if !control.pause_for_recovery(instance_id, "waiting to retry") {
            return (false, "workflow could not be paused for retry".to_string());
        }

        let attempt = {
            let mut counter = self.retry_counters.entry((instance_id, step_id)).or_insert(0);
            *counter += 1;
            *counter
        };

        let delay = self.config.retry_delay();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let manager = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = manager.upgrade() {
                manager.complete_retry(instance_id, step_id, generation);
            }
        });
        slot.insert(ScheduledRecovery {
            generation,
            strategy: RecoveryStrategy::Retry,
            handle: handle.abort_handle(),
        });

        (
            true,
            format!(
                "retry {attempt}/{} of {} step in {}ms",
                step.max_retries,
                step.step_type,
                delay.as_millis()
            ),
        )
    }

    /// Charge a retry for a step that failed under an operator pause
    fn defer_retry(&self, instance_id: Uuid, step: &WorkflowStep) -> (bool, String) {
        let attempt = {
            let mut counter = self
                .retry_counters
                .entry((instance_id, step.step_id))
                .or_insert(0);
            *counter += 1;
            *counter
        };
        (
            true,
            format!(
                "workflow paused, retry {attempt}/{} of {} step deferred until resume",
                step.max_retries, step.step_type
            ),
        )
    }

    fn complete_retry(&self, instance_id: Uuid, step_id: Uuid, generation: u64) {
        if self
            .scheduled
            .remove_if(&instance_id, |_, scheduled| scheduled.generation == generation)
            .is_none()
        {
            return;
        }
        let Some(control) = self.control.upgrade() else {
            return;
        };

        let resumed =
            control.reset_step(instance_id, step_id) && control.resume_after_recovery(instance_id);
        self.record(
            RecoveryRecord::new(
                instance_id,
                Some(step_id),
                Some(ErrorType::Temporary),
                RecoveryStrategy::Retry,
                if resumed {
                    "retry delay elapsed, workflow resumed"
                } else {
                    "retry delay elapsed, workflow could not be resumed"
                },
                resumed,
            ),
        );
    }

    fn wait_for_resource(
        self: &Arc<Self>,
        control: &dyn WorkflowControl,
        instance: &WorkflowInstance,
        step: &WorkflowStep,
        message: &str,
    ) -> (bool, String) {
        let instance_id = instance.instance_id;
        let step_id = step.step_id;
        let resource_type = resource_type_for(message);

        let dashmap::mapref::entry::Entry::Vacant(slot) = self.scheduled.entry(instance_id) else {
            return (true, "recovery already scheduled".to_string());
        };

        if !control.pause_for_recovery(instance_id, &format!("waiting for {resource_type}")) {
            return (false, "workflow could not be paused".to_string());
        }
        self.waiting.insert(instance_id, resource_type.to_string());

        let poll_interval = self.config.resource_poll_interval();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let manager = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                let finished = match manager.upgrade() {
                    Some(manager) => manager.poll_resource(instance_id, step_id, generation),
                    None => true,
                };
                if finished {
                    break;
                }
            }
        });
        slot.insert(ScheduledRecovery {
            generation,
            strategy: RecoveryStrategy::WaitForResource,
            handle: handle.abort_handle(),
        });

        (
            true,
            format!(
                "waiting for {resource_type}, polling every {}ms",
                poll_interval.as_millis()
            ),
        )
    }

    /// One availability check; true once the wait is over
    fn poll_resource(&self, instance_id: Uuid, step_id: Uuid, generation: u64) -> bool {
        let current = self
            .scheduled
            .get(&instance_id)
            .is_some_and(|scheduled| scheduled.generation == generation);
        if !current {
            return true;
        }
        if !self.monitor.is_available() {
            debug!(
                instance_id = %instance_id,
                constrained = ?self.monitor.constrained_resource(),
                "Resources still unavailable"
            );
            return false;
        }

        self.scheduled
            .remove_if(&instance_id, |_, scheduled| scheduled.generation == generation);
        let resource_type = self
            .waiting
            .remove(&instance_id)
            .map(|(_, resource)| resource)
            .unwrap_or_else(|| "system_resource".to_string());
        let Some(control) = self.control.upgrade() else {
            return true;
        };

        let resumed =
            control.reset_step(instance_id, step_id) && control.resume_after_recovery(instance_id);
        self.record(
            RecoveryRecord::new(
                instance_id,
                Some(step_id),
                Some(ErrorType::Resource),
                RecoveryStrategy::WaitForResource,
                format!("{resource_type} available again"),
                resumed,
            ),
        );
        true
    }

    fn pause_for_intervention(
        &self,
        control: &dyn WorkflowControl,
        instance_id: Uuid,
        reason: String,
    ) -> (bool, String) {
        let paused = control.pause_for_recovery(instance_id, &reason);
        if paused {
            self.paused.insert(instance_id, reason.clone());
        }
        (paused, reason)
    }

    /// Operator recovery: clear transient state, reset the given (or first
    /// failed) step and resume the workflow.
    pub fn manual_recover(&self, instance_id: Uuid, from_step: Option<Uuid>) -> bool {
        let reason = self
            .paused
            .get(&instance_id)
            .map(|entry| entry.value().clone());
        self.clear_instance(instance_id);

        let Some(control) = self.control.upgrade() else {
            return false;
        };
        let step_id = from_step.or_else(|| control.failed_step(instance_id));
        if let Some(step_id) = step_id {
            if !control.reset_step(instance_id, step_id) {
                debug!(instance_id = %instance_id, step_id = %step_id, "Step was not failed, nothing to reset");
            }
        }
        let resumed = control.resume_after_recovery(instance_id);

        let mut record = RecoveryRecord::new(
            instance_id,
            step_id,
            None,
            RecoveryStrategy::Retry,
            "manual recovery",
            resumed,
        );
        if let Some(reason) = reason {
            record = record.with_reason(reason);
        }
        self.record(record);
        resumed
    }

    fn record(&self, record: RecoveryRecord) {
        log_recovery_operation(
            record.instance_id,
            record.step_id,
            &record
                .error_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "none".to_string()),
            &record.strategy.to_string(),
            record.successful,
            record.reason.as_deref(),
        );

        let event = RecoveryAttempted {
            instance_id: record.instance_id,
            step_id: record.step_id,
            error_type: record.error_type,
            strategy: record.strategy,
            successful: record.successful,
            message: record.message.clone(),
        };
        if let Err(e) = self.publisher.publish_recovery_attempted(&event) {
            warn!(instance_id = %record.instance_id, error = %e, "Failed to publish recovery event");
        }

        let mut history = self.history.entry(record.instance_id).or_default();
        history.push_back(record);
        while history.len() > self.config.history_limit.max(1) {
            history.pop_front();
        }
    }

    pub fn history(&self, instance_id: Uuid) -> Vec<RecoveryRecord> {
        self.history
            .get(&instance_id)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Instances paused for intervention, with their reasons
    pub fn paused_instances(&self) -> HashMap<Uuid, String> {
        self.paused
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Instances waiting for resources, with the awaited resource type
    pub fn waiting_instances(&self) -> HashMap<Uuid, String> {
        self.waiting
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn retry_count(&self, instance_id: Uuid, step_id: Uuid) -> u32 {
        self.retry_counters
            .get(&(instance_id, step_id))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Strategy of the delayed recovery pending for an instance, if any
    pub fn scheduled_strategy(&self, instance_id: Uuid) -> Option<RecoveryStrategy> {
        self.scheduled.get(&instance_id).map(|s| s.strategy)
    }

    /// Drop counters, pause reasons, waits and scheduled work; history is kept
    pub fn clear_instance(&self, instance_id: Uuid) {
        if let Some((_, scheduled)) = self.scheduled.remove(&instance_id) {
            scheduled.handle.abort();
        }
        self.retry_counters.retain(|(id, _), _| *id != instance_id);
        self.paused.remove(&instance_id);
        self.waiting.remove(&instance_id);
    }

    /// Forget an instance entirely, including its audit history
    pub fn forget_instance(&self, instance_id: Uuid) {
        self.clear_instance(instance_id);
        self.history.remove(&instance_id);
    }

    pub fn shutdown(&self) {
        let pending = self.scheduled.len();
        for entry in self.scheduled.iter() {
            entry.handle.abort();
        }
        self.scheduled.clear();
        info!(aborted = pending, "🛑 Recovery manager stopped");
    }
}

impl Drop for RecoveryManager {
    fn drop(&mut self) {
        for entry in self.scheduled.iter() {
            entry.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceThreshold;
    use crate::models::{StepType, WorkflowConfig};
    use crate::resources::FixedSampler;
    use crate::state_machine::{
        StepEvent, StepStateMachine, StepStatus, WorkflowEvent, WorkflowStateMachine,
        WorkflowStatus,
    };
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Single-instance control that applies transitions directly
    struct RecordingControl {
        instance: Mutex<WorkflowInstance>,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingControl {
        fn new(config: WorkflowConfig) -> Arc<Self> {
            let mut instance = WorkflowInstance::new("task-1", config, 3);
            instance.status = WorkflowStatus::Running;
            Arc::new(Self {
                instance: Mutex::new(instance),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn fail_step(&self, step_type: StepType, message: &str) -> (WorkflowInstance, WorkflowStep) {
            let mut instance = self.instance.lock();
            let step_id = instance.step_by_type(step_type).unwrap().step_id;
            let step = instance.step_mut(step_id).unwrap();
            if step.status == StepStatus::Pending {
                StepStateMachine::apply(step, StepEvent::Start).unwrap();
            }
            StepStateMachine::apply(step, StepEvent::fail_with_error(message)).unwrap();
            let step = step.clone();
            (instance.clone(), step)
        }

        fn status(&self) -> WorkflowStatus {
            self.instance.lock().status
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl WorkflowControl for RecordingControl {
        fn pause_for_recovery(&self, _instance_id: Uuid, _reason: &str) -> bool {
            self.calls.lock().push("pause".into());
            WorkflowStateMachine::apply(&mut self.instance.lock(), WorkflowEvent::Pause).is_ok()
        }

        fn resume_after_recovery(&self, _instance_id: Uuid) -> bool {
            self.calls.lock().push("resume".into());
            WorkflowStateMachine::apply(&mut self.instance.lock(), WorkflowEvent::Resume).is_ok()
        }

        fn fail_workflow(&self, _instance_id: Uuid, message: &str) -> bool {
            self.calls.lock().push("fail".into());
            WorkflowStateMachine::apply(&mut self.instance.lock(), WorkflowEvent::Fail(message.into()))
                .is_ok()
        }

        fn reset_step(&self, _instance_id: Uuid, step_id: Uuid) -> bool {
            self.calls.lock().push("reset".into());
            let mut instance = self.instance.lock();
            instance
                .step_mut(step_id)
                .is_some_and(|step| StepStateMachine::apply(step, StepEvent::Retry).is_ok())
        }

        fn skip_step(&self, _instance_id: Uuid, step_id: Uuid, reason: &str) -> bool {
            self.calls.lock().push("skip".into());
            let mut instance = self.instance.lock();
            instance.step_mut(step_id).is_some_and(|step| {
                StepStateMachine::apply(step, StepEvent::skip_with_reason(reason)).is_ok()
            })
        }

        fn failed_step(&self, _instance_id: Uuid) -> Option<Uuid> {
            self.instance
                .lock()
                .steps
                .iter()
                .find(|s| s.status == StepStatus::Failed)
                .map(|s| s.step_id)
        }
    }

    fn setup(config: WorkflowConfig) -> (Arc<RecoveryManager>, Arc<RecordingControl>, Arc<FixedSampler>) {
        let control = RecordingControl::new(config);
        let sampler = Arc::new(FixedSampler::idle());
        let monitor = ResourceMonitor::new(ResourceThreshold::for_testing(), sampler.clone());
        monitor.sample();
        let weak: Weak<dyn WorkflowControl> = Arc::downgrade(&control) as Weak<dyn WorkflowControl>;
        let manager = RecoveryManager::new(
            RecoveryConfig::for_testing(),
            monitor,
            EventPublisher::new(64),
            weak,
        );
        (manager, control, sampler)
    }

    #[tokio::test]
    async fn test_connection_refused_schedules_retry() {
        let (manager, control, _) = setup(WorkflowConfig::default());
        let (instance, step) = control.fail_step(StepType::Upload, "Connection refused");

        assert!(manager.handle_failure(&instance, &step, "Connection refused"));
        assert_eq!(control.status(), WorkflowStatus::Paused);
        assert_eq!(manager.retry_count(instance.instance_id, step.step_id), 1);
        assert_eq!(
            manager.scheduled_strategy(instance.instance_id),
            Some(RecoveryStrategy::Retry)
        );

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(control.status(), WorkflowStatus::Running);
        assert_eq!(control.calls(), vec!["pause", "reset", "resume"]);
        let upload = control.instance.lock().step(step.step_id).unwrap().clone();
        assert_eq!(upload.status, StepStatus::Pending);
        assert_eq!(upload.retry_count, 1);
        assert!(manager.scheduled_strategy(instance.instance_id).is_none());
        assert_eq!(manager.history(instance.instance_id).len(), 2);
    }

    #[tokio::test]
    async fn test_retry_cap_pauses_for_intervention() {
        let (manager, control, _) = setup(WorkflowConfig::default());
        let max = manager.config().max_retries;
        let mut last = None;

        for _ in 0..max {
            let (instance, step) = control.fail_step(StepType::Download, "network unreachable");
            assert!(manager.handle_failure(&instance, &step, "network unreachable"));
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert_eq!(control.status(), WorkflowStatus::Running);
            last = Some((instance.instance_id, step.step_id));
        }

        let (instance, step) = control.fail_step(StepType::Download, "network unreachable");
        assert!(manager.handle_failure(&instance, &step, "network unreachable"));
        let (instance_id, step_id) = last.unwrap();
        assert_eq!(manager.retry_count(instance_id, step_id), max);
        assert_eq!(control.status(), WorkflowStatus::Paused);
        assert!(manager.scheduled_strategy(instance_id).is_none());
        assert!(manager.paused_instances()[&instance_id].contains("retry limit"));
        assert_eq!(
            manager.history(instance_id).last().unwrap().strategy,
            RecoveryStrategy::PauseForIntervention
        );
    }

    #[tokio::test]
    async fn test_duplicate_failure_keeps_single_retry() {
        let (manager, control, _) = setup(WorkflowConfig::default());
        let (instance, step) = control.fail_step(StepType::Clip, "socket closed");

        assert!(manager.handle_failure(&instance, &step, "socket closed"));
        assert!(manager.handle_failure(&instance, &step, "socket closed"));
        assert_eq!(manager.retry_count(instance.instance_id, step.step_id), 1);
        assert_eq!(control.calls(), vec!["pause"]);
    }

    #[tokio::test]
    async fn test_resource_wait_resumes_when_available() {
        let (manager, control, sampler) = setup(WorkflowConfig::default());
        sampler.set_uniform_usage(97.0);
        manager.monitor.sample();
        let (instance, step) = control.fail_step(StepType::Merge, "No space left on device (os error 28)");

        assert!(manager.handle_failure(&instance, &step, "No space left on device (os error 28)"));
        assert_eq!(control.status(), WorkflowStatus::Paused);
        assert_eq!(
            manager.waiting_instances().get(&instance.instance_id).map(String::as_str),
            Some("disk_space")
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(control.status(), WorkflowStatus::Paused);

        sampler.set_uniform_usage(10.0);
        manager.monitor.sample();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(control.status(), WorkflowStatus::Running);
        assert!(manager.waiting_instances().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_segment_failure_is_skipped() {
        let (manager, control, _) = setup(WorkflowConfig::segmented(133));
        let (instance, step) = control.fail_step(StepType::Segment, "output file not found");

        assert!(manager.handle_failure(&instance, &step, "output file not found"));
        assert_eq!(control.status(), WorkflowStatus::Running);
        assert_eq!(
            control.instance.lock().step_status(StepType::Segment),
            Some(StepStatus::Skipped)
        );
    }

    #[tokio::test]
    async fn test_failure_under_pause_is_recorded_and_deferred() {
        let (manager, control, _) = setup(WorkflowConfig::segmented(133));
        control.instance.lock().status = WorkflowStatus::Paused;

        let (instance, step) = control.fail_step(StepType::Download, "I/O error: broken pipe");
        assert!(manager.handle_failure(&instance, &step, "I/O error: broken pipe"));
        assert_eq!(manager.retry_count(instance.instance_id, step.step_id), 1);
        assert!(manager.scheduled_strategy(instance.instance_id).is_none());
        let record = manager.history(instance.instance_id).pop().unwrap();
        assert_eq!(record.strategy, RecoveryStrategy::Retry);
        assert!(record.reason.unwrap().contains("deferred until resume"));

        let (instance, step) = control.fail_step(StepType::Segment, "segmenter crashed");
        assert!(manager.handle_failure(&instance, &step, "segmenter crashed"));
        assert_eq!(
            control.instance.lock().step_status(StepType::Segment),
            Some(StepStatus::Skipped)
        );

        // Neither failure touched the workflow status
        assert_eq!(control.calls(), vec!["skip"]);
        assert_eq!(control.status(), WorkflowStatus::Paused);
    }

    #[tokio::test]
    async fn test_fatal_failure_marks_workflow_failed() {
        let (manager, control, _) = setup(WorkflowConfig::default());
        let (instance, step) = control.fail_step(StepType::Upload, "access denied");

        assert!(manager.handle_failure(&instance, &step, "access denied"));
        assert_eq!(control.status(), WorkflowStatus::Failed);
        let record = manager.history(instance.instance_id).pop().unwrap();
        assert_eq!(record.strategy, RecoveryStrategy::MarkAsFailed);
        assert_eq!(record.error_type, Some(ErrorType::Fatal));
    }

    #[tokio::test]
    async fn test_manual_recover_clears_state_and_resumes() {
        let (manager, control, _) = setup(WorkflowConfig::default());
        let (instance, step) = control.fail_step(StepType::Clip, "invalid parameter: start time");

        assert!(manager.handle_failure(&instance, &step, "invalid parameter: start time"));
        assert_eq!(control.status(), WorkflowStatus::Paused);
        assert!(manager.paused_instances().contains_key(&instance.instance_id));

        assert!(manager.manual_recover(instance.instance_id, None));
        assert_eq!(control.status(), WorkflowStatus::Running);
        assert!(manager.paused_instances().is_empty());
        assert_eq!(
            control.instance.lock().step_status(StepType::Clip),
            Some(StepStatus::Pending)
        );
        let record = manager.history(instance.instance_id).pop().unwrap();
        assert_eq!(record.message, "manual recovery");
        assert!(record.successful);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let (manager, _control, _) = setup(WorkflowConfig::default());
        let instance_id = Uuid::new_v4();
        for i in 0..(manager.config().history_limit + 5) {
            manager.record(RecoveryRecord::new(
                instance_id,
                None,
                None,
                RecoveryStrategy::Retry,
                format!("attempt {i}"),
                true,
            ));
        }
        let history = manager.history(instance_id);
        assert_eq!(history.len(), manager.config().history_limit);
        assert_eq!(history[0].message, "attempt 5");
    }
}
