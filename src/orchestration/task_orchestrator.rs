//! # Task Orchestrator
//!
//! Drives the steps of one workflow instance, strictly in order.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  lock   ┌──────────────────┐  no lock  ┌─────────────────────┐
//! │ orchestrate  │────────▶│ pick current step │─────────▶│ ProcessingContract  │
//! └──────────────┘         │ gate / start      │          │ prerequisites,      │
//!        ▲                 └──────────────────┘          │ execute, validate   │
//!        │                          │                     └─────────────────────┘
//!        └──────── record outcome ◀─┘ (lock)
//! ```
//!
//! ## Key Responsibilities
//!
//! - **Gating**: each step type has a precondition over the instance's
//!   configuration and earlier steps; a step whose gate fails is skipped with
//!   a reason and iteration continues.
//! - **Execution**: the step is marked running and delegated to the
//!   processing contract. The instance lock is released for every await.
//! - **Checkpoints**: pause and cancellation are observed at the top of each
//!   iteration and before a step starts. In-flight processing is not
//!   interrupted.
//! - **Failure hand-off**: a failed step surfaces as
//!   [`FlowError::StepFailed`] so the engine can route it to recovery.
//!
//! Completing the workflow itself is the engine's job; `orchestrate` returns
//! `Ok(())` once no step is left to run.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::processing::ProcessingContract;
use super::state_manager::StateManager;
use crate::error::{FlowError, Result};
use crate::logging::log_step_operation;
use crate::models::{StepType, WorkflowInstance, WorkflowStep};
use crate::state_machine::{StepEvent, StepStatus, WorkflowEvent, WorkflowStatus};

/// Registry entry shared between the engine, its run task and recovery
pub type SharedInstance = Arc<Mutex<WorkflowInstance>>;

/// Step about to be handed to the processing contract
struct ReadyStep {
    step_id: Uuid,
    step_type: StepType,
    snapshot: WorkflowInstance,
}

enum NextStep {
    Ready(ReadyStep),
    /// A gate skipped the step; look again
    Skipped,
    Done,
}

pub struct TaskOrchestrator {
    processor: Arc<dyn ProcessingContract>,
    state: StateManager,
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator").finish_non_exhaustive()
    }
}

impl TaskOrchestrator {
    pub fn new(processor: Arc<dyn ProcessingContract>, state: StateManager) -> Self {
        Self { processor, state }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Whether `step` may run right now
    pub fn can_execute(instance: &WorkflowInstance, step: &WorkflowStep) -> bool {
        instance.status == WorkflowStatus::Running
            && step.status == StepStatus::Pending
            && Self::gating_reason(instance, step).is_none()
    }

    /// Type-specific precondition; `Some(reason)` means the step must be skipped
    pub fn gating_reason(instance: &WorkflowInstance, step: &WorkflowStep) -> Option<String> {
        let config = &instance.config;
        let completed = |step_type: StepType| {
            instance.step_status(step_type) == Some(StepStatus::Completed)
        };

        match step.step_type {
            StepType::Download => None,
            StepType::Clip => (!config.enable_clipping).then(|| "clipping is disabled".to_string()),
            StepType::Merge => {
                if !config.enable_merging {
                    Some("merging is disabled".to_string())
                } else if config.enable_clipping && !completed(StepType::Clip) {
                    Some("clip step has not completed".to_string())
                } else {
                    None
                }
            }
            StepType::Segment => {
                if config.enable_direct_submission {
                    Some("direct submission is enabled".to_string())
                } else if !config.segmentation.enabled {
                    Some("segmentation is disabled".to_string())
                } else if config.enable_merging && !completed(StepType::Merge) {
                    Some("merge step has not completed".to_string())
                } else {
                    None
                }
            }
            StepType::Upload => instance
                .steps
                .iter()
                .filter(|other| other.order_index < step.order_index)
                .find(|other| !other.status.satisfies_dependencies())
                .map(|blocking| {
                    format!(
                        "{} step is {} before upload",
                        blocking.step_type, blocking.status
                    )
                }),
        }
    }

    /// Run the instance's remaining steps in order.
    ///
    /// Returns `Ok(())` when the instance is paused, cancelled, terminal, or
    /// has no step left to run, and `Err(FlowError::StepFailed)` whenever a
    /// step it executed fails, including one that was in flight when the
    /// workflow was paused or cancelled.
    pub async fn orchestrate(&self, shared: &SharedInstance) -> Result<()> {
        {
            let mut instance = shared.lock();
            if instance.status == WorkflowStatus::Pending {
                self.state
                    .transition_workflow(&mut instance, WorkflowEvent::Start)?;
                info!(
                    instance_id = %instance.instance_id,
                    task_id = %instance.task_id,
                    steps = instance.steps.len(),
                    "▶️ Workflow started"
                );
            }
        }

        loop {
            let ready = match self.next_step(shared)? {
                NextStep::Ready(ready) => ready,
                NextStep::Skipped => continue,
                NextStep::Done => return Ok(()),
            };

            if !self
                .processor
                .check_prerequisites(&ready.snapshot, ready.step_type)
                .await
            {
                let mut instance = shared.lock();
                if Self::still_startable(&instance, ready.step_id) {
                    self.state.transition_step(
                        &mut instance,
                        ready.step_id,
                        StepEvent::skip_with_reason("prerequisites not met"),
                    )?;
                    info!(
                        instance_id = %instance.instance_id,
                        step_type = %ready.step_type,
                        "⏭️ Step skipped: prerequisites not met"
                    );
                }
                continue;
            }

            let running = {
                let mut instance = shared.lock();
                if !Self::still_startable(&instance, ready.step_id) {
                    continue;
                }
                self.state
                    .transition_step(&mut instance, ready.step_id, StepEvent::Start)?;
                instance.clone()
            };

            info!(
                instance_id = %running.instance_id,
                task_id = %running.task_id,
                step_type = %ready.step_type,
                "🚀 Executing step"
            );

            let result = self.processor.execute(&running, ready.step_type).await;
            let outcome = if !result.success {
                Err(result.failure_message(ready.step_type))
            } else if !self.processor.validate(&result, ready.step_type).await {
                Err(format!("{} step output failed validation", ready.step_type))
            } else {
                Ok(result.output_ref())
            };

            match outcome {
                Ok(output_ref) => {
                    let completed = {
                        let mut instance = shared.lock();
                        self.state.transition_step(
                            &mut instance,
                            ready.step_id,
                            StepEvent::Complete(output_ref),
                        )?;
                        self.state.persist_instance(&instance);
                        instance.clone()
                    };
                    log_step_operation(
                        "complete",
                        completed.instance_id,
                        ready.step_id,
                        &ready.step_type.to_string(),
                        "completed",
                        Some(&format!("progress {:.2}", completed.progress)),
                    );
                    self.processor.cleanup(&completed, ready.step_type).await;
                }
                Err(message) => {
                    let mut instance = shared.lock();
                    self.state.transition_step(
                        &mut instance,
                        ready.step_id,
                        StepEvent::fail_with_error(message.clone()),
                    )?;
                    self.state.persist_instance(&instance);
                    warn!(
                        instance_id = %instance.instance_id,
                        task_id = %instance.task_id,
                        step_type = %ready.step_type,
                        error = %message,
                        "❌ Step failed"
                    );

                    return Err(FlowError::StepFailed {
                        step_id: ready.step_id,
                        step_type: ready.step_type,
                        message,
                    });
                }
            }
        }
    }

    /// Pick the current step under the lock, applying gates and checkpoints
    fn next_step(&self, shared: &SharedInstance) -> Result<NextStep> {
        let mut instance = shared.lock();
        if instance.status != WorkflowStatus::Running {
            debug!(
                instance_id = %instance.instance_id,
                status = %instance.status,
                "Orchestration checkpoint: workflow not running"
            );
            return Ok(NextStep::Done);
        }

        let Some(step) = instance.current_step().cloned() else {
            return Ok(NextStep::Done);
        };

        match step.status {
            StepStatus::Failed => {
                return Err(FlowError::StepFailed {
                    step_id: step.step_id,
                    step_type: step.step_type,
                    message: step.error_message.clone().unwrap_or_default(),
                })
            }
            StepStatus::Running => {
                debug!(
                    instance_id = %instance.instance_id,
                    step_type = %step.step_type,
                    "Step already running elsewhere"
                );
                return Ok(NextStep::Done);
            }
            StepStatus::Pending | StepStatus::Completed | StepStatus::Skipped => {}
        }

        if let Some(reason) = Self::gating_reason(&instance, &step) {
            info!(
                instance_id = %instance.instance_id,
                step_type = %step.step_type,
                reason = %reason,
                "⏭️ Step skipped by gate"
            );
            self.state
                .transition_step(&mut instance, step.step_id, StepEvent::Skip(reason))?;
            return Ok(NextStep::Skipped);
        }

        Ok(NextStep::Ready(ReadyStep {
            step_id: step.step_id,
            step_type: step.step_type,
            snapshot: instance.clone(),
        }))
    }

    fn still_startable(instance: &WorkflowInstance, step_id: Uuid) -> bool {
        instance.status == WorkflowStatus::Running
            && instance.step(step_id).map(|s| s.status) == Some(StepStatus::Pending)
    }
}
