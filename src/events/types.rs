//! Typed payloads carried in [`super::PublishedEvent::context`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ErrorType, RecoveryStrategy, ResourceSnapshot, StepType, WorkflowInstance};
use crate::state_machine::{StepStatus, WorkflowStatus};

/// `workflow.status_changed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusChanged {
    pub instance_id: Uuid,
    pub task_id: String,
    pub old_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
    pub current_step: Option<StepType>,
    pub progress: f64,
}

impl WorkflowStatusChanged {
    pub fn from_instance(instance: &WorkflowInstance, old_status: WorkflowStatus) -> Self {
        Self {
            instance_id: instance.instance_id,
            task_id: instance.task_id.clone(),
            old_status,
            new_status: instance.status,
            current_step: instance.current_step().map(|step| step.step_type),
            progress: instance.progress,
        }
    }
}

/// `workflow.step_changed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatusChanged {
    pub instance_id: Uuid,
    pub step_id: Uuid,
    pub step_type: StepType,
    pub old_status: StepStatus,
    pub new_status: StepStatus,
    pub error_message: Option<String>,
}

/// `workflow.recovery_attempted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempted {
    pub instance_id: Uuid,
    pub step_id: Option<Uuid>,
    pub error_type: Option<ErrorType>,
    pub strategy: RecoveryStrategy,
    pub successful: bool,
    pub message: String,
}

/// `resource.high_load` / `resource.load_recovered`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLoadChanged {
    pub high_load: bool,
    pub pressure_score: f64,
    pub captured_at: DateTime<Utc>,
}

impl ResourceLoadChanged {
    pub fn from_snapshot(snapshot: &ResourceSnapshot, high_load: bool) -> Self {
        Self {
            high_load,
            pressure_score: snapshot.pressure_score(),
            captured_at: snapshot.captured_at,
        }
    }
}
