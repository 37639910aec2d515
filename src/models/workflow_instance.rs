//! # Workflow Instance Model
//!
//! One run of a multi-step job for an external task id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::{StepType, WorkflowStep};
use super::workflow_config::WorkflowConfig;
use crate::state_machine::{StepStatus, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: Uuid,
    pub task_id: String,
    pub workflow_type: String,
    pub steps: Vec<WorkflowStep>,
    pub config: WorkflowConfig,
    pub status: WorkflowStatus,
    /// 0.0 - 1.0
    pub progress: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Resource grant held while the instance is active
    pub allocation_id: Option<Uuid>,
}

impl WorkflowInstance {
    /// Build an instance and its full step plan from a configuration snapshot
    pub fn new(task_id: impl Into<String>, config: WorkflowConfig, max_retries: u32) -> Self {
        let steps = config
            .step_definitions()
            .into_iter()
            .enumerate()
            .map(|(index, step_type)| WorkflowStep::new(step_type, index, max_retries))
            .collect();

        Self {
            instance_id: Uuid::new_v4(),
            task_id: task_id.into(),
            workflow_type: config.workflow_type.clone(),
            steps,
            config,
            status: WorkflowStatus::Pending,
            progress: 0.0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            allocation_id: None,
        }
    }

    /// First step that has not reached a terminal state
    pub fn current_step(&self) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| !s.status.is_terminal())
    }

    pub fn step(&self, step_id: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: Uuid) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn step_by_type(&self, step_type: StepType) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_type == step_type)
    }

    pub fn step_status(&self, step_type: StepType) -> Option<StepStatus> {
        self.step_by_type(step_type).map(|s| s.status)
    }

    pub fn has_step(&self, step_type: StepType) -> bool {
        self.step_by_type(step_type).is_some()
    }

    pub fn recalculate_progress(&mut self) {
        if self.steps.is_empty() {
            self.progress = 0.0;
            return;
        }
        let done = self
            .steps
            .iter()
            .filter(|s| s.status.satisfies_dependencies())
            .count();
        self.progress = done as f64 / self.steps.len() as f64;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal instances that finished before `now - max_age`
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.is_terminal()
            && self
                .completed_at
                .is_some_and(|completed| completed < now - max_age)
    }

    pub fn execution_duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - start)
    }
}
