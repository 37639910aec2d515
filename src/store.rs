//! # Task Store
//!
//! Durable-state seam for workflow instances and their steps. The engine
//! writes through a [`TaskStore`] on every status change; writes are
//! best-effort and never block or fail orchestration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::WorkflowInstance;
use crate::state_machine::{StepStatus, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Last known status of an external task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusRecord {
    pub task_id: String,
    pub status: WorkflowStatus,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_instance(&self, instance: &WorkflowInstance) -> StoreResult<()>;

    async fn load_instance(&self, instance_id: Uuid) -> StoreResult<Option<WorkflowInstance>>;

    async fn update_task_status(
        &self,
        task_id: &str,
        status: WorkflowStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()>;

    async fn update_step_status(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        status: StepStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()>;
}

/// DashMap-backed store for tests and single-process embedding
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    instances: DashMap<Uuid, WorkflowInstance>,
    task_status: DashMap<String, TaskStatusRecord>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatusRecord> {
        self.task_status.get(task_id).map(|record| record.clone())
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save_instance(&self, instance: &WorkflowInstance) -> StoreResult<()> {
        self.instances.insert(instance.instance_id, instance.clone());
        Ok(())
    }

    async fn load_instance(&self, instance_id: Uuid) -> StoreResult<Option<WorkflowInstance>> {
        Ok(self
            .instances
            .get(&instance_id)
            .map(|instance| instance.clone()))
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: WorkflowStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        self.task_status.insert(
            task_id.to_string(),
            TaskStatusRecord {
                task_id: task_id.to_string(),
                status,
                error_message: error_message.map(str::to_string),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update_step_status(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        status: StepStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let mut instance = self
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;
        let step = instance
            .step_mut(step_id)
            .ok_or_else(|| StoreError::NotFound(format!("step {step_id}")))?;
        step.status = status;
        step.error_message = error_message.map(str::to_string);
        Ok(())
    }
}
