//! Error types for the orchestration core.
//!

use thiserror::Error;
use uuid::Uuid;

use crate::models::StepType;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("State transition error: {0}")]
    StateTransition(String),
    #[error("Workflow start rejected: {0}")]
    Rejected(StartRejection),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Step {step_type} ({step_id}) failed: {message}")]
    StepFailed {
        step_id: Uuid,
        step_type: StepType,
        message: String,
    },
    #[error("Queue error: {0}")]
    Queue(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Event error: {0}")]
    Event(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Synchronous admission rejection returned by `WorkflowEngine::start`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartRejection {
    #[error("invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
    #[error("new workflow intake is paused")]
    IntakePaused,
    #[error("insufficient system resources")]
    ResourcesUnavailable,
    #[error("task {task_id} already has an active workflow instance {instance_id}")]
    DuplicateTask { task_id: String, instance_id: Uuid },
    #[error("resource allocation denied")]
    AllocationDenied,
}

impl From<StartRejection> for FlowError {
    fn from(rejection: StartRejection) -> Self {
        FlowError::Rejected(rejection)
    }
}

impl From<crate::state_machine::StateMachineError> for FlowError {
    fn from(error: crate::state_machine::StateMachineError) -> Self {
        FlowError::StateTransition(error.to_string())
    }
}

impl From<crate::config::ConfigurationError> for FlowError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        FlowError::Configuration(error.to_string())
    }
}

impl From<crate::events::PublishError> for FlowError {
    fn from(error: crate::events::PublishError) -> Self {
        FlowError::Event(error.to_string())
    }
}

impl From<crate::queue::QueueError> for FlowError {
    fn from(error: crate::queue::QueueError) -> Self {
        FlowError::Queue(error.to_string())
    }
}

impl From<crate::store::StoreError> for FlowError {
    fn from(error: crate::store::StoreError) -> Self {
        FlowError::Store(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
