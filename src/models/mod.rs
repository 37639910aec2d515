//! # Data Models
//!
//! Plain data carried between the engine, orchestrator, admission controller,
//! recovery manager and queue. State transitions are applied through
//! [`crate::state_machine`]; these types only hold data and derived queries.

pub mod priority;
pub mod queued_task;
pub mod recovery;
pub mod resource;
pub mod step;
pub mod workflow_config;
pub mod workflow_instance;

pub use priority::TaskPriority;
pub use queued_task::{QueueTaskStatus, QueuedTask};
pub use recovery::{ErrorType, RecoveryRecord, RecoveryStrategy};
pub use resource::{
    AllocationStatus, AllocationTier, LoadBalancingStrategy, ResourceAllocation, ResourceSnapshot,
};
pub use step::{StepType, WorkflowStep};
pub use workflow_config::{SegmentationConfig, WorkflowConfig};
pub use workflow_instance::WorkflowInstance;
