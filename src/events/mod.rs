//! # Lifecycle Events
//!
//! Best-effort broadcast of workflow, step and resource lifecycle changes for
//! external consumers (status sync, dashboards). Events are not transactionally
//! coupled to state transitions: a lagging or absent subscriber never blocks
//! or fails the engine.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, PublishError, PublishedEvent};
pub use types::{RecoveryAttempted, ResourceLoadChanged, StepStatusChanged, WorkflowStatusChanged};
