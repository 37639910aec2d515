//! # Orchestration Engine
//!
//! Admission-controlled execution of multi-step media workflows.
//!
//! ## Architecture
//!
//! The orchestration core is split along the seams where decisions are made:
//! - **WorkflowEngine**: registry of instances, admission and lifecycle control
//! - **TaskOrchestrator**: runs one instance's steps in order through the
//!   [`ProcessingContract`]
//! - **LoadBalancer**: admission checks, resource grants and rebalancing
//! - **RecoveryManager**: classifies step failures and retries, waits, pauses,
//!   skips or fails accordingly
//! - **StateManager**: applies state machine transitions and emits their
//!   notifications and store writes
//!
//! ## Core Flow
//!
//! ```text
//! queue ─▶ WorkflowEngine::start ─▶ LoadBalancer::allocate
//!                 │
//!                 ▼
//!          TaskOrchestrator ─▶ ProcessingContract
//!                 │ step failed
//!                 ▼
//!          RecoveryManager ─▶ WorkflowControl (engine)
//! ```

pub mod error_classifier;
pub mod load_balancer;
pub mod processing;
pub mod recovery;
pub mod state_manager;
pub mod task_orchestrator;
pub mod workflow_engine;

pub use error_classifier::{resource_type_for, ErrorClassifier, KeywordErrorClassifier};
pub use load_balancer::{LoadBalancer, LoadBalancerStats, RebalanceResult};
pub use processing::{ProcessingContract, ProcessingResult};
pub use recovery::{RecoveryManager, WorkflowControl};
pub use state_manager::StateManager;
pub use task_orchestrator::{SharedInstance, TaskOrchestrator};
pub use workflow_engine::{EngineStats, WorkflowEngine};
