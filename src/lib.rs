#![allow(clippy::doc_markdown)] // Allow technical terms like FFmpeg, SQLite in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Mediaflow Core
//!
//! Resource-aware orchestration of multi-step media processing workflows.
//!
//! ## Overview
//!
//! A media task (download a source, cut clips, merge them, optionally split
//! the result into segments, upload) runs as a **workflow instance**: an
//! ordered plan of steps executed one at a time through a pluggable
//! [`ProcessingContract`]. Around that core sit the pieces that keep a busy
//! host healthy:
//!
//! - admission control that starts work only while CPU, memory and disk
//!   leave headroom, and sizes each workflow's resource grant to the
//!   current pressure
//! - failure recovery that classifies step errors and retries, waits for
//!   resources, pauses for intervention, skips or fails
//! - a persistent FIFO queue feeding the engine one task at a time
//!
//! ## Module Organization
//!
//! - [`models`] - Workflow, step, allocation, recovery and queue records
//! - [`state_machine`] - Workflow and step statuses and their transitions
//! - [`resources`] - Sampling, thresholds and load-change notification
//! - [`orchestration`] - Engine, orchestrator, load balancer and recovery
//! - [`queue`] - Persistent queue, journal and consumer loop
//! - [`events`] - Notifications published on status and load changes
//! - [`store`] - Durable-state seam for instances and steps
//! - [`config`] - Layered YAML configuration with environment overrides
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and operation helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mediaflow_core::config::ConfigManager;
//! use mediaflow_core::events::EventPublisher;
//! use mediaflow_core::models::WorkflowConfig;
//! use mediaflow_core::orchestration::{LoadBalancer, ProcessingContract, WorkflowEngine};
//! use mediaflow_core::resources::{ResourceMonitor, SysinfoSampler};
//! use mediaflow_core::store::InMemoryTaskStore;
//!
//! # async fn example(processor: Arc<dyn ProcessingContract>) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config().clone();
//!
//! let monitor = ResourceMonitor::new(config.resources.clone(), Arc::new(SysinfoSampler::new()));
//! monitor.start();
//! let load_balancer = LoadBalancer::new(&config.load_balancer, monitor.clone());
//!
//! let engine = WorkflowEngine::new(
//!     config,
//!     monitor,
//!     load_balancer,
//!     processor,
//!     Arc::new(InMemoryTaskStore::default()),
//!     EventPublisher::default(),
//! );
//! engine.start_background_tasks();
//!
//! let instance = engine.start("task-42", WorkflowConfig::default())?;
//! println!("started workflow {}", instance.instance_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod queue;
pub mod resources;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, MediaflowConfig, ResourceThreshold};
pub use error::{FlowError, Result, StartRejection};
pub use events::EventPublisher;
pub use models::{
    QueuedTask, ResourceAllocation, StepType, TaskPriority, WorkflowConfig, WorkflowInstance,
    WorkflowStep,
};
pub use orchestration::{LoadBalancer, ProcessingContract, RecoveryManager, WorkflowEngine};
pub use queue::{PersistentQueue, QueueConsumer};
pub use resources::ResourceMonitor;
pub use state_machine::{StepStatus, WorkflowStatus};
pub use store::{InMemoryTaskStore, TaskStore};
