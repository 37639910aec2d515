//! # Mediaflow Configuration System
//!
//! YAML-based configuration with per-environment overrides and `MEDIAFLOW__`
//! environment variable layering.
//!
//! ## Architecture
//!
//! - **Single Source of Truth**: All tunables live in `mediaflow-config.yaml`
//! - **Environment Awareness**: `development` / `test` / `production` sections override the base
//! - **Explicit Validation**: Invalid thresholds are rejected at load time
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mediaflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let max = manager.config().resources.max_concurrency;
//! let poll = manager.config().queue.poll_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;
pub mod resource_threshold;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::system::DEFAULT_QUEUE_ID;
use crate::models::{LoadBalancingStrategy, StepType};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;
pub use resource_threshold::ResourceThreshold;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MediaflowConfig {
    pub environment: String,
    pub resources: ResourceThreshold,
    pub load_balancer: LoadBalancerConfig,
    pub engine: EngineConfig,
    pub recovery: RecoveryConfig,
    pub queue: QueueConfig,
    pub events: EventConfig,
}

impl MediaflowConfig {
    pub fn for_testing() -> Self {
        Self {
            environment: "test".to_string(),
            resources: ResourceThreshold::for_testing(),
            load_balancer: LoadBalancerConfig::for_testing(),
            engine: EngineConfig::for_testing(),
            recovery: RecoveryConfig::for_testing(),
            queue: QueueConfig::for_testing(),
            events: EventConfig::default(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.resources.validate()?;
        self.load_balancer.validate()?;
        self.recovery.validate()?;
        self.queue.validate()?;
        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                0,
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalancingStrategy,
    pub rebalance_interval_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::Adaptive,
            rebalance_interval_ms: 120_000,
        }
    }
}

impl LoadBalancerConfig {
    pub fn for_testing() -> Self {
        Self {
            rebalance_interval_ms: 50,
            ..Self::default()
        }
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.rebalance_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "load_balancer.rebalance_interval_ms",
                0,
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rebalance_enabled: bool,
    /// Terminal instances older than this are dropped by periodic cleanup
    pub retention_hours: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rebalance_enabled: true,
            retention_hours: 24,
        }
    }
}

impl EngineConfig {
    pub fn for_testing() -> Self {
        Self {
            rebalance_enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub resource_poll_interval_ms: u64,
    /// Per-instance audit entries kept; oldest are dropped first
    pub history_limit: usize,
    pub skippable_steps: Vec<StepType>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 30_000,
            resource_poll_interval_ms: 60_000,
            history_limit: 100,
            skippable_steps: StepType::ALL
                .into_iter()
                .filter(StepType::is_skippable_by_default)
                .collect(),
        }
    }
}

impl RecoveryConfig {
    pub fn for_testing() -> Self {
        Self {
            retry_delay_ms: 20,
            resource_poll_interval_ms: 20,
            ..Self::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn resource_poll_interval(&self) -> Duration {
        Duration::from_millis(self.resource_poll_interval_ms)
    }

    pub fn is_skippable(&self, step_type: StepType) -> bool {
        self.skippable_steps.contains(&step_type)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.resource_poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "recovery.resource_poll_interval_ms",
                0,
                "must be greater than 0",
            ));
        }
        if self.history_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "recovery.history_limit",
                0,
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub default_queue_id: String,
    pub poll_interval_ms: u64,
    pub paused_poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    /// Minimum gap between the end of one task and the start of the next
    pub min_task_interval_ms: u64,
    pub max_retry: u32,
    pub priority_ordering: bool,
    /// SQLite URL for the durable journal; in-memory only when absent
    pub journal_url: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_queue_id: DEFAULT_QUEUE_ID.to_string(),
            poll_interval_ms: 2_000,
            paused_poll_interval_ms: 1_000,
            error_backoff_ms: 5_000,
            min_task_interval_ms: 5_000,
            max_retry: 3,
            priority_ordering: true,
            journal_url: None,
        }
    }
}

impl QueueConfig {
    pub fn for_testing() -> Self {
        Self {
            poll_interval_ms: 10,
            paused_poll_interval_ms: 10,
            error_backoff_ms: 10,
            min_task_interval_ms: 10,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn paused_poll_interval(&self) -> Duration {
        Duration::from_millis(self.paused_poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn min_task_interval(&self) -> Duration {
        Duration::from_millis(self.min_task_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.default_queue_id.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "queue.default_queue_id",
                "",
                "must not be empty",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.poll_interval_ms",
                0,
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}
