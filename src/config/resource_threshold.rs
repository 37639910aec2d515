//! Resource thresholds driving admission, high-load detection and concurrency sizing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{ConfigResult, ConfigurationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThreshold {
    /// Availability thresholds: usage must stay below these to admit work
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    pub disk_threshold_percent: f64,
    pub thread_threshold_percent: f64,

    /// High-load thresholds: any usage above these raises the high-load signal
    pub high_load_cpu_percent: f64,
    pub high_load_memory_percent: f64,
    pub high_load_disk_percent: f64,
    pub high_load_thread_percent: f64,

    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub default_concurrency: usize,

    /// Sampling interval; millisecond resolution so tests can run fast loops
    pub monitoring_interval_ms: u64,
    pub history_retention_minutes: u64,
}

impl Default for ResourceThreshold {
    fn default() -> Self {
        Self {
            cpu_threshold_percent: 80.0,
            memory_threshold_percent: 85.0,
            disk_threshold_percent: 90.0,
            thread_threshold_percent: 80.0,
            high_load_cpu_percent: 90.0,
            high_load_memory_percent: 95.0,
            high_load_disk_percent: 95.0,
            high_load_thread_percent: 90.0,
            min_concurrency: 1,
            max_concurrency: 10,
            default_concurrency: 3,
            monitoring_interval_ms: 30_000,
            history_retention_minutes: 60,
        }
    }
}

impl ResourceThreshold {
    /// Lower thresholds and narrower concurrency for shared hosts
    pub fn conservative() -> Self {
        Self {
            cpu_threshold_percent: 70.0,
            memory_threshold_percent: 75.0,
            disk_threshold_percent: 85.0,
            thread_threshold_percent: 70.0,
            high_load_cpu_percent: 80.0,
            high_load_memory_percent: 85.0,
            high_load_disk_percent: 90.0,
            high_load_thread_percent: 80.0,
            min_concurrency: 1,
            max_concurrency: 5,
            default_concurrency: 2,
            monitoring_interval_ms: 15_000,
            history_retention_minutes: 120,
        }
    }

    /// Higher thresholds and wider concurrency for dedicated hosts
    pub fn aggressive() -> Self {
        Self {
            cpu_threshold_percent: 90.0,
            memory_threshold_percent: 90.0,
            disk_threshold_percent: 95.0,
            thread_threshold_percent: 90.0,
            high_load_cpu_percent: 95.0,
            high_load_memory_percent: 98.0,
            high_load_disk_percent: 98.0,
            high_load_thread_percent: 95.0,
            min_concurrency: 2,
            max_concurrency: 20,
            default_concurrency: 5,
            monitoring_interval_ms: 60_000,
            history_retention_minutes: 30,
        }
    }

    pub fn for_testing() -> Self {
        Self {
            monitoring_interval_ms: 20,
            history_retention_minutes: 1,
            ..Self::default()
        }
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn history_retention(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.history_retention_minutes as i64)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let percentages = [
            ("cpu_threshold_percent", self.cpu_threshold_percent),
            ("memory_threshold_percent", self.memory_threshold_percent),
            ("disk_threshold_percent", self.disk_threshold_percent),
            ("thread_threshold_percent", self.thread_threshold_percent),
            ("high_load_cpu_percent", self.high_load_cpu_percent),
            ("high_load_memory_percent", self.high_load_memory_percent),
            ("high_load_disk_percent", self.high_load_disk_percent),
            ("high_load_thread_percent", self.high_load_thread_percent),
        ];
        for (field, value) in percentages {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "percentages must be within 0..=100",
                ));
            }
        }

        let pairs = [
            ("high_load_cpu_percent", self.high_load_cpu_percent, self.cpu_threshold_percent),
            (
                "high_load_memory_percent",
                self.high_load_memory_percent,
                self.memory_threshold_percent,
            ),
            ("high_load_disk_percent", self.high_load_disk_percent, self.disk_threshold_percent),
            (
                "high_load_thread_percent",
                self.high_load_thread_percent,
                self.thread_threshold_percent,
            ),
        ];
        for (field, high, available) in pairs {
            if high < available {
                return Err(ConfigurationError::invalid_value(
                    field,
                    high,
                    format!("must not be below the availability threshold {available}"),
                ));
            }
        }

        if self.min_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "min_concurrency",
                self.min_concurrency,
                "must be greater than 0",
            ));
        }
        if self.max_concurrency < self.min_concurrency {
            return Err(ConfigurationError::invalid_value(
                "max_concurrency",
                self.max_concurrency,
                format!("must be >= min_concurrency {}", self.min_concurrency),
            ));
        }
        if !(self.min_concurrency..=self.max_concurrency).contains(&self.default_concurrency) {
            return Err(ConfigurationError::invalid_value(
                "default_concurrency",
                self.default_concurrency,
                format!(
                    "must lie within {}..={}",
                    self.min_concurrency, self.max_concurrency
                ),
            ));
        }
        if self.monitoring_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "monitoring_interval_ms",
                0,
                "must be greater than 0",
            ));
        }
        if self.history_retention_minutes == 0 {
            return Err(ConfigurationError::invalid_value(
                "history_retention_minutes",
                0,
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Concurrency recommendation for a 0-100 pressure score
    pub fn recommended_concurrency(&self, pressure: f64) -> usize {
        use crate::constants::pressure::{ELEVATED, HIGH, LOW};
        if pressure < LOW {
            self.max_concurrency
        } else if pressure < ELEVATED {
            self.default_concurrency
        } else if pressure < HIGH {
            (self.default_concurrency / 2).max(self.min_concurrency)
        } else {
            self.min_concurrency
        }
    }
}
