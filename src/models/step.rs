//! # Workflow Step Model
//!
//! One ordered unit of work inside a workflow instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::constants::system::OUTPUT_REF_SEPARATOR;
use crate::state_machine::StepStatus;

/// Fixed enumeration of step kinds
///
/// Every match over this enum is exhaustive, so adding a kind forces gating,
/// execution routing, and cleanup sites to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Download,
    Clip,
    Merge,
    Segment,
    Upload,
}

impl StepType {
    pub const ALL: [StepType; 5] = [
        StepType::Download,
        StepType::Clip,
        StepType::Merge,
        StepType::Segment,
        StepType::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Clip => "clip",
            Self::Merge => "merge",
            Self::Segment => "segment",
            Self::Upload => "upload",
        }
    }

    /// Whether a fatal failure of this step may be skipped instead of failing the workflow
    pub fn is_skippable_by_default(&self) -> bool {
        match self {
            Self::Segment => true,
            Self::Download | Self::Clip | Self::Merge | Self::Upload => false,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid step type: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: Uuid,
    pub step_type: StepType,
    pub order_index: usize,
    pub status: StepStatus,
    /// 0.0 - 1.0
    pub progress: f64,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque output reference; multi-output steps join paths with `;`
    pub output_ref: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl WorkflowStep {
    pub fn new(step_type: StepType, order_index: usize, max_retries: u32) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            step_type,
            order_index,
            status: StepStatus::Pending,
            progress: 0.0,
            error_message: None,
            skip_reason: None,
            started_at: None,
            completed_at: None,
            output_ref: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Individual output paths of a (possibly multi-output) step
    pub fn output_paths(&self) -> Vec<&str> {
        self.output_ref
            .as_deref()
            .map(|r| {
                r.split(OUTPUT_REF_SEPARATOR)
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn join_output_paths<S: AsRef<str>>(paths: &[S]) -> Option<String> {
        if paths.is_empty() {
            return None;
        }
        let joined = paths
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(&OUTPUT_REF_SEPARATOR.to_string());
        Some(joined)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
