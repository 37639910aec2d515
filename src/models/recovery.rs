use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Failure taxonomy used to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Transient; retry after a fixed back-off
    Temporary,
    /// Environment-constrained; wait until resources free up
    Resource,
    /// Operator must fix inputs
    Configuration,
    /// Unrecoverable for this step
    Fatal,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary => write!(f, "temporary"),
            Self::Resource => write!(f, "resource"),
            Self::Configuration => write!(f, "configuration"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    WaitForResource,
    PauseForIntervention,
    SkipStep,
    MarkAsFailed,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::WaitForResource => write!(f, "wait_for_resource"),
            Self::PauseForIntervention => write!(f, "pause_for_intervention"),
            Self::SkipStep => write!(f, "skip_step"),
            Self::MarkAsFailed => write!(f, "mark_as_failed"),
        }
    }
}

/// Append-only audit entry for one recovery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub instance_id: Uuid,
    pub step_id: Option<Uuid>,
    pub error_type: Option<ErrorType>,
    pub strategy: RecoveryStrategy,
    pub message: String,
    pub reason: Option<String>,
    pub successful: bool,
    pub recorded_at: DateTime<Utc>,
}

impl RecoveryRecord {
    pub fn new(
        instance_id: Uuid,
        step_id: Option<Uuid>,
        error_type: Option<ErrorType>,
        strategy: RecoveryStrategy,
        message: impl Into<String>,
        successful: bool,
    ) -> Self {
        Self {
            instance_id,
            step_id,
            error_type,
            strategy,
            message: message.into(),
            reason: None,
            successful,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
