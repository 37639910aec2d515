use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::priority::TaskPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueTaskStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for QueueTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for QueueTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid queue task status: {s}")),
        }
    }
}

/// One entry of the persistent queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub queue_id: String,
    pub queued_at: DateTime<Utc>,
    /// 1-based rank while queued; 0 once the task has left the queue
    pub position: usize,
    pub status: QueueTaskStatus,
    pub priority: TaskPriority,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueuedTask {
    pub fn new(task_id: impl Into<String>, queue_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            queue_id: queue_id.into(),
            queued_at: Utc::now(),
            position: 0,
            status: QueueTaskStatus::Queued,
            priority: TaskPriority::Normal,
            retry_count: 0,
            last_retry_at: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn mark_processing(&mut self) {
        self.status = QueueTaskStatus::Processing;
        self.started_at = Some(Utc::now());
        self.position = 0;
    }

    pub fn mark_completed(&mut self) {
        self.status = QueueTaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error_message = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = QueueTaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
        self.last_retry_at = Some(Utc::now());
    }

    pub fn processing_minutes(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        Some((end - start).num_milliseconds() as f64 / 60_000.0)
    }
}
