//! # Persistent Task Queue
//!
//! Named FIFO queues of external task ids feeding the workflow engine.
//!
//! ## Components
//!
//! - [`PersistentQueue`]: dense 1..N positions per queue, optional
//!   priority-aware insertion and paused priority levels
//! - [`QueueJournal`]: write-through durability seam;
//!   [`SqliteQueueJournal`] keeps the queue in a SQLite table so
//!   [`PersistentQueue::restore`] can rebuild it after a restart
//! - [`QueueConsumer`]: serialized polling loop that hands one task at a time
//!   to a [`WorkflowRunner`]

pub mod consumer;
pub mod journal;
pub mod persistent_queue;

pub use consumer::{
    EngineRunner, ProcessingStatus, QueueConsumer, QueueConsumerStatus, QueuedTaskInfo,
    WorkflowRunner,
};
pub use journal::{QueueJournal, SqliteQueueJournal};
pub use persistent_queue::{PersistentQueue, QueueStatistics};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Journal {operation} failed: {message}")]
    Journal { operation: String, message: String },

    #[error("Corrupt journal record for task {task_id}: {message}")]
    CorruptRecord { task_id: String, message: String },
}

impl QueueError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn journal(operation: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Journal {
            operation: operation.into(),
            message: error.to_string(),
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
