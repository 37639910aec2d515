//! Durable record of queue state.
//!
//! The queue writes every mutated record through its journal and reads the
//! whole table back on [`super::PersistentQueue::restore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use super::{QueueError, QueueResult};
use crate::models::{QueueTaskStatus, QueuedTask, TaskPriority};

#[async_trait]
pub trait QueueJournal: Send + Sync {
    /// Insert or overwrite the given records
    async fn upsert(&self, tasks: &[QueuedTask]) -> QueueResult<()>;

    async fn remove(&self, task_ids: &[String]) -> QueueResult<()>;

    async fn load_all(&self) -> QueueResult<Vec<QueuedTask>>;

    /// Remove then upsert as one change; implementations that can should
    /// make it atomic
    async fn apply(&self, upserts: &[QueuedTask], removals: &[String]) -> QueueResult<()> {
        self.remove(removals).await?;
        self.upsert(upserts).await
    }
}

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queued_tasks (
    task_id TEXT PRIMARY KEY NOT NULL,
    queue_id TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_retry_at TEXT,
    error_message TEXT,
    started_at TEXT,
    completed_at TEXT
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_queued_tasks_queue ON queued_tasks (queue_id, status, position)";

const UPSERT: &str = r#"
INSERT OR REPLACE INTO queued_tasks (
    task_id, queue_id, queued_at, position, status, priority,
    retry_count, last_retry_at, error_message, started_at, completed_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// SQLite table-backed journal
#[derive(Debug, Clone)]
pub struct SqliteQueueJournal {
    pool: SqlitePool,
}

impl SqliteQueueJournal {
    /// Connect to `url` (e.g. `sqlite://queue.db?mode=rwc`) and create the table
    pub async fn connect(url: &str) -> QueueResult<Self> {
        // Every connection to an in-memory database is a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| QueueError::journal("connect", e))?;
        Self::from_pool(pool).await
    }

    pub async fn in_memory() -> QueueResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn from_pool(pool: SqlitePool) -> QueueResult<Self> {
        let journal = Self { pool };
        journal.migrate().await?;
        Ok(journal)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> QueueResult<()> {
        for statement in [CREATE_TABLE, CREATE_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::journal("migrate", e))?;
        }
        info!("📥 QUEUE: Journal table ready");
        Ok(())
    }

    async fn upsert_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        tasks: &[QueuedTask],
    ) -> QueueResult<()> {
        for task in tasks {
            sqlx::query(UPSERT)
                .bind(&task.task_id)
                .bind(&task.queue_id)
                .bind(task.queued_at)
                .bind(task.position as i64)
                .bind(task.status.to_string())
                .bind(i64::from(task.priority.value()))
                .bind(i64::from(task.retry_count))
                .bind(task.last_retry_at)
                .bind(&task.error_message)
                .bind(task.started_at)
                .bind(task.completed_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| QueueError::journal("upsert", e))?;
        }
        Ok(())
    }

    async fn remove_in(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        task_ids: &[String],
    ) -> QueueResult<()> {
        for task_id in task_ids {
            sqlx::query("DELETE FROM queued_tasks WHERE task_id = ?")
                .bind(task_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| QueueError::journal("remove", e))?;
        }
        Ok(())
    }

    fn decode(row: &SqliteRow) -> QueueResult<QueuedTask> {
        let column = |e: sqlx::Error| QueueError::journal("decode", e);
        let task_id: String = row.try_get("task_id").map_err(column)?;
        let corrupt = |message: String| QueueError::CorruptRecord {
            task_id: task_id.clone(),
            message,
        };

        let status: String = row.try_get("status").map_err(column)?;
        let status = status.parse::<QueueTaskStatus>().map_err(corrupt)?;
        let priority: i64 = row.try_get("priority").map_err(column)?;
        let priority = u8::try_from(priority)
            .map(TaskPriority::from_value)
            .map_err(|e| corrupt(e.to_string()))?;
        let position: i64 = row.try_get("position").map_err(column)?;
        let retry_count: i64 = row.try_get("retry_count").map_err(column)?;

        Ok(QueuedTask {
            queue_id: row.try_get("queue_id").map_err(column)?,
            queued_at: row.try_get::<DateTime<Utc>, _>("queued_at").map_err(column)?,
            position: usize::try_from(position).map_err(|e| corrupt(e.to_string()))?,
            status,
            priority,
            retry_count: u32::try_from(retry_count).map_err(|e| corrupt(e.to_string()))?,
            last_retry_at: row.try_get("last_retry_at").map_err(column)?,
            error_message: row.try_get("error_message").map_err(column)?,
            started_at: row.try_get("started_at").map_err(column)?,
            completed_at: row.try_get("completed_at").map_err(column)?,
            task_id,
        })
    }
}

#[async_trait]
impl QueueJournal for SqliteQueueJournal {
    async fn upsert(&self, tasks: &[QueuedTask]) -> QueueResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::journal("begin", e))?;
        Self::upsert_in(&mut tx, tasks).await?;
        tx.commit()
            .await
            .map_err(|e| QueueError::journal("commit", e))
    }

    async fn remove(&self, task_ids: &[String]) -> QueueResult<()> {
        if task_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::journal("begin", e))?;
        Self::remove_in(&mut tx, task_ids).await?;
        tx.commit()
            .await
            .map_err(|e| QueueError::journal("commit", e))
    }

    async fn apply(&self, upserts: &[QueuedTask], removals: &[String]) -> QueueResult<()> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::journal("begin", e))?;
        Self::remove_in(&mut tx, removals).await?;
        Self::upsert_in(&mut tx, upserts).await?;
        tx.commit()
            .await
            .map_err(|e| QueueError::journal("commit", e))
    }

    async fn load_all(&self) -> QueueResult<Vec<QueuedTask>> {
        let rows = sqlx::query("SELECT * FROM queued_tasks ORDER BY queue_id, position, queued_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::journal("load", e))?;
        rows.iter().map(Self::decode).collect()
    }
}
