//! # Persistent Queue
//!
//! Named queues of [`QueuedTask`] records with dense positions.
//!
//! ## Ordering
//!
//! Each queue keeps its queued task ids in service order. Positions are the
//! 1-based index into that order and are renumbered after every mutation,
//! so a queue of N tasks always holds positions 1..=N. With priority
//! ordering enabled a new task is inserted after every queued task of equal
//! or more urgent priority, which keeps FIFO order within a priority.
//!
//! Records leave the order when they are dequeued but stay in the task map
//! (as processing, then completed or failed) until they are removed,
//! cleared or swept by [`PersistentQueue::cleanup_completed`].
//!
//! ## Durability
//!
//! With a [`QueueJournal`] attached, every touched record is written through
//! while the queue lock is held, so the journal never observes a partial
//! renumbering out of order. A mutation only stands once the journal has
//! accepted it: when the write fails the in-memory state is put back as it
//! was and the error is returned.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::journal::QueueJournal;
use super::{QueueError, QueueResult};
use crate::config::QueueConfig;
use crate::logging::log_queue_operation;
use crate::models::{QueueTaskStatus, QueuedTask, TaskPriority};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub queue_id: String,
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Tasks that were retried at least once
    pub retried: usize,
    /// completed / (completed + failed), 0.0 when nothing finished
    pub success_rate: f64,
    pub average_processing_minutes: Option<f64>,
}

#[derive(Debug, Default, Clone)]
struct QueueState {
    tasks: HashMap<String, QueuedTask>,
    /// queue id → queued task ids in service order
    order: HashMap<String, Vec<String>>,
    paused_levels: HashSet<TaskPriority>,
}

impl QueueState {
    /// Rewrite positions for one queue; returns the records whose position changed
    fn renumber(&mut self, queue_id: &str) -> Vec<QueuedTask> {
        let mut changed = Vec::new();
        let Some(order) = self.order.get(queue_id) else {
            return changed;
        };
        for (index, task_id) in order.iter().enumerate() {
            if let Some(task) = self.tasks.get_mut(task_id) {
                if task.position != index + 1 {
                    task.position = index + 1;
                    changed.push(task.clone());
                }
            }
        }
        changed
    }

    fn insert_index(&self, queue_id: &str, priority: TaskPriority, priority_ordering: bool) -> usize {
        let order = self.order.get(queue_id).map(Vec::as_slice).unwrap_or_default();
        if !priority_ordering {
            return order.len();
        }
        order
            .iter()
            .rposition(|task_id| {
                self.tasks
                    .get(task_id)
                    .is_some_and(|queued| queued.priority <= priority)
            })
            .map(|index| index + 1)
            .unwrap_or(0)
    }

    fn detach(&mut self, queue_id: &str, task_id: &str) -> bool {
        let Some(order) = self.order.get_mut(queue_id) else {
            return false;
        };
        let before = order.len();
        order.retain(|id| id != task_id);
        let removed = order.len() != before;
        if order.is_empty() {
            self.order.remove(queue_id);
        }
        removed
    }

    /// Next servable task: the first whose priority level is not paused
    fn head(&self, queue_id: &str) -> Option<&QueuedTask> {
        self.order.get(queue_id)?.iter().find_map(|task_id| {
            self.tasks
                .get(task_id)
                .filter(|task| !self.paused_levels.contains(&task.priority))
        })
    }

    fn queued_tasks(&self, queue_id: &str) -> Vec<QueuedTask> {
        self.order
            .get(queue_id)
            .map(|order| {
                order
                    .iter()
                    .filter_map(|task_id| self.tasks.get(task_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct PersistentQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    journal: Option<Arc<dyn QueueJournal>>,
}

impl std::fmt::Debug for PersistentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentQueue")
            .field("default_queue_id", &self.config.default_queue_id)
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}

impl PersistentQueue {
    /// In-memory queue without durability
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            journal: None,
        }
    }

    pub fn with_journal(config: QueueConfig, journal: Arc<dyn QueueJournal>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn default_queue_id(&self) -> &str {
        &self.config.default_queue_id
    }

    /// State to fall back to if the journal rejects the coming write
    fn checkpoint(&self, state: &QueueState) -> Option<QueueState> {
        self.journal.as_ref().map(|_| state.clone())
    }

    /// Write touched records through, rolling `state` back on failure
    async fn write_through(
        &self,
        state: &mut QueueState,
        checkpoint: Option<QueueState>,
        upserts: Vec<QueuedTask>,
        removals: Vec<String>,
    ) -> QueueResult<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }
        let result = journal.apply(&upserts, &removals).await;
        if let Err(e) = &result {
            warn!(error = %e, "Queue journal write failed, change rolled back");
            if let Some(previous) = checkpoint {
                *state = previous;
            }
        }
        result
    }

    /// Add a task at the back of its queue (or of its priority band).
    ///
    /// Returns false when the task id is already queued or processing. A
    /// finished record with the same id is replaced.
    pub async fn enqueue(&self, task: QueuedTask) -> QueueResult<bool> {
        if task.task_id.trim().is_empty() {
            return Err(QueueError::invalid_argument("task_id", "must not be empty"));
        }
        if task.queue_id.trim().is_empty() {
            return Err(QueueError::invalid_argument("queue_id", "must not be empty"));
        }

        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let changed = match Self::insert_locked(&mut state, task, self.config.priority_ordering) {
            Some(changed) => changed,
            None => return Ok(false),
        };
        self.write_through(&mut state, checkpoint, changed, Vec::new())
            .await?;
        Ok(true)
    }

    fn insert_locked(
        state: &mut QueueState,
        mut task: QueuedTask,
        priority_ordering: bool,
    ) -> Option<Vec<QueuedTask>> {
        if state
            .tasks
            .get(&task.task_id)
            .is_some_and(|existing| !existing.status.is_terminal())
        {
            debug!(task_id = %task.task_id, "Task already queued or processing");
            return None;
        }

        task.status = QueueTaskStatus::Queued;
        task.queued_at = Utc::now();
        task.started_at = None;
        task.completed_at = None;

        let queue_id = task.queue_id.clone();
        let task_id = task.task_id.clone();
        let index = state.insert_index(&queue_id, task.priority, priority_ordering);
        // Position 0 forces the renumber pass to report the new record
        task.position = 0;
        state.tasks.insert(task_id.clone(), task);
        state
            .order
            .entry(queue_id.clone())
            .or_default()
            .insert(index, task_id.clone());

        let changed = state.renumber(&queue_id);
        log_queue_operation("enqueue", &queue_id, Some(&task_id), Some(index + 1), None);
        Some(changed)
    }

    pub async fn enqueue_with_priority(
        &self,
        task_id: &str,
        queue_id: &str,
        priority: TaskPriority,
    ) -> QueueResult<bool> {
        self.enqueue(QueuedTask::new(task_id, queue_id).with_priority(priority))
            .await
    }

    /// Enqueue many tasks under one lock; returns how many were added
    pub async fn enqueue_batch(&self, tasks: Vec<QueuedTask>) -> QueueResult<usize> {
        if let Some(invalid) = tasks
            .iter()
            .find(|task| task.task_id.trim().is_empty() || task.queue_id.trim().is_empty())
        {
            return Err(QueueError::invalid_argument(
                "tasks",
                format!("task '{}' has an empty task or queue id", invalid.task_id),
            ));
        }

        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let mut added = 0;
        let mut changed: HashMap<String, QueuedTask> = HashMap::new();
        for task in tasks {
            if let Some(records) = Self::insert_locked(&mut state, task, self.config.priority_ordering)
            {
                added += 1;
                changed.extend(records.into_iter().map(|t| (t.task_id.clone(), t)));
            }
        }
        // Later renumbers supersede earlier ones for the same record
        let changed = changed
            .into_keys()
            .filter_map(|task_id| state.tasks.get(&task_id).cloned())
            .collect();
        self.write_through(&mut state, checkpoint, changed, Vec::new())
            .await?;
        Ok(added)
    }

    /// Take the head of `queue_id` and mark it processing
    pub async fn dequeue(&self, queue_id: &str) -> QueueResult<Option<QueuedTask>> {
        let mut state = self.state.lock().await;
        let Some(task_id) = state.head(queue_id).map(|task| task.task_id.clone()) else {
            return Ok(None);
        };

        let checkpoint = self.checkpoint(&state);
        state.detach(queue_id, &task_id);
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        task.mark_processing();
        let dequeued = task.clone();

        let mut changed = state.renumber(queue_id);
        changed.push(dequeued.clone());
        self.write_through(&mut state, checkpoint, changed, Vec::new())
            .await?;

        log_queue_operation("dequeue", queue_id, Some(&task_id), None, None);
        Ok(Some(dequeued))
    }

    pub async fn peek(&self, queue_id: &str) -> Option<QueuedTask> {
        self.state.lock().await.head(queue_id).cloned()
    }

    /// 1-based position of a queued task
    pub async fn position(&self, task_id: &str) -> Option<usize> {
        self.state
            .lock()
            .await
            .tasks
            .get(task_id)
            .filter(|task| task.status == QueueTaskStatus::Queued)
            .map(|task| task.position)
    }

    /// Number of queued (not yet dequeued) tasks
    pub async fn length(&self, queue_id: &str) -> usize {
        self.state
            .lock()
            .await
            .order
            .get(queue_id)
            .map_or(0, Vec::len)
    }

    /// Queued tasks in service order
    pub async fn list(&self, queue_id: &str) -> Vec<QueuedTask> {
        self.state.lock().await.queued_tasks(queue_id)
    }

    pub async fn get(&self, task_id: &str) -> Option<QueuedTask> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn exists(&self, task_id: &str) -> bool {
        self.state.lock().await.tasks.contains_key(task_id)
    }

    /// Replace a stored record.
    ///
    /// Queue membership follows the new status: a record that is no longer
    /// queued leaves the order. Positions are always recomputed by the queue.
    pub async fn update(&self, mut task: QueuedTask) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let Some(existing) = state.tasks.get(&task.task_id) else {
            return Ok(false);
        };
        if existing.queue_id != task.queue_id {
            return Err(QueueError::invalid_argument(
                "queue_id",
                format!(
                    "task {} belongs to queue {}, not {}",
                    task.task_id, existing.queue_id, task.queue_id
                ),
            ));
        }

        let checkpoint = self.checkpoint(&state);
        let queue_id = task.queue_id.clone();
        let was_queued = existing.status == QueueTaskStatus::Queued;
        let keep_position = existing.position;
        if was_queued && task.status != QueueTaskStatus::Queued {
            state.detach(&queue_id, &task.task_id);
            task.position = 0;
        } else if was_queued {
            task.position = keep_position;
        } else if task.status == QueueTaskStatus::Queued {
            let index = state.insert_index(&queue_id, task.priority, self.config.priority_ordering);
            state
                .order
                .entry(queue_id.clone())
                .or_default()
                .insert(index, task.task_id.clone());
            task.position = 0;
        } else {
            task.position = 0;
        }

        let task_id = task.task_id.clone();
        state.tasks.insert(task_id.clone(), task);
        let mut changed = state.renumber(&queue_id);
        if !changed.iter().any(|t| t.task_id == task_id) {
            if let Some(task) = state.tasks.get(&task_id) {
                changed.push(task.clone());
            }
        }
        self.write_through(&mut state, checkpoint, changed, Vec::new())
            .await?;
        Ok(true)
    }

    pub async fn remove_task(&self, task_id: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let Some(task) = state.tasks.remove(task_id) else {
            return Ok(false);
        };
        state.detach(&task.queue_id, task_id);
        let changed = state.renumber(&task.queue_id);

        self.write_through(&mut state, checkpoint, changed, vec![task_id.to_string()])
            .await?;
        log_queue_operation("remove", &task.queue_id, Some(task_id), None, None);
        Ok(true)
    }

    /// Drop every record of `queue_id`; returns how many were removed
    pub async fn clear(&self, queue_id: &str) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let removed: Vec<String> = state
            .tasks
            .values()
            .filter(|task| task.queue_id == queue_id)
            .map(|task| task.task_id.clone())
            .collect();
        for task_id in &removed {
            state.tasks.remove(task_id);
        }
        state.order.remove(queue_id);

        let count = removed.len();
        self.write_through(&mut state, checkpoint, Vec::new(), removed)
            .await?;
        log_queue_operation("clear", queue_id, None, None, Some(&format!("removed={count}")));
        Ok(count)
    }

    /// Change the priority of a queued task, moving it to its new band
    pub async fn set_task_priority(&self, task_id: &str, priority: TaskPriority) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let Some(task) = state.tasks.get_mut(task_id) else {
            return Ok(false);
        };
        if task.status != QueueTaskStatus::Queued {
            return Ok(false);
        }
        task.priority = priority;
        let queue_id = task.queue_id.clone();

        if self.config.priority_ordering {
            state.detach(&queue_id, task_id);
            let index = state.insert_index(&queue_id, priority, true);
            state
                .order
                .entry(queue_id.clone())
                .or_default()
                .insert(index, task_id.to_string());
        }

        let mut changed = state.renumber(&queue_id);
        if !changed.iter().any(|t| t.task_id == task_id) {
            if let Some(task) = state.tasks.get(task_id) {
                changed.push(task.clone());
            }
        }
        self.write_through(&mut state, checkpoint, changed, Vec::new())
            .await?;
        Ok(true)
    }

    /// Stop serving a priority level; returns false if it was already paused
    pub async fn pause_priority_level(&self, priority: TaskPriority) -> bool {
        let paused = self.state.lock().await.paused_levels.insert(priority);
        if paused {
            info!(priority = %priority, "⏸️ QUEUE: Priority level paused");
        }
        paused
    }

    pub async fn resume_priority_level(&self, priority: TaskPriority) -> bool {
        let resumed = self.state.lock().await.paused_levels.remove(&priority);
        if resumed {
            info!(priority = %priority, "▶️ QUEUE: Priority level resumed");
        }
        resumed
    }

    pub async fn paused_priority_levels(&self) -> Vec<TaskPriority> {
        let mut levels: Vec<TaskPriority> =
            self.state.lock().await.paused_levels.iter().copied().collect();
        levels.sort();
        levels
    }

    /// Record the outcome of a processing task
    pub async fn complete_task(
        &self,
        task_id: &str,
        success: bool,
        error_message: Option<&str>,
    ) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let Some(task) = state.tasks.get_mut(task_id) else {
            return Ok(false);
        };
        if task.status != QueueTaskStatus::Processing {
            debug!(task_id = %task_id, status = %task.status, "Ignoring outcome for task that is not processing");
            return Ok(false);
        }
        if success {
            task.mark_completed();
        } else {
            task.mark_failed(error_message.unwrap_or("workflow did not complete"));
        }
        let record = task.clone();
        self.write_through(&mut state, checkpoint, vec![record.clone()], Vec::new())
            .await?;
        log_queue_operation(
            if success { "complete" } else { "fail" },
            &record.queue_id,
            Some(task_id),
            None,
            record.error_message.as_deref(),
        );
        Ok(true)
    }

    /// Put a failed task back at the end of its band, up to `max_retry` times
    pub async fn retry_task(&self, task_id: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get(task_id) else {
            return Ok(false);
        };
        if task.status != QueueTaskStatus::Failed || task.retry_count >= self.config.max_retry {
            return Ok(false);
        }
        let mut task = task.clone();
        task.record_retry();
        task.error_message = None;

        let checkpoint = self.checkpoint(&state);
        let Some(changed) = Self::insert_locked(&mut state, task, self.config.priority_ordering)
        else {
            return Ok(false);
        };
        self.write_through(&mut state, checkpoint, changed, Vec::new())
            .await?;
        Ok(true)
    }

    pub async fn statistics(&self, queue_id: &str) -> QueueStatistics {
        let state = self.state.lock().await;
        let tasks: Vec<&QueuedTask> = state
            .tasks
            .values()
            .filter(|task| task.queue_id == queue_id)
            .collect();
        let count = |status: QueueTaskStatus| tasks.iter().filter(|t| t.status == status).count();

        let completed = count(QueueTaskStatus::Completed);
        let failed = count(QueueTaskStatus::Failed);
        let finished = completed + failed;
        let durations: Vec<f64> = tasks
            .iter()
            .filter_map(|task| task.processing_minutes())
            .collect();

        QueueStatistics {
            queue_id: queue_id.to_string(),
            total: tasks.len(),
            queued: count(QueueTaskStatus::Queued),
            processing: count(QueueTaskStatus::Processing),
            completed,
            failed,
            cancelled: count(QueueTaskStatus::Cancelled),
            retried: tasks.iter().filter(|t| t.retry_count > 0).count(),
            success_rate: if finished == 0 {
                0.0
            } else {
                completed as f64 / finished as f64
            },
            average_processing_minutes: (!durations.is_empty())
                .then(|| durations.iter().sum::<f64>() / durations.len() as f64),
        }
    }

    /// Remove finished records older than `older_than_days`
    pub async fn cleanup_completed(&self, older_than_days: u32) -> QueueResult<usize> {
        if older_than_days == 0 {
            return Err(QueueError::invalid_argument(
                "older_than_days",
                "must be at least 1",
            ));
        }
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));

        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let expired: Vec<String> = state
            .tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .filter(|task| task.completed_at.is_some_and(|done| done < cutoff))
            .map(|task| task.task_id.clone())
            .collect();
        for task_id in &expired {
            state.tasks.remove(task_id);
        }

        let count = expired.len();
        self.write_through(&mut state, checkpoint, Vec::new(), expired)
            .await?;
        if count > 0 {
            info!(removed = count, older_than_days, "🧹 QUEUE: Finished tasks cleaned up");
        }
        Ok(count)
    }

    /// Rebuild queue state from the journal; returns the number of queued tasks
    pub async fn restore(&self) -> QueueResult<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        let mut records = journal.load_all().await?;
        records.sort_by(|a, b| {
            (&a.queue_id, a.position, a.queued_at).cmp(&(&b.queue_id, b.position, b.queued_at))
        });

        let mut state = self.state.lock().await;
        let checkpoint = self.checkpoint(&state);
        let paused_levels = std::mem::take(&mut state.paused_levels);
        *state = QueueState {
            paused_levels,
            ..QueueState::default()
        };

        let mut queues = HashSet::new();
        for task in records {
            if task.status == QueueTaskStatus::Queued {
                state
                    .order
                    .entry(task.queue_id.clone())
                    .or_default()
                    .push(task.task_id.clone());
                queues.insert(task.queue_id.clone());
            } else if task.status == QueueTaskStatus::Processing {
                warn!(
                    task_id = %task.task_id,
                    "Task was processing when the queue stopped; leaving it for operator review"
                );
            }
            state.tasks.insert(task.task_id.clone(), task);
        }

        let mut changed = Vec::new();
        for queue_id in &queues {
            changed.extend(state.renumber(queue_id));
        }
        let queued = state.order.values().map(Vec::len).sum();
        self.write_through(&mut state, checkpoint, changed, Vec::new())
            .await?;

        info!(queued, queues = queues.len(), "📥 QUEUE: Restored from journal");
        Ok(queued)
    }
}
