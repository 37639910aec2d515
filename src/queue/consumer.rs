//! # Queue Consumer
//!
//! Serialized polling loop that takes one task at a time from a
//! [`PersistentQueue`] and runs it to an outcome through a [`WorkflowRunner`].
//!
//! ## Loop
//!
//! ```text
//! running? ──no──▶ exit
//!    │
//! paused? ──yes──▶ sleep(paused_poll_interval)
//!    │
//! dequeue ──empty──▶ sleep(poll_interval)
//!    │ error ──────▶ status = Error, sleep(error_backoff)
//!    ▼
//! run task ─▶ complete_task(outcome) ─▶ sleep(min_task_interval)
//! ```
//!
//! The runner call is spawned as its own task so that
//! [`QueueConsumer::force_stop_current`] can abort it without tearing down
//! the loop. The loop holds only a [`Weak`] reference to the consumer
//! between iterations, so dropping the last handle ends it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::{PersistentQueue, QueueResult};
use crate::config::QueueConfig;
use crate::logging::log_error;
use crate::models::{QueueTaskStatus, QueuedTask, WorkflowConfig};
use crate::orchestration::WorkflowEngine;
use crate::state_machine::WorkflowStatus;

const FORCE_STOPPED: &str = "task was force stopped";

/// Runs the workflow behind one queued task
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Drive the task to an outcome; true means it completed successfully
    async fn run(&self, task: &QueuedTask) -> bool;

    /// Stop work started for `task` after its run was aborted
    async fn cancel(&self, _task: &QueuedTask) {}
}

/// Runs queued tasks as workflow instances on a [`WorkflowEngine`]
pub struct EngineRunner {
    engine: Arc<WorkflowEngine>,
    config: WorkflowConfig,
    poll_interval: Duration,
}

impl EngineRunner {
    pub fn new(engine: Arc<WorkflowEngine>, config: WorkflowConfig, poll_interval: Duration) -> Self {
        Self {
            engine,
            config,
            poll_interval,
        }
    }

    /// Pause that recovery will lift on its own (scheduled retry or resource wait)
    fn recovery_pending(&self, instance_id: uuid::Uuid) -> bool {
        let recovery = self.engine.recovery();
        recovery.scheduled_strategy(instance_id).is_some()
            || recovery.waiting_instances().contains_key(&instance_id)
    }
}

impl fmt::Debug for EngineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRunner")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[async_trait]
impl WorkflowRunner for EngineRunner {
    async fn run(&self, task: &QueuedTask) -> bool {
        let instance = match self.engine.start(&task.task_id, self.config.clone()) {
            Ok(instance) => instance,
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Workflow could not be started for queued task");
                return false;
            }
        };

        // A pause only settles the run once it outlives recovery for two polls
        let mut paused_polls = 0;
        loop {
            let Some(status) = self
                .engine
                .wait_until_settled(instance.instance_id, self.poll_interval)
                .await
            else {
                return false;
            };
            match status {
                WorkflowStatus::Completed => return true,
                WorkflowStatus::Paused if self.recovery_pending(instance.instance_id) => paused_polls = 0,
                WorkflowStatus::Paused if paused_polls < 1 => paused_polls += 1,
                WorkflowStatus::Paused => {
                    info!(
                        task_id = %task.task_id,
                        instance_id = %instance.instance_id,
                        "⏸️ QUEUE: Workflow paused for intervention; releasing queue slot"
                    );
                    return false;
                }
                _ => return false,
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn cancel(&self, task: &QueuedTask) {
        if let Some(instance) = self.engine.find_by_task_id(&task.task_id) {
            self.engine.cancel(instance.instance_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Idle,
    Processing,
    Paused,
    Error,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Paused => write!(f, "paused"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTaskInfo {
    pub task_id: String,
    pub position: usize,
    pub status: QueueTaskStatus,
    pub queued_at: DateTime<Utc>,
}

impl From<&QueuedTask> for QueuedTaskInfo {
    fn from(task: &QueuedTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            position: task.position,
            status: task.status,
            queued_at: task.queued_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConsumerStatus {
    pub queue_id: String,
    pub queue_length: usize,
    pub processing_status: ProcessingStatus,
    pub current_task: Option<String>,
    pub queued_tasks: Vec<QueuedTaskInfo>,
    pub running: bool,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ConsumerState {
    status: ProcessingStatus,
    current: Option<QueuedTask>,
    abort: Option<AbortHandle>,
}

pub struct QueueConsumer {
    queue: Arc<PersistentQueue>,
    runner: Arc<dyn WorkflowRunner>,
    queue_id: String,
    config: QueueConfig,
    state: Mutex<ConsumerState>,
    running: AtomicBool,
    paused: AtomicBool,
    shutdown: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue_id", &self.queue_id)
            .field("running", &self.is_running())
            .field("status", &self.processing_status())
            .finish()
    }
}

impl QueueConsumer {
    /// Consumer of the queue's default queue id
    pub fn new(queue: Arc<PersistentQueue>, runner: Arc<dyn WorkflowRunner>) -> Arc<Self> {
        let queue_id = queue.default_queue_id().to_string();
        Self::for_queue(queue, runner, queue_id)
    }

    pub fn for_queue(
        queue: Arc<PersistentQueue>,
        runner: Arc<dyn WorkflowRunner>,
        queue_id: impl Into<String>,
    ) -> Arc<Self> {
        let config = queue.config().clone();
        Arc::new(Self {
            queue,
            runner,
            queue_id: queue_id.into(),
            config,
            state: Mutex::new(ConsumerState::default()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            shutdown: Notify::new(),
            worker: Mutex::new(None),
        })
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.state.lock().status == ProcessingStatus::Processing
    }

    pub fn processing_status(&self) -> ProcessingStatus {
        if self.paused.load(Ordering::Acquire) {
            return ProcessingStatus::Paused;
        }
        self.state.lock().status
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|task| task.task_id.clone())
    }

    /// Start the polling loop; returns false if it is already running
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!(queue_id = %self.queue_id, "Queue consumer already running");
            return false;
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(Self::processing_loop(weak));
        if let Some(previous) = self.worker.lock().replace(handle) {
            previous.abort();
        }
        info!(queue_id = %self.queue_id, "🚀 QUEUE: Consumer started");
        true
    }

    /// Stop polling; a task already running is allowed to finish
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.notify_waiters();
        info!(queue_id = %self.queue_id, "🛑 QUEUE: Consumer stopping");
        true
    }

    /// Wait for the loop to exit after [`Self::stop`]
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(queue_id = %self.queue_id, error = %e, "Queue consumer loop panicked");
                }
            }
        }
    }

    pub fn pause(&self) -> bool {
        let paused = !self.paused.swap(true, Ordering::AcqRel);
        if paused {
            info!(queue_id = %self.queue_id, "⏸️ QUEUE: Consumer paused");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.paused.swap(false, Ordering::AcqRel);
        if resumed {
            info!(queue_id = %self.queue_id, "▶️ QUEUE: Consumer resumed");
        }
        resumed
    }

    /// Abort the task being processed and record it as failed.
    ///
    /// Returns the id of the stopped task, or `None` when nothing was running.
    pub async fn force_stop_current(&self) -> QueueResult<Option<String>> {
        let (task, abort) = {
            let mut state = self.state.lock();
            let Some(task) = state.current.take() else {
                return Ok(None);
            };
            state.status = ProcessingStatus::Idle;
            (task, state.abort.take())
        };

        warn!(queue_id = %self.queue_id, task_id = %task.task_id, "⚠️ QUEUE: Force stopping current task");
        if let Some(abort) = abort {
            abort.abort();
        }
        self.runner.cancel(&task).await;
        self.queue
            .complete_task(&task.task_id, false, Some(FORCE_STOPPED))
            .await?;
        Ok(Some(task.task_id))
    }

    pub async fn status(&self) -> QueueConsumerStatus {
        let queued = self.queue.list(&self.queue_id).await;
        QueueConsumerStatus {
            queue_id: self.queue_id.clone(),
            queue_length: queued.len(),
            processing_status: self.processing_status(),
            current_task: self.current_task_id(),
            queued_tasks: queued.iter().map(QueuedTaskInfo::from).collect(),
            running: self.is_running(),
            last_updated: Utc::now(),
        }
    }

    async fn processing_loop(weak: Weak<Self>) {
        loop {
            let Some(consumer) = weak.upgrade() else {
                break;
            };
            if !consumer.is_running() {
                break;
            }

            let delay = if consumer.paused.load(Ordering::Acquire) {
                consumer.config.paused_poll_interval()
            } else {
                match consumer.process_next().await {
                    Ok(true) => consumer.config.min_task_interval(),
                    Ok(false) => consumer.config.poll_interval(),
                    Err(e) => {
                        log_error(
                            "queue_consumer",
                            "process_next",
                            &e.to_string(),
                            Some(&consumer.queue_id),
                        );
                        consumer.state.lock().status = ProcessingStatus::Error;
                        consumer.config.error_backoff()
                    }
                }
            };

            // Notified registers on creation, so a stop() after this point still wakes it
            let shutdown = consumer.shutdown.notified();
            if !consumer.is_running() {
                break;
            }
            tokio::select! {
                _ = shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("Queue consumer loop exited");
    }

    /// Run the next task if there is one; true when a task was processed
    async fn process_next(&self) -> QueueResult<bool> {
        let Some(task) = self.queue.dequeue(&self.queue_id).await? else {
            let mut state = self.state.lock();
            if state.status != ProcessingStatus::Error {
                state.status = ProcessingStatus::Idle;
            }
            state.current = None;
            return Ok(false);
        };

        info!(queue_id = %self.queue_id, task_id = %task.task_id, "🎬 QUEUE: Processing task");
        let runner = Arc::clone(&self.runner);
        let run_task = task.clone();
        let handle = tokio::spawn(async move { runner.run(&run_task).await });
        {
            let mut state = self.state.lock();
            state.status = ProcessingStatus::Processing;
            state.current = Some(task.clone());
            state.abort = Some(handle.abort_handle());
        }

        let outcome = handle.await;
        let still_current = {
            let mut state = self.state.lock();
            let current = state
                .current
                .as_ref()
                .is_some_and(|current| current.task_id == task.task_id);
            if current {
                state.current = None;
                state.abort = None;
                state.status = ProcessingStatus::Idle;
            }
            current
        };

        match outcome {
            Ok(success) => {
                let message = (!success).then_some("workflow did not complete");
                self.queue
                    .complete_task(&task.task_id, success, message)
                    .await?;
                if success {
                    info!(task_id = %task.task_id, "✅ QUEUE: Task completed");
                } else {
                    warn!(task_id = %task.task_id, "❌ QUEUE: Task failed");
                }
            }
            Err(e) if e.is_cancelled() => {
                debug!(task_id = %task.task_id, still_current, "Task run was aborted");
                self.queue
                    .complete_task(&task.task_id, false, Some(FORCE_STOPPED))
                    .await?;
            }
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "Task runner panicked");
                self.queue
                    .complete_task(&task.task_id, false, Some(format!("runner panicked: {e}").as_str()))
                    .await?;
            }
        }
        Ok(true)
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        if let Some(abort) = self.state.get_mut().abort.take() {
            abort.abort();
        }
    }
}
