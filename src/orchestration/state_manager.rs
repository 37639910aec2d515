//! # State Manager
//!
//! Single path through which workflow and step transitions are applied.
//!
//! Every transition goes through the pure state machines in
//! [`crate::state_machine`], recalculates instance progress, publishes the
//! matching notification and queues a best-effort write to the
//! [`TaskStore`]. Callers hold the instance lock while transitioning; nothing
//! here awaits, so the lock is never held across a suspension point.
//!
//! ```text
//! caller (lock held) ──▶ StateManager ──▶ state machine ──▶ EventPublisher
//!                                    └──▶ mpsc ──▶ store writer task ──▶ TaskStore
//! ```
//!
//! Writes are queued while the instance lock is held and drained by a single
//! writer task, so the store sees them in transition order. Writes queued
//! before a tokio runtime exists are held until the first write made inside
//! one starts the writer.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{EventPublisher, StepStatusChanged, WorkflowStatusChanged};
use crate::models::WorkflowInstance;
use crate::state_machine::{
    StateMachineError, StateMachineResult, StepEvent, StepStateMachine, WorkflowEvent,
    WorkflowStateMachine, WorkflowStatus,
};
use crate::store::TaskStore;

#[derive(Clone)]
pub struct StateManager {
    publisher: EventPublisher,
    store: Arc<dyn TaskStore>,
    writer: Arc<StoreWriter>,
}

enum StoreWrite {
    Instance(Box<WorkflowInstance>),
    TaskStatus {
        task_id: String,
        status: WorkflowStatus,
        error_message: Option<String>,
    },
    Step(StepStatusChanged),
    Flush(oneshot::Sender<()>),
}

struct StoreWriter {
    sender: mpsc::UnboundedSender<StoreWrite>,
    /// Receiver waiting for a runtime to drain it
    idle: Mutex<Option<mpsc::UnboundedReceiver<StoreWrite>>>,
}

impl StoreWriter {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            idle: Mutex::new(Some(receiver)),
        }
    }

    fn submit(&self, store: &Arc<dyn TaskStore>, write: StoreWrite) {
        if self.sender.send(write).is_err() {
            debug!("Store writer stopped, dropping write");
            return;
        }
        self.ensure_running(store);
    }

    fn ensure_running(&self, store: &Arc<dyn TaskStore>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Some(receiver) = self.idle.lock().take() else {
            return;
        };
        handle.spawn(drain_writes(Arc::clone(store), receiver));
    }
}

async fn drain_writes(
    store: Arc<dyn TaskStore>,
    mut receiver: mpsc::UnboundedReceiver<StoreWrite>,
) {
    while let Some(write) = receiver.recv().await {
        match write {
            StoreWrite::Instance(snapshot) => {
                if let Err(e) = store.save_instance(&snapshot).await {
                    warn!(instance_id = %snapshot.instance_id, error = %e, "Failed to save workflow instance");
                }
            }
            StoreWrite::TaskStatus {
                task_id,
                status,
                error_message,
            } => {
                if let Err(e) = store
                    .update_task_status(&task_id, status, error_message.as_deref())
                    .await
                {
                    warn!(task_id = %task_id, error = %e, "Failed to persist task status");
                }
            }
            StoreWrite::Step(change) => {
                if let Err(e) = store
                    .update_step_status(
                        change.instance_id,
                        change.step_id,
                        change.new_status,
                        change.error_message.as_deref(),
                    )
                    .await
                {
                    debug!(
                        instance_id = %change.instance_id,
                        step_id = %change.step_id,
                        error = %e,
                        "Step status not persisted"
                    );
                }
            }
            StoreWrite::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Store writer exited");
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("subscribers", &self.publisher.subscriber_count())
            .finish()
    }
}

impl StateManager {
    pub fn new(publisher: EventPublisher, store: Arc<dyn TaskStore>) -> Self {
        Self {
            publisher,
            store,
            writer: Arc::new(StoreWriter::new()),
        }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Apply a workflow event, publish `workflow.status_changed` and persist
    pub fn transition_workflow(
        &self,
        instance: &mut WorkflowInstance,
        event: WorkflowEvent,
    ) -> StateMachineResult<WorkflowStatusChanged> {
        let event_type = event.event_type();
        let old_status = WorkflowStateMachine::apply(instance, event)?;
        let change = WorkflowStatusChanged::from_instance(instance, old_status);

        debug!(
            instance_id = %instance.instance_id,
            task_id = %instance.task_id,
            event = event_type,
            from = %old_status,
            to = %instance.status,
            "Workflow transition applied"
        );

        if let Err(e) = self.publisher.publish_workflow_status_changed(&change) {
            warn!(instance_id = %instance.instance_id, error = %e, "Failed to publish workflow status change");
        }
        self.persist_task_status(instance);
        Ok(change)
    }

    /// Apply a step event, recalculate progress, publish `workflow.step_changed` and persist
    pub fn transition_step(
        &self,
        instance: &mut WorkflowInstance,
        step_id: Uuid,
        event: StepEvent,
    ) -> StateMachineResult<StepStatusChanged> {
        let instance_id = instance.instance_id;
        let event_type = event.event_type();
        let step = instance
            .step_mut(step_id)
            .ok_or_else(|| StateMachineError::GuardFailed {
                reason: format!("step {step_id} does not belong to instance {instance_id}"),
            })?;
        let old_status = step.status;
        StepStateMachine::apply(step, event)?;

        let change = StepStatusChanged {
            instance_id,
            step_id,
            step_type: step.step_type,
            old_status,
            new_status: step.status,
            error_message: step.error_message.clone().or_else(|| step.skip_reason.clone()),
        };
        instance.recalculate_progress();

        debug!(
            instance_id = %instance_id,
            step_type = %change.step_type,
            event = event_type,
            from = %old_status,
            to = %change.new_status,
            progress = instance.progress,
            "Step transition applied"
        );

        if let Err(e) = self.publisher.publish_step_changed(&change) {
            warn!(instance_id = %instance_id, error = %e, "Failed to publish step status change");
        }
        self.persist_step_status(&change);
        Ok(change)
    }

    /// Snapshot write of the whole instance
    pub fn persist_instance(&self, instance: &WorkflowInstance) {
        self.writer
            .submit(&self.store, StoreWrite::Instance(Box::new(instance.clone())));
    }

    /// Wait until every write queued before this call has reached the store
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        self.writer.submit(&self.store, StoreWrite::Flush(done));
        if flushed.await.is_err() {
            debug!("Store writer gone before flush completed");
        }
    }

    fn persist_task_status(&self, instance: &WorkflowInstance) {
        self.writer.submit(
            &self.store,
            StoreWrite::TaskStatus {
                task_id: instance.task_id.clone(),
                status: instance.status,
                error_message: instance.error_message.clone(),
            },
        );
    }

    fn persist_step_status(&self, change: &StepStatusChanged) {
        self.writer
            .submit(&self.store, StoreWrite::Step(change.clone()));
    }
}
