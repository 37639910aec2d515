use chrono::Utc;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::WorkflowEvent,
    states::WorkflowStatus,
};
use crate::models::WorkflowInstance;

/// Transition rules for a workflow instance
pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: WorkflowStatus,
        event: &WorkflowEvent,
    ) -> StateMachineResult<WorkflowStatus> {
        let target = match (current_state, event) {
            (WorkflowStatus::Pending, WorkflowEvent::Start) => WorkflowStatus::Running,

            (WorkflowStatus::Running, WorkflowEvent::Pause) => WorkflowStatus::Paused,
            (WorkflowStatus::Paused, WorkflowEvent::Resume) => WorkflowStatus::Running,

            (WorkflowStatus::Running, WorkflowEvent::Complete) => WorkflowStatus::Completed,

            (from, WorkflowEvent::Fail(_)) if !from.is_terminal() => WorkflowStatus::Failed,
            (from, WorkflowEvent::Cancel) if !from.is_terminal() => WorkflowStatus::Cancelled,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event to an instance, returning the previous status
    pub fn apply(
        instance: &mut WorkflowInstance,
        event: WorkflowEvent,
    ) -> StateMachineResult<WorkflowStatus> {
        let previous = instance.status;
        let target = Self::determine_target_state(previous, &event)?;
        let now = Utc::now();

        match &event {
            WorkflowEvent::Start => {
                instance.started_at = Some(now);
            }
            WorkflowEvent::Fail(message) => {
                instance.error_message = Some(message.clone());
            }
            _ => {}
        }
        if target.is_terminal() {
            instance.completed_at = Some(now);
        }

        instance.status = target;
        instance.recalculate_progress();
        Ok(previous)
    }
}
