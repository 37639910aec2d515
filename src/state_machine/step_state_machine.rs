use chrono::Utc;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::StepEvent,
    states::StepStatus,
};
use crate::models::WorkflowStep;

/// Transition rules for a single workflow step
///
/// ```text
/// PENDING ──start──▶ RUNNING ──complete──▶ COMPLETED
///    │                  │
///    │skip              └──fail──▶ FAILED ──retry──▶ PENDING
///    ▼                               │
/// SKIPPED ◀─────────────skip─────────┘
/// ```
pub struct StepStateMachine;

impl StepStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: StepStatus,
        event: &StepEvent,
    ) -> StateMachineResult<StepStatus> {
        let target = match (current_state, event) {
            (StepStatus::Pending, StepEvent::Start) => StepStatus::Running,

            (StepStatus::Running, StepEvent::Complete(_)) => StepStatus::Completed,

            (StepStatus::Running, StepEvent::Fail(_)) => StepStatus::Failed,
            (StepStatus::Pending, StepEvent::Fail(_)) => StepStatus::Failed,

            (StepStatus::Pending, StepEvent::Skip(_)) => StepStatus::Skipped,
            (StepStatus::Failed, StepEvent::Skip(_)) => StepStatus::Skipped,

            (StepStatus::Failed, StepEvent::Retry) => StepStatus::Pending,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event to a step, updating timestamps and bookkeeping fields
    pub fn apply(step: &mut WorkflowStep, event: StepEvent) -> StateMachineResult<StepStatus> {
        let target = Self::determine_target_state(step.status, &event)?;
        let now = Utc::now();

        match event {
            StepEvent::Start => {
                step.started_at = Some(now);
                step.completed_at = None;
                step.error_message = None;
                step.progress = 0.0;
            }
            StepEvent::Complete(output_ref) => {
                step.output_ref = output_ref;
                step.completed_at = Some(now);
                step.progress = 1.0;
            }
            StepEvent::Fail(message) => {
                step.error_message = Some(message);
                step.completed_at = Some(now);
            }
            StepEvent::Skip(reason) => {
                step.skip_reason = Some(reason);
                step.completed_at = Some(now);
            }
            StepEvent::Retry => {
                step.error_message = None;
                step.started_at = None;
                step.completed_at = None;
                step.progress = 0.0;
                step.retry_count += 1;
            }
        }

        step.status = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepType;

    #[test]
    fn test_step_happy_path() {
        let mut step = WorkflowStep::new(StepType::Clip, 1, 3);
        StepStateMachine::apply(&mut step, StepEvent::Start).unwrap();
        assert!(step.started_at.is_some());
        StepStateMachine::apply(&mut step, StepEvent::Complete(Some("/out/a.mp4".into()))).unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.output_ref.as_deref(), Some("/out/a.mp4"));
        assert_eq!(step.progress, 1.0);
    }

    #[test]
    fn test_failed_step_can_retry_or_skip() {
        assert_eq!(
            StepStateMachine::determine_target_state(StepStatus::Failed, &StepEvent::Retry).unwrap(),
            StepStatus::Pending
        );
        assert_eq!(
            StepStateMachine::determine_target_state(
                StepStatus::Failed,
                &StepEvent::skip_with_reason("fatal")
            )
            .unwrap(),
            StepStatus::Skipped
        );
    }

    #[test]
    fn test_retry_clears_error_and_counts() {
        let mut step = WorkflowStep::new(StepType::Upload, 4, 3);
        StepStateMachine::apply(&mut step, StepEvent::Start).unwrap();
        StepStateMachine::apply(&mut step, StepEvent::fail_with_error("timeout")).unwrap();
        StepStateMachine::apply(&mut step, StepEvent::Retry).unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.error_message.is_none());
        assert_eq!(step.retry_count, 1);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(
            StepStateMachine::determine_target_state(StepStatus::Completed, &StepEvent::Start)
                .is_err()
        );
        assert!(
            StepStateMachine::determine_target_state(StepStatus::Pending, &StepEvent::Retry)
                .is_err()
        );
        assert!(StepStateMachine::determine_target_state(
            StepStatus::Skipped,
            &StepEvent::Complete(None)
        )
        .is_err());
    }
}
