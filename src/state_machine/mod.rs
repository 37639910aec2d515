// State machine module for workflow orchestration
//
// Pure transition tables for workflow instances and their steps. Callers hold
// whatever lock guards the instance; nothing here blocks or awaits.

pub mod errors;
pub mod events;
pub mod states;
pub mod step_state_machine;
pub mod workflow_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::{StepEvent, WorkflowEvent};
pub use states::{StepStatus, WorkflowStatus};
pub use step_state_machine::StepStateMachine;
pub use workflow_state_machine::WorkflowStateMachine;
