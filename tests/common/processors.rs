//! Scripted [`ProcessingContract`] implementations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

use mediaflow_core::models::{StepType, WorkflowInstance};
use mediaflow_core::orchestration::{ProcessingContract, ProcessingResult};

/// Succeeds by default; per-step scripts of outcomes are consumed in order
#[derive(Default)]
pub struct ScriptedProcessor {
    scripts: Mutex<HashMap<StepType, VecDeque<ProcessingResult>>>,
    always_fail: Mutex<HashMap<StepType, String>>,
    invalid: Mutex<HashSet<StepType>>,
    calls: Mutex<Vec<(String, StepType)>>,
    cleanups: Mutex<Vec<StepType>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every execution waits for a `notify_one` on the returned gate
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let processor = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (Arc::new(processor), gate)
    }

    /// Fail the next `times` executions of `step_type` with `message`
    pub fn fail_times(&self, step_type: StepType, times: usize, message: &str) {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(step_type).or_default();
        for _ in 0..times {
            script.push_back(ProcessingResult::failure(message));
        }
    }

    pub fn fail_always(&self, step_type: StepType, message: &str) {
        self.always_fail.lock().insert(step_type, message.to_string());
    }

    /// Report success for `step_type` but reject its output on validation
    pub fn reject_output(&self, step_type: StepType) {
        self.invalid.lock().insert(step_type);
    }

    pub fn calls(&self) -> Vec<(String, StepType)> {
        self.calls.lock().clone()
    }

    pub fn executed_steps(&self, task_id: &str) -> Vec<StepType> {
        self.calls
            .lock()
            .iter()
            .filter(|(task, _)| task == task_id)
            .map(|(_, step)| *step)
            .collect()
    }

    pub fn cleanups(&self) -> Vec<StepType> {
        self.cleanups.lock().clone()
    }
}

#[async_trait]
impl ProcessingContract for ScriptedProcessor {
    async fn execute(&self, instance: &WorkflowInstance, step_type: StepType) -> ProcessingResult {
        self.calls.lock().push((instance.task_id.clone(), step_type));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = self.always_fail.lock().get(&step_type) {
            return ProcessingResult::failure(message.clone());
        }
        let scripted = self
            .scripts
            .lock()
            .get_mut(&step_type)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            ProcessingResult::success([format!("/media/{}/{step_type}.mp4", instance.task_id)])
        })
    }

    async fn validate(&self, _result: &ProcessingResult, step_type: StepType) -> bool {
        !self.invalid.lock().contains(&step_type)
    }

    async fn cleanup(&self, _instance: &WorkflowInstance, step_type: StepType) {
        self.cleanups.lock().push(step_type);
    }
}
