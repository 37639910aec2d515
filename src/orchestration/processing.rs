//! Processing contract: the external collaborator that performs the actual
//! media work for each step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{StepType, WorkflowStep, WorkflowInstance};

/// Outcome of executing one step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub output_paths: Vec<String>,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ProcessingResult {
    pub fn success<S: Into<String>>(output_paths: impl IntoIterator<Item = S>) -> Self {
        Self {
            success: true,
            output_paths: output_paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Output reference stored on the step; multiple outputs are `;`-joined
    pub fn output_ref(&self) -> Option<String> {
        WorkflowStep::join_output_paths(&self.output_paths)
    }

    pub fn failure_message(&self, step_type: StepType) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| format!("{step_type} step failed without an error message"))
    }
}

/// Performs the work behind each step type.
///
/// Only `execute` is required. Implementations report failures through
/// [`ProcessingResult::failure`]; the failure message drives error
/// classification, so it should describe the cause.
#[async_trait]
pub trait ProcessingContract: Send + Sync {
    async fn execute(&self, instance: &WorkflowInstance, step_type: StepType) -> ProcessingResult;

    /// Reject a successful-looking result (missing files, empty output, ...)
    async fn validate(&self, _result: &ProcessingResult, _step_type: StepType) -> bool {
        true
    }

    /// A false return skips the step instead of running it
    async fn check_prerequisites(&self, _instance: &WorkflowInstance, _step_type: StepType) -> bool {
        true
    }

    /// Called after a step completes successfully
    async fn cleanup(&self, _instance: &WorkflowInstance, _step_type: StepType) {}
}
