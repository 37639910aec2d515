//! # Workflow Configuration
//!
//! Feature flags and segmentation parameters captured when a workflow instance is
//! created. The step plan is derived from this snapshot and never changes for the
//! lifetime of the instance.

use serde::{Deserialize, Serialize};

use super::priority::TaskPriority;
use super::step::StepType;

pub const MIN_SEGMENT_DURATION_SECONDS: u32 = 30;
pub const MAX_SEGMENT_DURATION_SECONDS: u32 = 600;
pub const MAX_SEGMENT_COUNT: u32 = 100;
const INDEX_PLACEHOLDER: &str = "{index}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub enabled: bool,
    pub segment_duration_seconds: u32,
    pub max_segment_count: u32,
    /// Output naming pattern; must contain `{index}`
    pub naming_pattern: String,
    pub preserve_original: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            segment_duration_seconds: 133,
            max_segment_count: 50,
            naming_pattern: "{title}_Part{index}".to_string(),
            preserve_original: true,
        }
    }
}

impl SegmentationConfig {
    pub fn enabled_with_duration(segment_duration_seconds: u32) -> Self {
        Self {
            enabled: true,
            segment_duration_seconds,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_SEGMENT_DURATION_SECONDS..=MAX_SEGMENT_DURATION_SECONDS)
            .contains(&self.segment_duration_seconds)
        {
            return Err(format!(
                "segment duration {}s outside {MIN_SEGMENT_DURATION_SECONDS}..={MAX_SEGMENT_DURATION_SECONDS}",
                self.segment_duration_seconds
            ));
        }
        if !(1..=MAX_SEGMENT_COUNT).contains(&self.max_segment_count) {
            return Err(format!(
                "max segment count {} outside 1..={MAX_SEGMENT_COUNT}",
                self.max_segment_count
            ));
        }
        if !self.naming_pattern.contains(INDEX_PLACEHOLDER) {
            return Err(format!(
                "naming pattern '{}' must contain {INDEX_PLACEHOLDER}",
                self.naming_pattern
            ));
        }
        Ok(())
    }

    /// Expected number of segments for a source of the given length
    pub fn expected_segment_count(&self, total_duration_seconds: u32) -> u32 {
        if self.segment_duration_seconds == 0 {
            return 0;
        }
        total_duration_seconds
            .div_ceil(self.segment_duration_seconds)
            .min(self.max_segment_count)
    }

    /// Render the naming pattern for a 1-based segment index
    pub fn segment_name(&self, title: &str, index: u32) -> String {
        self.naming_pattern
            .replace("{title}", title)
            .replace(INDEX_PLACEHOLDER, &index.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub user_id: Option<String>,
    pub workflow_type: String,
    pub enable_direct_submission: bool,
    pub enable_clipping: bool,
    pub enable_merging: bool,
    pub segmentation: SegmentationConfig,
    pub priority: TaskPriority,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            workflow_type: "video_processing".to_string(),
            enable_direct_submission: true,
            enable_clipping: true,
            enable_merging: true,
            segmentation: SegmentationConfig::default(),
            priority: TaskPriority::Normal,
        }
    }
}

impl WorkflowConfig {
    /// Segmented upload of a merged source instead of direct submission
    pub fn segmented(segment_duration_seconds: u32) -> Self {
        Self {
            enable_direct_submission: false,
            segmentation: SegmentationConfig::enabled_with_duration(segment_duration_seconds),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workflow_type.trim().is_empty() {
            return Err("workflow type must not be empty".to_string());
        }
        if self.enable_direct_submission && self.segmentation.enabled {
            return Err("direct submission and segmentation are mutually exclusive".to_string());
        }
        if self.segmentation.enabled {
            self.segmentation.validate()?;
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn segmentation_active(&self) -> bool {
        !self.enable_direct_submission && self.segmentation.enabled
    }

    /// Ordered step plan for this configuration
    ///
    /// Steps that the configuration disables are absent from the plan, not
    /// merely skipped at run time.
    pub fn step_definitions(&self) -> Vec<StepType> {
        let mut steps = vec![StepType::Download];
        if self.enable_clipping {
            steps.push(StepType::Clip);
        }
        if self.enable_merging {
            steps.push(StepType::Merge);
        }
        if self.segmentation_active() {
            steps.push(StepType::Segment);
        }
        steps.push(StepType::Upload);
        steps
    }
}
