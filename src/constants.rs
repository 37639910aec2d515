//! # System Constants
//!
//! Event names, queue identifiers, and the fixed numeric boundaries used by the
//! admission controller and resource monitor.

/// Notification event names published on the [`crate::events::EventPublisher`]
pub mod events {
    pub const WORKFLOW_STATUS_CHANGED: &str = "workflow.status_changed";
    pub const WORKFLOW_STEP_CHANGED: &str = "workflow.step_changed";
    pub const WORKFLOW_RECOVERY_ATTEMPTED: &str = "workflow.recovery_attempted";
    pub const RESOURCE_HIGH_LOAD: &str = "resource.high_load";
    pub const RESOURCE_LOAD_RECOVERED: &str = "resource.load_recovered";
}

/// Operational constants shared across components
pub mod system {
    /// Queue identifier used when callers do not name one
    pub const DEFAULT_QUEUE_ID: &str = "media-submission";

    /// Separator for multi-output step references
    pub const OUTPUT_REF_SEPARATOR: char = ';';

    /// Upper bound on retained resource snapshots regardless of time window
    pub const MAX_HISTORY_ENTRIES: usize = 4096;

    /// Pressure swing (in score points) that refreshes the concurrency limit
    pub const PRESSURE_CHANGE_THRESHOLD: f64 = 10.0;

    /// Threads budgeted per logical CPU when estimating the thread ceiling
    pub const THREADS_PER_CPU: u32 = 50;

    /// Period of the engine's sweep for expired terminal instances
    pub const CLEANUP_INTERVAL_SECS: u64 = 3600;

    /// Ceiling for per-workflow thread grants after least-connections boosts
    pub const MAX_THREADS_PER_ALLOCATION: u32 = 20;

    /// Floor for per-workflow memory grants under fair-share
    pub const MIN_FAIR_SHARE_MEMORY_MB: u64 = 512;
}

/// Pressure-score cut points used by recommendation and tiering
pub mod pressure {
    /// Below this score every recommendation runs at full width
    pub const LOW: f64 = 50.0;
    pub const ELEVATED: f64 = 70.0;
    pub const HIGH: f64 = 85.0;

    /// Allocation tier cut points
    pub const TIER_HIGH_PERFORMANCE: f64 = 50.0;
    pub const TIER_DEFAULT: f64 = 80.0;

    /// Adaptive strategy cut points
    pub const ADAPTIVE_FAIR_SHARE: f64 = 30.0;
    pub const ADAPTIVE_PRIORITY: f64 = 70.0;
}
