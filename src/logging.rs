//! # Structured Logging Module
//!
//! Environment-aware structured logging that outputs to both console and a JSON
//! log file, for following concurrent workflow executions after the fact.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        if let Err(e) = fs::create_dir_all(&log_dir) {
            init_console_only(&log_level);
            tracing::warn!(
                error = %e,
                log_dir = %log_dir.display(),
                "Log directory unavailable, continuing with console logging only"
            );
            return;
        }

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_path = log_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&log_dir, log_filename);
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(true)
                    .with_filter(build_filter(&log_level)),
            )
            .with(
                fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(build_filter(&log_level)),
            );

        // An embedding application may already own the global subscriber
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_path.display(),
            "🔧 STRUCTURED LOGGING: Initialized with file output"
        );

        // The writer guard must outlive the process for buffered lines to flush
        std::mem::forget(guard);
    });
}

fn init_console_only(log_level: &str) {
    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(build_filter(log_level)),
    );
    let _ = subscriber.try_init();
}

/// `RUST_LOG` wins over the environment-derived level when present
fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Get current environment from environment variables
pub(crate) fn get_environment() -> String {
    std::env::var("MEDIAFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for workflow lifecycle operations
pub fn log_workflow_operation(
    operation: &str,
    instance_id: Uuid,
    task_id: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        instance_id = %instance_id,
        task_id = %task_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 WORKFLOW_OPERATION"
    );
}

/// Log structured data for step operations
pub fn log_step_operation(
    operation: &str,
    instance_id: Uuid,
    step_id: Uuid,
    step_type: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        instance_id = %instance_id,
        step_id = %step_id,
        step_type = %step_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log structured data for queue operations
pub fn log_queue_operation(
    operation: &str,
    queue_id: &str,
    task_id: Option<&str>,
    position: Option<usize>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        queue_id = %queue_id,
        task_id = task_id,
        position = position,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📥 QUEUE_OPERATION"
    );
}

/// Log structured data for recovery decisions
pub fn log_recovery_operation(
    instance_id: Uuid,
    step_id: Option<Uuid>,
    error_type: &str,
    strategy: &str,
    successful: bool,
    details: Option<&str>,
) {
    tracing::info!(
        instance_id = %instance_id,
        step_id = ?step_id,
        error_type = %error_type,
        strategy = %strategy,
        successful = successful,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🩹 RECOVERY_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
