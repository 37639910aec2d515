//! # Step Failure Classification
//!
//! Maps a step failure message to an [`ErrorType`] that the recovery manager
//! turns into a [`crate::models::RecoveryStrategy`].
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Failure message │────▶│ ErrorClassifier │────▶│ ErrorType       │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Rules are evaluated in order and the first match wins:
//!
//! | Order | Keywords                                              | Type          |
//! |-------|-------------------------------------------------------|---------------|
//! | 1     | no space left, disk full                              | Resource      |
//! | 2     | connection, timeout, timed out, network, socket,      | Temporary     |
//! |       | i/o, io error, broken pipe, reset by peer, eof        |               |
//! | 3     | disk space, memory, cpu, resource                     | Resource      |
//! | 4     | config, parameter, invalid, missing                   | Configuration |
//! | 5     | not found, no such file, access denied                | Fatal         |
//! | -     | anything else                                         | Fatal         |
//!
//! Failures only arrive as messages, so I/O-shaped errors are recognized by
//! the wording `std::io::Error` and HTTP clients use. Out-of-space wording
//! is checked first because it often arrives wrapped in an I/O error.

use crate::models::ErrorType;

/// Classification seam; the recovery manager holds one as a trait object
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> ErrorType;

    fn classifier_name(&self) -> &'static str;
}

/// Keyword rules matched case-insensitively against the failure message
#[derive(Debug, Clone)]
pub struct KeywordErrorClassifier {
    rules: Vec<(ErrorType, Vec<String>)>,
    default_type: ErrorType,
}

impl KeywordErrorClassifier {
    pub fn new() -> Self {
        let rule = |error_type: ErrorType, keywords: &[&str]| {
            (
                error_type,
                keywords.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            )
        };
        Self {
            rules: vec![
                rule(ErrorType::Resource, &["no space left", "disk full"]),
                rule(
                    ErrorType::Temporary,
                    &[
                        "connection",
                        "timeout",
                        "timed out",
                        "network",
                        "socket",
                        "i/o",
                        "io error",
                        "broken pipe",
                        "reset by peer",
                        "eof",
                    ],
                ),
                rule(
                    ErrorType::Resource,
                    &["disk space", "memory", "cpu", "resource"],
                ),
                rule(
                    ErrorType::Configuration,
                    &["config", "parameter", "invalid", "missing"],
                ),
                rule(
                    ErrorType::Fatal,
                    &["not found", "no such file", "access denied"],
                ),
            ],
            default_type: ErrorType::Fatal,
        }
    }

    /// Add keywords ahead of the built-in rules
    pub fn with_rule(mut self, error_type: ErrorType, keywords: &[&str]) -> Self {
        self.rules.insert(
            0,
            (
                error_type,
                keywords.iter().map(|k| k.to_lowercase()).collect(),
            ),
        );
        self
    }
}

impl Default for KeywordErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier for KeywordErrorClassifier {
    fn classify(&self, message: &str) -> ErrorType {
        let lower = message.to_lowercase();
        self.rules
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k.as_str())))
            .map(|(error_type, _)| *error_type)
            .unwrap_or(self.default_type)
    }

    fn classifier_name(&self) -> &'static str {
        "keyword"
    }
}

/// Resource type a resource-shaped failure is waiting on
pub fn resource_type_for(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("disk") || lower.contains("space") {
        "disk_space"
    } else if lower.contains("memory") {
        "memory"
    } else if lower.contains("cpu") {
        "cpu"
    } else {
        "system_resource"
    }
}
