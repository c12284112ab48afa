//! Failure records attributed to the side of the sync that caused them.

use crate::errors::ReplicationError;
use crate::message::{ErrorTrace, TraceFailureType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of connector-provided messages.
pub const MAX_MESSAGE_LENGTH: usize = 50_000;

/// Maximum length of connector-provided stack traces.
pub const MAX_STACK_TRACE_LENGTH: usize = 100_000;

const ATTRIBUTION_MESSAGE: &str = "Remainder truncated by the platform.";

/// Which part of the system a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    /// The source connector process.
    Source,
    /// The destination connector process.
    Destination,
    /// The replication engine itself.
    Replication,
    /// The surrounding platform (workload tracking, scheduling).
    Platform,
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
            Self::Replication => write!(f, "replication"),
            Self::Platform => write!(f, "platform"),
        }
    }
}

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// The connector reported a configuration problem.
    ConfigError,
    /// An unexpected error in a connector or the engine.
    SystemError,
    /// An error expected to go away on retry.
    TransientError,
}

impl From<TraceFailureType> for FailureType {
    fn from(value: TraceFailureType) -> Self {
        match value {
            TraceFailureType::ConfigError => Self::ConfigError,
            TraceFailureType::SystemError => Self::SystemError,
            TraceFailureType::TransientError => Self::TransientError,
        }
    }
}

/// An immutable record of one failure observed during a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Where the failure came from.
    pub origin: FailureOrigin,
    /// Optional classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
    /// Message intended for operators.
    pub internal_message: String,
    /// Message intended for end users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_message: Option<String>,
    /// Rendered cause chain or connector-provided trace.
    pub stack_trace: String,
    /// Epoch milliseconds at which the failure was recorded.
    pub timestamp: i64,
    /// Whether this failure was reported by a connector trace message.
    #[serde(default)]
    pub from_trace_message: bool,
}

impl Failure {
    /// Creates a failure with the given origin and message.
    #[must_use]
    pub fn new(origin: FailureOrigin, internal_message: impl Into<String>) -> Self {
        Self {
            origin,
            failure_type: None,
            internal_message: internal_message.into(),
            external_message: None,
            stack_trace: String::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            from_trace_message: false,
        }
    }

    /// Sets the failure type.
    #[must_use]
    pub fn with_failure_type(mut self, failure_type: FailureType) -> Self {
        self.failure_type = Some(failure_type);
        self
    }

    /// Sets the user-facing message.
    #[must_use]
    pub fn with_external_message(mut self, message: impl Into<String>) -> Self {
        self.external_message = Some(message.into());
        self
    }

    /// Sets the stack trace.
    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    /// Classifies a task error into a failure record.
    #[must_use]
    pub fn from_error(err: &ReplicationError) -> Self {
        let origin = err.origin();
        let failure = Self::new(origin, err.to_string()).with_stack_trace(err.stack_trace());
        match origin {
            FailureOrigin::Source => {
                failure.with_external_message("Something went wrong within the source connector")
            }
            FailureOrigin::Destination => failure
                .with_external_message("Something went wrong within the destination connector"),
            FailureOrigin::Platform => {
                let message = err.message().to_string();
                failure.with_external_message(message)
            }
            FailureOrigin::Replication => {
                failure.with_external_message("Something went wrong during replication")
            }
        }
    }

    /// Builds a failure from an error trace emitted by a connector.
    #[must_use]
    pub fn from_trace(origin: FailureOrigin, trace: &ErrorTrace) -> Self {
        let internal = trace
            .internal_message
            .as_deref()
            .unwrap_or(trace.message.as_str());
        let mut failure = Self::new(
            origin,
            truncate_with_attribution(internal, MAX_MESSAGE_LENGTH),
        )
        .with_external_message(truncate_with_attribution(&trace.message, MAX_MESSAGE_LENGTH))
        .with_failure_type(trace.failure_type.map_or(FailureType::SystemError, Into::into));
        if let Some(stack_trace) = &trace.stack_trace {
            failure.stack_trace = truncate_with_attribution(stack_trace, MAX_STACK_TRACE_LENGTH);
        }
        failure.from_trace_message = true;
        failure
    }

    /// Builds the notice appended once the failure log is full.
    #[must_use]
    pub fn truncation_notice(max_failures: usize) -> Self {
        Self::new(
            FailureOrigin::Replication,
            format!("Too many failures; additional failures beyond the first {max_failures} were truncated"),
        )
        .with_failure_type(FailureType::SystemError)
        .with_external_message("Additional failures were truncated")
    }
}

/// Shortens `s` to at most `max_len` characters, appending an attribution
/// suffix when anything was cut.
#[must_use]
pub fn truncate_with_attribution(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }

    // Room for "...", a space and the attribution.
    let budget = max_len.saturating_sub(ATTRIBUTION_MESSAGE.len() + 4);
    if budget == 0 {
        return s.chars().take(max_len).collect();
    }

    let mut out: String = s.chars().take(budget).collect();
    out.push_str("... ");
    out.push_str(ATTRIBUTION_MESSAGE);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_source_error() {
        let err = ReplicationError::source("Source process exited with non-zero exit code 1");
        let failure = Failure::from_error(&err);

        assert_eq!(failure.origin, FailureOrigin::Source);
        assert_eq!(
            failure.internal_message,
            "Source process exited with non-zero exit code 1"
        );
        assert_eq!(
            failure.external_message.as_deref(),
            Some("Something went wrong within the source connector")
        );
        assert!(!failure.from_trace_message);
    }

    #[test]
    fn test_from_heartbeat_error_is_platform() {
        let err = ReplicationError::workload_heartbeat("Workload Heartbeat Error", None);
        let failure = Failure::from_error(&err);

        assert_eq!(failure.origin, FailureOrigin::Platform);
        assert_eq!(failure.external_message.as_deref(), Some("Workload Heartbeat Error"));
    }

    #[test]
    fn test_from_trace() {
        let trace = ErrorTrace {
            message: "bad credentials".to_string(),
            internal_message: Some("401 from api".to_string()),
            stack_trace: Some("at login()".to_string()),
            failure_type: Some(TraceFailureType::ConfigError),
        };
        let failure = Failure::from_trace(FailureOrigin::Destination, &trace);

        assert_eq!(failure.origin, FailureOrigin::Destination);
        assert_eq!(failure.failure_type, Some(FailureType::ConfigError));
        assert_eq!(failure.internal_message, "401 from api");
        assert_eq!(failure.external_message.as_deref(), Some("bad credentials"));
        assert_eq!(failure.stack_trace, "at login()");
        assert!(failure.from_trace_message);
    }

    #[test]
    fn test_truncate_short_string_untouched() {
        assert_eq!(truncate_with_attribution("short", 100), "short");
    }

    #[test]
    fn test_truncate_long_string() {
        let long = "x".repeat(200);
        let truncated = truncate_with_attribution(&long, 100);

        assert!(truncated.chars().count() <= 100);
        assert!(truncated.ends_with(ATTRIBUTION_MESSAGE));
    }
}
