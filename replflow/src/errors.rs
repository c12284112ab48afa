//! Error types for the replication engine.
//!
//! Task-local failures are wrapped into a [`ReplicationError`] at the task
//! boundary, keeping the original error as the cause. The variant decides
//! which side of the sync the failure is attributed to. [`WorkerError`] is
//! reserved for the one condition the orchestrator cannot recover from.

use crate::state::FailureOrigin;
use std::error::Error as StdError;
use std::fmt::Write as _;
use thiserror::Error;

/// A boxed, thread-safe error used as the cause of wrapped failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by pipeline tasks.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The source process failed to start, read, or exit cleanly.
    #[error("{message}")]
    Source {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        cause: Option<BoxError>,
    },

    /// The destination process failed to start, accept, read, or exit cleanly.
    #[error("{message}")]
    Destination {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        cause: Option<BoxError>,
    },

    /// The workload heartbeat could not be delivered for too long.
    #[error("{message}")]
    WorkloadHeartbeat {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        cause: Option<BoxError>,
    },

    /// A failure inside the replication engine itself.
    #[error("{message}")]
    Replication {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        cause: Option<BoxError>,
    },
}

impl ReplicationError {
    /// Creates a source error without a cause.
    #[must_use]
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a source error wrapping `cause`.
    #[must_use]
    pub fn source_with_cause(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Source {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Creates a destination error without a cause.
    #[must_use]
    pub fn destination(message: impl Into<String>) -> Self {
        Self::Destination {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a destination error wrapping `cause`.
    #[must_use]
    pub fn destination_with_cause(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Destination {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Creates a workload heartbeat error wrapping `cause`.
    #[must_use]
    pub fn workload_heartbeat(message: impl Into<String>, cause: Option<BoxError>) -> Self {
        Self::WorkloadHeartbeat {
            message: message.into(),
            cause,
        }
    }

    /// Creates an engine error without a cause.
    #[must_use]
    pub fn replication(message: impl Into<String>) -> Self {
        Self::Replication {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates an engine error wrapping `cause`.
    #[must_use]
    pub fn replication_with_cause(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Replication {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Returns which side of the sync this error is attributed to.
    #[must_use]
    pub fn origin(&self) -> FailureOrigin {
        match self {
            Self::Source { .. } => FailureOrigin::Source,
            Self::Destination { .. } => FailureOrigin::Destination,
            Self::WorkloadHeartbeat { .. } => FailureOrigin::Platform,
            Self::Replication { .. } => FailureOrigin::Replication,
        }
    }

    /// Returns the wrapped message without the cause chain.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Source { message, .. }
            | Self::Destination { message, .. }
            | Self::WorkloadHeartbeat { message, .. }
            | Self::Replication { message, .. } => message,
        }
    }

    /// Renders the error followed by its chain of causes.
    #[must_use]
    pub fn stack_trace(&self) -> String {
        render_chain(self)
    }
}

/// The fatal error returned when a sync cannot produce any output at all.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct WorkerError {
    /// Description of the failure.
    pub message: String,
    /// The underlying error, if any.
    #[source]
    pub cause: Option<BoxError>,
}

impl WorkerError {
    /// Creates a worker error without a cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a worker error wrapping `cause`.
    #[must_use]
    pub fn with_cause(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }
}

/// Renders an error and every `source()` below it, one per line.
pub(crate) fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let _ = write!(out, "\nCaused by: {cause}");
        current = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_mapping() {
        assert_eq!(ReplicationError::source("x").origin(), FailureOrigin::Source);
        assert_eq!(
            ReplicationError::destination("x").origin(),
            FailureOrigin::Destination
        );
        assert_eq!(
            ReplicationError::workload_heartbeat("x", None).origin(),
            FailureOrigin::Platform
        );
        assert_eq!(
            ReplicationError::replication("x").origin(),
            FailureOrigin::Replication
        );
    }

    #[test]
    fn test_cause_is_preserved() {
        let cause = anyhow::anyhow!("broken pipe");
        let err = ReplicationError::destination_with_cause(
            "Destination process message delivery failed",
            cause,
        );

        assert_eq!(err.to_string(), "Destination process message delivery failed");
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("broken pipe"));
    }

    #[test]
    fn test_stack_trace_renders_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ReplicationError::source_with_cause("Source process read attempt failed", inner);

        let trace = err.stack_trace();
        assert!(trace.starts_with("Source process read attempt failed"));
        assert!(trace.contains("Caused by: disk gone"));
    }

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::with_cause("Sync failed", anyhow::anyhow!("no stats"));
        assert_eq!(err.to_string(), "Sync failed");
        assert!(err.source().is_some());
    }
}
