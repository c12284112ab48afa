//! Assertions over replication outputs.

use crate::state::FailureOrigin;
use crate::worker::{ReplicationOutput, ReplicationStatus};

/// Asserts that the output has the expected status.
pub fn assert_status(output: &ReplicationOutput, expected: ReplicationStatus) {
    assert_eq!(
        output.status, expected,
        "Expected status {:?}, got {:?}. Failures: {:?}",
        expected, output.status, output.failures
    );
}

/// Asserts the origins of the output's failures, in order.
pub fn assert_failure_origins(output: &ReplicationOutput, expected: &[FailureOrigin]) {
    let origins: Vec<FailureOrigin> = output.failures.iter().map(|f| f.origin).collect();
    assert_eq!(origins, expected, "Unexpected failure origins");
}

/// Asserts that some failure's internal message contains `needle`.
pub fn assert_has_failure_containing(output: &ReplicationOutput, needle: &str) {
    assert!(
        output
            .failures
            .iter()
            .any(|f| f.internal_message.contains(needle)),
        "Expected a failure containing '{}', got: {:?}",
        needle,
        output
            .failures
            .iter()
            .map(|f| f.internal_message.as_str())
            .collect::<Vec<_>>()
    );
}
