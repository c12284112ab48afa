//! Run state shared by every task of a replication job.
//!
//! This module provides:
//! - RunState with atomic abort/cancel/fail flags
//! - Failure records and their origin classification
//! - A bounded failure log with an explicit truncation notice

mod failure;
mod run_state;

pub use failure::{
    truncate_with_attribution, Failure, FailureOrigin, FailureType, MAX_MESSAGE_LENGTH,
    MAX_STACK_TRACE_LENGTH,
};
pub use run_state::{RunState, DEFAULT_MAX_FAILURES};
