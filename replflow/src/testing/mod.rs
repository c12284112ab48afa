//! Testing utilities for replication pipelines.
//!
//! This module provides:
//! - Scripted source and recording destination doubles
//! - A recording message processor
//! - A shared log of resource close order
//! - Message and catalog fixtures
//! - Assertions over replication outputs

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_failure_origins, assert_has_failure_containing, assert_status};
pub use mocks::{CloseLog, RecordingDestination, RecordingProcessor, ScriptedSource};
