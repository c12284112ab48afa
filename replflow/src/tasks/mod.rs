//! Pipeline tasks.
//!
//! This module provides:
//! - The ReplicationTask trait implemented by every unit of work
//! - Starters that launch the connector processes
//! - The four sync tasks moving messages between source and destination

mod destination_reader;
mod destination_writer;
mod processor;
mod source_reader;
mod starters;

pub use destination_reader::DestinationReader;
pub use destination_writer::DestinationWriter;
pub use processor::MessageProcessorTask;
pub use source_reader::SourceReader;
pub use starters::{DestinationStarter, SourceStarter};

use crate::errors::ReplicationError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// A unit of work run by the orchestrator.
///
/// Implementations check the shared run state once per iteration and
/// release what they own before returning, whatever the outcome.
#[async_trait]
pub trait ReplicationTask: Send + Sync + Debug {
    /// Returns the name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the task to completion.
    async fn run(&self) -> Result<(), ReplicationError>;
}

/// Signals shared by the destination writer and reader.
///
/// The writer stops once the reader is gone, and the reader stops once a
/// write failed.
#[derive(Debug)]
pub struct DestinationSignals {
    write_failed: AtomicBool,
    reader_running: AtomicBool,
}

impl Default for DestinationSignals {
    fn default() -> Self {
        Self {
            write_failed: AtomicBool::new(false),
            reader_running: AtomicBool::new(true),
        }
    }
}

impl DestinationSignals {
    /// Creates signals for a fresh run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that delivering to the destination failed.
    pub fn mark_write_failed(&self) {
        self.write_failed.store(true, Ordering::SeqCst);
    }

    /// Returns whether delivering to the destination failed.
    #[must_use]
    pub fn write_failed(&self) -> bool {
        self.write_failed.load(Ordering::SeqCst)
    }

    /// Records that the reader exited.
    pub fn mark_reader_stopped(&self) {
        self.reader_running.store(false, Ordering::SeqCst);
    }

    /// Returns whether the reader is still running.
    #[must_use]
    pub fn reader_running(&self) -> bool {
        self.reader_running.load(Ordering::SeqCst)
    }
}
