//! # Replflow
//!
//! A streaming replication engine that moves connector messages from a
//! source to a destination.
//!
//! Replflow runs one replication attempt as a set of concurrent tasks
//! joined by bounded queues:
//!
//! - **Source reader**: pulls messages from the source into the first queue
//! - **Message processor**: applies per-message processing and forwards
//!   records and states to the second queue
//! - **Destination writer**: delivers the second queue to the destination
//! - **Destination reader**: handles acknowledgements the destination emits
//! - **Heartbeat sender**: keeps the workload alive and aborts the run when
//!   the platform stops answering
//!
//! Every task shares a [`state::RunState`] that records failures and tells
//! the others when to stop.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use replflow::prelude::*;
//!
//! let run_state = Arc::new(RunState::new());
//! let persistence = Arc::new(InMemorySyncPersistence::new());
//! let helper = Arc::new(ReplicationHelper::new(run_state.clone(), persistence.clone()));
//!
//! let worker = ReplicationWorker::new(source, destination, helper, persistence, run_state)
//!     .with_config(ReplicationConfig::default());
//!
//! let output = worker.run(&input, job_root).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod connectors;
pub mod errors;
pub mod heartbeat;
pub mod message;
pub mod observability;
pub mod processing;
pub mod queue;
pub mod state;
pub mod tasks;
pub mod testing;
pub mod validation;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ReplicationConfig;
    pub use crate::connectors::{
        ConnectorConfig, Destination, InMemorySyncPersistence, Source, SyncPersistence,
    };
    pub use crate::errors::{ReplicationError, WorkerError};
    pub use crate::heartbeat::{HeartbeatClient, HeartbeatError};
    pub use crate::message::{ConfiguredCatalog, StreamKey, SyncMessage};
    pub use crate::processing::{MessageProcessor, ReplicationHelper, StreamStateInjector};
    pub use crate::queue::BoundedQueue;
    pub use crate::state::{Failure, FailureOrigin, RunState};
    pub use crate::validation::RecordSchemaValidator;
    pub use crate::worker::{
        ReplicationContext, ReplicationInput, ReplicationOutput, ReplicationStatus,
        ReplicationWorker,
    };
    pub use std::sync::Arc;
}
