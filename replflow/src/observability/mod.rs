//! Observability utilities.
//!
//! This module provides:
//! - Subscriber installation for binaries embedding the engine
//! - Per-phase stopwatches and the performance metrics they produce

mod logging;
mod stopwatch;

pub use logging::{init_tracing, LogFormat};
pub use stopwatch::{
    PerformanceMetrics, PipelineStopwatches, Stopwatch, StopwatchGuard, StopwatchStats,
};
