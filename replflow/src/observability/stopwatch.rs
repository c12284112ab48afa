//! Phase timing for the replication pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Accumulates elapsed time and invocation count for one phase.
#[derive(Debug)]
pub struct Stopwatch {
    name: &'static str,
    total_nanos: AtomicU64,
    executions: AtomicU64,
}

impl Stopwatch {
    /// Creates a stopwatch.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            total_nanos: AtomicU64::new(0),
            executions: AtomicU64::new(0),
        }
    }

    /// Starts timing one execution; the time is recorded when the guard drops.
    #[must_use]
    pub fn start(&self) -> StopwatchGuard<'_> {
        StopwatchGuard {
            stopwatch: self,
            started: Instant::now(),
        }
    }

    /// Times one future.
    pub async fn time<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.start();
        fut.await
    }

    fn record(&self, nanos: u64) {
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the stopwatch name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the number of recorded executions.
    #[must_use]
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time summary.
    #[must_use]
    pub fn stats(&self) -> StopwatchStats {
        let total_nanos = self.total_nanos.load(Ordering::Relaxed);
        let executions = self.executions();
        #[allow(clippy::cast_precision_loss)]
        let total_ms = total_nanos as f64 / 1_000_000.0;
        #[allow(clippy::cast_precision_loss)]
        let mean_ms = if executions == 0 {
            0.0
        } else {
            total_ms / executions as f64
        };
        StopwatchStats {
            total_ms,
            executions,
            mean_ms,
        }
    }
}

/// Records elapsed time into its [`Stopwatch`] on drop.
#[derive(Debug)]
pub struct StopwatchGuard<'a> {
    stopwatch: &'a Stopwatch,
    started: Instant,
}

impl Drop for StopwatchGuard<'_> {
    fn drop(&mut self) {
        let nanos = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.stopwatch.record(nanos);
    }
}

/// Summary of one stopwatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopwatchStats {
    /// Total elapsed milliseconds.
    pub total_ms: f64,
    /// Number of timed executions.
    pub executions: u64,
    /// Mean milliseconds per execution.
    pub mean_ms: f64,
}

/// Per-phase timings reported with the replication output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Stopwatch summaries keyed by phase name.
    pub phases: BTreeMap<String, StopwatchStats>,
}

impl PerformanceMetrics {
    /// Returns the summary for one phase.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&StopwatchStats> {
        self.phases.get(name)
    }
}

/// The stopwatches for each pipeline phase of one job.
#[derive(Debug)]
pub struct PipelineStopwatches {
    /// Time spent in `Source::attempt_read`.
    pub read_from_source: Stopwatch,
    /// Time spent processing source messages.
    pub process_from_source: Stopwatch,
    /// Time spent in `Destination::accept`.
    pub write_to_dest: Stopwatch,
    /// Time spent in `Destination::attempt_read`.
    pub read_from_dest: Stopwatch,
    /// Time spent processing destination messages.
    pub process_from_dest: Stopwatch,
}

impl Default for PipelineStopwatches {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStopwatches {
    /// Creates zeroed stopwatches.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read_from_source: Stopwatch::new("read_from_source"),
            process_from_source: Stopwatch::new("process_from_source"),
            write_to_dest: Stopwatch::new("write_to_dest"),
            read_from_dest: Stopwatch::new("read_from_dest"),
            process_from_dest: Stopwatch::new("process_from_dest"),
        }
    }

    /// Snapshots every stopwatch.
    #[must_use]
    pub fn metrics(&self) -> PerformanceMetrics {
        let phases = [
            &self.read_from_source,
            &self.process_from_source,
            &self.write_to_dest,
            &self.read_from_dest,
            &self.process_from_dest,
        ]
        .into_iter()
        .map(|sw| (sw.name().to_string(), sw.stats()))
        .collect();
        PerformanceMetrics { phases }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_guard_records_on_drop() {
        let sw = Stopwatch::new("phase");
        {
            let _guard = sw.start();
            std::thread::sleep(Duration::from_millis(2));
        }
        let stats = sw.stats();
        assert_eq!(stats.executions, 1);
        assert!(stats.total_ms >= 1.0);
    }

    #[tokio::test]
    async fn test_time_future() {
        let sw = Stopwatch::new("phase");
        let value = sw.time(async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(sw.executions(), 1);
    }

    #[test]
    fn test_metrics_contains_every_phase() {
        let stopwatches = PipelineStopwatches::new();
        drop(stopwatches.write_to_dest.start());

        let metrics = stopwatches.metrics();
        assert_eq!(metrics.phases.len(), 5);
        assert_eq!(metrics.phase("write_to_dest").map(|s| s.executions), Some(1));
        assert_eq!(metrics.phase("read_from_source").map(|s| s.executions), Some(0));
    }
}
