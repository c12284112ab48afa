//! Liveness monitors for connector processes.

use parking_lot::Mutex;
use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Tracks whether the destination has stalled on a single action.
pub trait DestinationTimeoutMonitor: Send + Sync + Debug {
    /// Returns true if the current action has exceeded its timeout.
    fn has_timed_out(&self) -> bool;

    /// Returns the time since the destination last completed an action.
    fn time_since_last_action(&self) -> Duration;
}

/// Tracks whether the source is still producing output.
pub trait SourceHeartbeatMonitor: Send + Sync + Debug {
    /// Returns `Some(false)` once the source stopped beating, `None` before
    /// the first beat.
    fn is_beating(&self) -> Option<bool>;

    /// Returns the time since the last beat, if any was recorded.
    fn time_since_last_beat(&self) -> Option<Duration>;
}

/// A [`DestinationTimeoutMonitor`] driven by explicit action start/end calls.
#[derive(Debug)]
pub struct ActionTimeoutMonitor {
    timeout: Duration,
    last_action: Mutex<Instant>,
    action_started: Mutex<Option<Instant>>,
}

impl ActionTimeoutMonitor {
    /// Creates a monitor that times out actions running longer than `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_action: Mutex::new(Instant::now()),
            action_started: Mutex::new(None),
        }
    }

    /// Marks the start of an action.
    pub fn start_action(&self) {
        *self.action_started.lock() = Some(Instant::now());
    }

    /// Marks the end of the current action.
    pub fn end_action(&self) {
        *self.action_started.lock() = None;
        *self.last_action.lock() = Instant::now();
    }
}

impl DestinationTimeoutMonitor for ActionTimeoutMonitor {
    fn has_timed_out(&self) -> bool {
        self.action_started
            .lock()
            .is_some_and(|started| started.elapsed() > self.timeout)
    }

    fn time_since_last_action(&self) -> Duration {
        self.last_action.lock().elapsed()
    }
}

/// A [`SourceHeartbeatMonitor`] fed by `beat` calls.
#[derive(Debug)]
pub struct BeatMonitor {
    max_gap: Duration,
    last_beat: Mutex<Option<Instant>>,
}

impl BeatMonitor {
    /// Creates a monitor that reports not-beating after `max_gap` of silence.
    #[must_use]
    pub fn new(max_gap: Duration) -> Self {
        Self {
            max_gap,
            last_beat: Mutex::new(None),
        }
    }

    /// Records a beat.
    pub fn beat(&self) {
        *self.last_beat.lock() = Some(Instant::now());
    }
}

impl SourceHeartbeatMonitor for BeatMonitor {
    fn is_beating(&self) -> Option<bool> {
        self.last_beat
            .lock()
            .map(|last| last.elapsed() <= self.max_gap)
    }

    fn time_since_last_beat(&self) -> Option<Duration> {
        self.last_beat.lock().map(|last| last.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_timeout() {
        let monitor = ActionTimeoutMonitor::new(Duration::from_millis(5));
        assert!(!monitor.has_timed_out());

        monitor.start_action();
        std::thread::sleep(Duration::from_millis(15));
        assert!(monitor.has_timed_out());

        monitor.end_action();
        assert!(!monitor.has_timed_out());
        assert!(monitor.time_since_last_action() < Duration::from_secs(1));
    }

    #[test]
    fn test_beat_monitor() {
        let monitor = BeatMonitor::new(Duration::from_millis(5));
        assert_eq!(monitor.is_beating(), None);
        assert_eq!(monitor.time_since_last_beat(), None);

        monitor.beat();
        assert_eq!(monitor.is_beating(), Some(true));

        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(monitor.is_beating(), Some(false));
    }
}
