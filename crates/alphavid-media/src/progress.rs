//! Time-based progress estimation.
//!
//! The engine reports no usable progress for keyed VP9 output, so while it
//! runs the worker advances a synthetic percentage on a fixed tick between a
//! start and an end bound.

use std::time::Duration;

/// Shortest tick interval the runner will schedule.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Monotonic estimator from `start` toward `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEstimator {
    start: u8,
    end: u8,
    step: u8,
    tick: Duration,
    current: u8,
}

impl Default for ProgressEstimator {
    fn default() -> Self {
        Self::new(40, 80, 2, Duration::from_millis(500))
    }
}

impl ProgressEstimator {
    /// `end` below `start` is raised to `start`; a zero step becomes 1 and a
    /// zero tick becomes [`MIN_TICK`].
    pub fn new(start: u8, end: u8, step: u8, tick: Duration) -> Self {
        let end = end.max(start);
        Self {
            start,
            end,
            step: step.max(1),
            tick: tick.max(MIN_TICK),
            current: start,
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn start(&self) -> u8 {
        self.start
    }

    pub fn end(&self) -> u8 {
        self.end
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Advance one step. Returns `None` once the end bound is reached.
    pub fn advance(&mut self) -> Option<u8> {
        if self.current >= self.end {
            return None;
        }
        self.current = self.current.saturating_add(self.step).min(self.end);
        Some(self.current)
    }

    /// Clamp to the end bound.
    pub fn finish(&mut self) -> u8 {
        self.current = self.end;
        self.current
    }
}
