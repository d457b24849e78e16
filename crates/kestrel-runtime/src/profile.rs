//! Stage timing.

use std::time::{Duration, Instant};

/// Records the time between successive named checkpoints.
///
/// When disabled, laps are still recorded but nothing is logged.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    enabled: bool,
    start: Instant,
    last: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    /// Start a stopwatch. Laps are logged at `info` when `enabled`.
    pub fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            start: now,
            last: now,
            laps: Vec::new(),
        }
    }

    /// Record the time since the previous lap under `stage`.
    pub fn lap(&mut self, stage: impl Into<String>) -> Duration {
        let now = Instant::now();
        let delta = now - self.last;
        self.last = now;

        let stage = stage.into();
        if self.enabled {
            tracing::info!(
                stage = %stage,
                elapsed_ms = delta.as_secs_f64() * 1e3,
                "stage finished"
            );
        }
        self.laps.push((stage, delta));
        delta
    }

    /// Recorded laps in order.
    pub fn laps(&self) -> &[(String, Duration)] {
        &self.laps
    }

    /// Time since the stopwatch was started.
    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log the total; a no-op when disabled.
    pub fn report(&self) {
        if self.enabled {
            tracing::info!(
                stages = self.laps.len(),
                total_ms = self.total().as_secs_f64() * 1e3,
                "profile"
            );
        }
    }
}
