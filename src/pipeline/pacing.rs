//! Fixed-cadence pacing with drift correction

use std::time::{Duration, Instant};

/// Pacing state for one driver loop: the target interval and the start of the
/// current cycle. Each cycle sleeps whatever is left of the interval after its
/// own processing time, and never less than zero.
#[derive(Debug)]
pub struct Pacer {
    /// Target duration per frame
    interval: Duration,
    /// Start of the current cycle
    cycle_start: Option<Instant>,
    /// Cycles that ran past the interval
    overruns: u64,
}

impl Pacer {
    /// Pacer for a frame rate in frames per second. `None` unless the rate is
    /// finite and positive.
    pub fn from_framerate(fps: f64) -> Option<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        Some(Self::with_interval(Duration::from_secs_f64(1.0 / fps)))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            cycle_start: None,
            overruns: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Mark the start of a cycle.
    pub fn begin_cycle(&mut self) -> Instant {
        let now = Instant::now();
        self.cycle_start = Some(now);
        now
    }

    /// Time left in the current cycle, measured from the last `begin_cycle`.
    pub fn remaining(&mut self) -> Duration {
        let elapsed = self.cycle_start.map(|s| s.elapsed()).unwrap_or_default();
        self.remaining_after(elapsed)
    }

    /// Time left in a cycle whose processing took `elapsed`.
    pub fn remaining_after(&mut self, elapsed: Duration) -> Duration {
        if elapsed >= self.interval {
            self.overruns += 1;
        }
        self.interval.saturating_sub(elapsed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}
