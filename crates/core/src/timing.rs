//! Frame timing state.
//!
//! [`FrameTiming`] is an owned value stepped once per frame by whoever drives
//! the render loop. Each tick yields an [`UpdateArgs`] carrying the delta and
//! total time, and a rolling accumulator reports the frame rate through the
//! log roughly once per second.

use std::time::{Duration, Instant};

use tracing::debug;

/// How often the accumulated frame rate is reported.
const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Timing arguments handed to the per-frame update step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateArgs {
    /// Seconds elapsed since the previous frame.
    pub delta_seconds: f64,
    /// Seconds elapsed since timing started.
    pub total_seconds: f64,
}

/// Per-frame timing state.
///
/// Owns everything needed to produce per-frame deltas and a periodic FPS
/// report; nothing here is process-global.
#[derive(Debug)]
pub struct FrameTiming {
    start: Instant,
    last_tick: Instant,
    frames_in_window: u32,
    window_elapsed: Duration,
}

impl FrameTiming {
    /// Create timing state, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames_in_window: 0,
            window_elapsed: Duration::ZERO,
        }
    }

    /// Step the clock for a new frame.
    ///
    /// Returns the delta since the previous tick and the total elapsed time.
    /// Once enough frames have accumulated to span a report interval, the
    /// average frame rate over that window is logged and the window restarts.
    pub fn tick(&mut self) -> UpdateArgs {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;

        self.frames_in_window += 1;
        self.window_elapsed += delta;
        if self.window_elapsed >= FPS_REPORT_INTERVAL {
            let fps = f64::from(self.frames_in_window) / self.window_elapsed.as_secs_f64();
            debug!("FPS: {:.1}", fps);
            self.frames_in_window = 0;
            self.window_elapsed = Duration::ZERO;
        }

        UpdateArgs {
            delta_seconds: delta.as_secs_f64(),
            total_seconds: (now - self.start).as_secs_f64(),
        }
    }

    /// Total elapsed time since timing started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Reset the clock and the FPS window to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.frames_in_window = 0;
        self.window_elapsed = Duration::ZERO;
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_produces_nonnegative_monotonic_time() {
        let mut timing = FrameTiming::new();
        let first = timing.tick();
        let second = timing.tick();

        assert!(first.delta_seconds >= 0.0);
        assert!(second.delta_seconds >= 0.0);
        assert!(second.total_seconds >= first.total_seconds);
    }

    #[test]
    fn reset_restarts_total_time() {
        let mut timing = FrameTiming::new();
        timing.tick();
        timing.reset();
        let args = timing.tick();

        // Freshly reset: total cannot be behind the newest delta.
        assert!(args.total_seconds >= args.delta_seconds);
        assert!(args.total_seconds < 1.0);
    }
}
