//! Input framerate estimation from frame arrival times.

use shared::error::{Error, Result};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_RATE_WINDOW: Duration = Duration::from_millis(2000);
pub(crate) const DEFAULT_MAX_FRAME_HISTORY: usize = 90;

/// Sliding window of frame arrival instants.
///
/// The estimate divides the number of frame intervals retained by the time
/// they span, rather than by the full window, so it is neither biased low
/// while the window is still filling up nor shifted by where `now` falls
/// between two frames.
#[derive(Debug)]
pub struct FrameCadenceTracker {
    window: Duration,
    max_samples: usize,
    /// Arrival instants, oldest first.
    samples: VecDeque<Instant>,
}

impl Default for FrameCadenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW, DEFAULT_MAX_FRAME_HISTORY)
    }
}

impl FrameCadenceTracker {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            window,
            max_samples: max_samples.max(1),
            samples: VecDeque::new(),
        }
    }

    /// Append the arrival instant of a frame.
    pub fn record_frame(&mut self, arrival: Instant) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(arrival);
        self.evict(arrival);
    }

    /// Frames per second seen over the window ending at `now`.
    ///
    /// Returns [`Error::ErrNoEstimateAvailable`] while fewer than two samples
    /// are retained or they all share one instant.
    pub fn estimate_fps(&mut self, now: Instant) -> Result<f64> {
        self.evict(now);

        let (Some(oldest), Some(newest)) = (self.samples.front(), self.samples.back()) else {
            return Err(Error::ErrNoEstimateAvailable);
        };
        let span_ms = newest.saturating_duration_since(*oldest).as_nanos() as f64 / 1_000_000.0;
        if span_ms <= 0.0 {
            return Err(Error::ErrNoEstimateAvailable);
        }

        let intervals = self.samples.len() - 1;
        Ok(intervals as f64 * 1000.0 / span_ms)
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
