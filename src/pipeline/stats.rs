//! Diagnostic counters shared between the producer and the monitor thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Commit/drop/oversize accounting. Drops use real atomic increments because
/// the monitor thread reads and resets them; a lost increment would silently
/// corrupt diagnostics.
#[derive(Default)]
pub(crate) struct PipelineStats {
    pub frames_committed: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_oversized: AtomicU64,
}

/// Approximate frames-per-second estimator. Ticked on the producer thread,
/// read from the monitor thread; relaxed atomics throughout, approximate by
/// design.
pub struct FrequencyCounter {
    epoch: Instant,
    last_tick_ns: AtomicU64,
    smoothed_period_ns: AtomicU64,
}

impl FrequencyCounter {
    /// Exponential smoothing weight: 1/8 new sample, 7/8 history.
    const SMOOTHING_SHIFT: u32 = 3;

    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_tick_ns: AtomicU64::new(0),
            smoothed_period_ns: AtomicU64::new(0),
        }
    }

    /// Record one produced frame. Producer thread only.
    pub fn tick(&self) {
        let now = self.epoch.elapsed().as_nanos() as u64;
        let last = self.last_tick_ns.swap(now, Ordering::Relaxed);
        if last == 0 || now <= last {
            return; // first tick, nothing to measure yet
        }
        let period = now - last;
        let smoothed = self.smoothed_period_ns.load(Ordering::Relaxed);
        let next = if smoothed == 0 {
            period
        } else {
            smoothed - (smoothed >> Self::SMOOTHING_SHIFT) + (period >> Self::SMOOTHING_SHIFT)
        };
        self.smoothed_period_ns.store(next.max(1), Ordering::Relaxed);
    }

    /// Estimated production rate in hertz; 0.0 until two ticks were seen.
    pub fn hertz(&self) -> f64 {
        let period = self.smoothed_period_ns.load(Ordering::Relaxed);
        if period == 0 {
            0.0
        } else {
            1_000_000_000.0 / period as f64
        }
    }
}

impl Default for FrequencyCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer hooks for benchmark harnesses, injected at construction so the
/// hot path never branches on shared mutable state.
pub trait PipelineProbe: Send + Sync {
    fn frame_committed(&self, _position: i64, _len: usize) {}
    fn frame_dropped(&self, _position: i64) {}
}

/// The production default: every hook is a no-op.
pub(crate) struct NoopProbe;

impl PipelineProbe for NoopProbe {}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn frequency_needs_two_ticks() {
        let freq = FrequencyCounter::new();
        assert_eq!(freq.hertz(), 0.0);
        freq.tick();
        assert_eq!(freq.hertz(), 0.0);
    }

    #[test]
    fn frequency_tracks_tick_spacing() {
        let freq = FrequencyCounter::new();
        for _ in 0..5 {
            freq.tick();
            thread::sleep(Duration::from_millis(10));
        }
        let hz = freq.hertz();
        // 10ms spacing is ~100Hz; generous bounds, the estimator is
        // approximate and the scheduler adds jitter.
        assert!(hz > 10.0 && hz < 200.0, "estimated {hz} Hz");
    }
}
