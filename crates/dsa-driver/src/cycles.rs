//! Cycle counters for slot timing and latency measurement
//!
//! The channel never sleeps: it compares counter readings against slot
//! thresholds in a tight loop, so the counter is a trait and tests drive a
//! deterministic one.

use std::time::Instant;

/// Monotonic cycle source.
pub trait CycleCounter {
    /// Current count. Must never decrease.
    fn now(&self) -> u64;

    /// Counter name for logs.
    fn name(&self) -> &'static str;
}

/// Time-stamp counter read between two `LFENCE`s.
///
/// On targets without `RDTSC` the count is nanoseconds since creation.
#[derive(Debug, Clone, Copy)]
pub struct Tsc {
    #[cfg(not(target_arch = "x86_64"))]
    origin: Instant,
}

impl Tsc {
    /// Create a counter handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_arch = "x86_64"))]
            origin: Instant::now(),
        }
    }
}

impl Default for Tsc {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleCounter for Tsc {
    #[cfg(target_arch = "x86_64")]
    fn now(&self) -> u64 {
        crate::arch::load_fence();
        let t = crate::arch::rdtsc();
        crate::arch::load_fence();
        t
    }

    #[cfg(not(target_arch = "x86_64"))]
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> u64 {
        crate::arch::load_fence();
        self.origin.elapsed().as_nanos() as u64
    }

    fn name(&self) -> &'static str {
        if cfg!(target_arch = "x86_64") {
            "tsc"
        } else {
            "monotonic-ns"
        }
    }
}

/// Estimate counter frequency against the wall clock.
///
/// Used only to print human-readable durations next to cycle counts.
pub fn estimate_hz(counter: &dyn CycleCounter, window: std::time::Duration) -> f64 {
    let wall = Instant::now();
    let start = counter.now();
    while wall.elapsed() < window {
        std::hint::spin_loop();
    }
    let cycles = counter.now().saturating_sub(start);
    #[allow(clippy::cast_precision_loss)]
    let hz = cycles as f64 / wall.elapsed().as_secs_f64();
    hz
}
