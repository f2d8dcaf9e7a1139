//! Slot-unit calibration

use crate::arch;
use crate::cycles::CycleCounter;
use crate::error::{DsaError, Result};

/// Timing of one full accelerator operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calibration {
    /// Minimum observed duration in counter cycles; one slot lasts this long.
    pub unit: u64,
    /// Every observed duration, in order.
    pub samples: Vec<u64>,
    /// Receiver samples per slot.
    pub oversample: u32,
}

impl Calibration {
    /// Calibration with a known unit and no samples.
    #[must_use]
    pub fn from_unit(unit: u64, oversample: u32) -> Self {
        Self {
            unit,
            samples: Vec::new(),
            oversample,
        }
    }

    /// Interval between receiver probes (`unit / oversample`).
    #[must_use]
    pub fn sampling_interval(&self) -> u64 {
        self.unit / u64::from(self.oversample.max(1))
    }

    /// Largest observed duration.
    #[must_use]
    pub fn max_sample(&self) -> Option<u64> {
        self.samples.iter().copied().max()
    }

    /// Mean observed duration.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_sample(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u128 = self.samples.iter().map(|&s| u128::from(s)).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }
}

/// Time `rounds` runs of `op` and keep the fastest as the slot unit.
///
/// # Errors
///
/// Returns `InvalidCalibration` for zero rounds or a zero-cycle minimum, and
/// propagates the first error from `op`.
pub fn calibrate<C, F>(counter: &C, rounds: u32, oversample: u32, mut op: F) -> Result<Calibration>
where
    C: CycleCounter + ?Sized,
    F: FnMut() -> Result<()>,
{
    if rounds == 0 {
        return Err(DsaError::invalid_calibration("at least one round is required"));
    }

    let mut samples = Vec::with_capacity(rounds as usize);
    for _ in 0..rounds {
        arch::load_fence();
        let start = counter.now();
        op()?;
        let end = counter.now();
        samples.push(end.saturating_sub(start));
    }

    let unit = samples.iter().copied().min().unwrap_or_default();
    if unit == 0 {
        return Err(DsaError::invalid_calibration(format!(
            "{} counter did not advance across an operation",
            counter.name()
        )));
    }

    tracing::info!(
        "Calibrated slot unit: {unit} cycles over {rounds} rounds (sampling interval {})",
        unit / u64::from(oversample.max(1))
    );
    Ok(Calibration {
        unit,
        samples,
        oversample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycles::testing::SteppingCounter;
    use std::cell::Cell;

    #[test]
    fn minimum_duration_becomes_the_unit() {
        let counter = SteppingCounter::new(0, 0);
        let costs = [900u64, 700, 1200, 650, 800];
        let round = Cell::new(0usize);
        let cal = calibrate(&counter, 5, 16, || {
            counter.advance(costs[round.get()]);
            round.set(round.get() + 1);
            Ok(())
        })
        .expect("calibration");

        assert_eq!(cal.unit, 650);
        assert_eq!(cal.samples, costs);
        assert_eq!(cal.sampling_interval(), 40);
        assert_eq!(cal.max_sample(), Some(1200));
    }

    #[test]
    fn zero_rounds_and_flat_counter_are_rejected() {
        let counter = SteppingCounter::new(0, 0);
        assert!(calibrate(&counter, 0, 16, || Ok(())).is_err());
        assert!(matches!(
            calibrate(&counter, 3, 16, || Ok(())),
            Err(DsaError::InvalidCalibration { .. })
        ));
    }

    #[test]
    fn operation_errors_abort_calibration() {
        let counter = SteppingCounter::new(0, 1);
        let result = calibrate(&counter, 10, 16, || Err(DsaError::QueueSaturated { attempts: 1000 }));
        assert!(matches!(result, Err(DsaError::QueueSaturated { .. })));
    }
}
