//! Slot thresholds

use crate::error::{DsaError, Result};

/// Where the clock is relative to a slot window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPosition {
    /// Window not open yet
    Before,
    /// `start <= elapsed < end`
    Inside,
    /// Window closed
    Past,
}

/// Start offsets `i * unit` for `i` in `0..count`, relative to the
/// transmission start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    unit: u64,
    starts: Vec<u64>,
}

impl SlotTable {
    /// Build `count` slots of `unit` cycles each.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCalibration` if `unit` is zero or the last window end
    /// does not fit in 64 bits.
    pub fn new(unit: u64, count: usize) -> Result<Self> {
        if unit == 0 {
            return Err(DsaError::invalid_calibration("slot unit is zero"));
        }
        u64::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(unit))
            .ok_or_else(|| DsaError::invalid_calibration(format!("{count} slots of {unit} cycles overflow")))?;

        let starts = (0..count as u64).map(|i| i * unit).collect();
        Ok(Self { unit, starts })
    }

    /// Slot length in cycles.
    #[must_use]
    pub const fn unit(&self) -> u64 {
        self.unit
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// Whether the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Start offsets, strictly increasing.
    #[must_use]
    pub fn thresholds(&self) -> &[u64] {
        &self.starts
    }

    /// `[start, end)` of slot `i`. The last slot ends one unit after it
    /// starts, like every other slot.
    #[must_use]
    pub fn window(&self, i: usize) -> Option<(u64, u64)> {
        self.starts.get(i).map(|&start| (start, start + self.unit))
    }

    /// Classify `elapsed` cycles since the start against slot `i`.
    #[must_use]
    pub fn position(&self, i: usize, elapsed: u64) -> Option<SlotPosition> {
        self.window(i).map(|(start, end)| {
            if elapsed < start {
                SlotPosition::Before
            } else if elapsed < end {
                SlotPosition::Inside
            } else {
                SlotPosition::Past
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_strictly_increase() {
        let table = SlotTable::new(1000, 100).expect("table");
        assert_eq!(table.len(), 100);
        assert!(table.thresholds().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(table.thresholds()[0], 0);
        assert_eq!(table.thresholds()[99], 99_000);
    }

    #[test]
    fn windows_are_half_open() {
        let table = SlotTable::new(10, 3).expect("table");
        assert_eq!(table.window(2), Some((20, 30)));
        assert_eq!(table.window(3), None);

        assert_eq!(table.position(1, 9), Some(SlotPosition::Before));
        assert_eq!(table.position(1, 10), Some(SlotPosition::Inside));
        assert_eq!(table.position(1, 19), Some(SlotPosition::Inside));
        assert_eq!(table.position(1, 20), Some(SlotPosition::Past));
        assert_eq!(table.position(2, 29), Some(SlotPosition::Inside));
    }

    #[test]
    fn bad_units_are_rejected() {
        assert!(SlotTable::new(0, 10).is_err());
        assert!(SlotTable::new(u64::MAX, 2).is_err());
        assert!(SlotTable::new(5, 0).expect("empty table").is_empty());
    }
}
