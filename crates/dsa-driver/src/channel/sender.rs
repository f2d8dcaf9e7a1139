//! Slot-synchronised sender

use super::slots::{SlotPosition, SlotTable};
use crate::cycles::CycleCounter;
use crate::error::{DsaError, Result};
use tracing::{debug, warn};

/// What happened in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Bit 0: nothing submitted
    Silent,
    /// Bit 1: the operation ran and succeeded
    Triggered,
    /// Bit 1: the operation ran and failed
    Failed,
    /// The window had closed before the sender got to it
    Missed,
}

/// Per-slot record of one transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitReport {
    /// One entry per transmitted bit
    pub outcomes: Vec<SlotOutcome>,
    /// Counter value at the start
    pub start: u64,
    /// Counter value after the last slot
    pub end: u64,
}

impl TransmitReport {
    fn count(&self, outcome: SlotOutcome) -> usize {
        self.outcomes.iter().filter(|&&o| o == outcome).count()
    }

    /// Slots in which the operation succeeded.
    #[must_use]
    pub fn triggered(&self) -> usize {
        self.count(SlotOutcome::Triggered)
    }

    /// Slots in which the operation failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(SlotOutcome::Failed)
    }

    /// Slots whose window was missed.
    #[must_use]
    pub fn missed(&self) -> usize {
        self.count(SlotOutcome::Missed)
    }

    /// Operations started.
    #[must_use]
    pub fn operations(&self) -> usize {
        self.triggered() + self.failed()
    }
}

/// Modulates accelerator activity onto the slot grid.
///
/// The clock and the operation are injected, so the sender can run against
/// the software portal and a fake counter.
#[derive(Debug)]
pub struct Sender<'c, C: CycleCounter + ?Sized> {
    counter: &'c C,
    slots: SlotTable,
}

impl<'c, C: CycleCounter + ?Sized> Sender<'c, C> {
    /// Sender over `slots`, timed by `counter`.
    pub fn new(counter: &'c C, slots: SlotTable) -> Self {
        Self { counter, slots }
    }

    /// Slot table in use.
    pub const fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Transmit `bits`, one per slot, starting now.
    ///
    /// Each slot is visited once. A 1-bit runs `op` exactly once if its
    /// window is still open; failures are recorded and transmission goes on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCalibration` if there are more bits than slots.
    pub fn transmit<F>(&self, bits: &[bool], mut op: F) -> Result<TransmitReport>
    where
        F: FnMut() -> Result<()>,
    {
        if bits.len() > self.slots.len() {
            return Err(DsaError::invalid_calibration(format!(
                "{} bits do not fit in {} slots",
                bits.len(),
                self.slots.len()
            )));
        }

        let mut outcomes = Vec::with_capacity(bits.len());
        let start = self.counter.now();
        let mut slot = 0;

        while slot < bits.len() {
            let elapsed = self.counter.now().saturating_sub(start);
            let Some(position) = self.slots.position(slot, elapsed) else {
                break;
            };
            match position {
                SlotPosition::Before => {
                    std::hint::spin_loop();
                    continue;
                }
                SlotPosition::Inside => {
                    let outcome = if bits[slot] {
                        match op() {
                            Ok(()) => SlotOutcome::Triggered,
                            Err(e) => {
                                warn!("slot {slot}: operation failed: {e}");
                                SlotOutcome::Failed
                            }
                        }
                    } else {
                        SlotOutcome::Silent
                    };
                    outcomes.push(outcome);
                }
                SlotPosition::Past => {
                    if bits[slot] {
                        warn!("slot {slot} missed, bit dropped");
                    }
                    outcomes.push(SlotOutcome::Missed);
                }
            }
            slot += 1;
        }

        let report = TransmitReport {
            outcomes,
            start,
            end: self.counter.now(),
        };
        debug!(
            "transmitted {} slots: {} ops, {} failed, {} missed",
            report.outcomes.len(),
            report.operations(),
            report.failed(),
            report.missed()
        );
        Ok(report)
    }
}

/// `0, 1, 0, 1, ...` of length `n`.
#[must_use]
pub fn alternating_bits(n: usize) -> Vec<bool> {
    (0..n).map(|i| i & 1 == 1).collect()
}
