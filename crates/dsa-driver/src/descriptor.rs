//! Borrow-checked work descriptors
//!
//! [`HwDescriptor`] holds raw addresses. `Descriptor<'a>` ties those
//! addresses to the buffers they came from, so the buffers cannot be dropped
//! or touched by safe code while a submission built from them is alive.

use crate::completion::CompletionRecord;
use crate::error::{DsaError, Result};
use dsa_hw::opcode::{flags, Operation};
use dsa_hw::HwDescriptor;
use std::marker::PhantomData;

/// Descriptor whose buffers are borrowed for `'a`.
#[derive(Debug, Clone)]
pub struct Descriptor<'a> {
    hw: HwDescriptor,
    _buffers: PhantomData<&'a mut [u8]>,
}

fn transfer_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        DsaError::invalid_descriptor(format!("transfer of {len} bytes exceeds the 32-bit size field"))
    })
}

impl<'a> Descriptor<'a> {
    /// Copy `src` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` if the lengths differ or exceed `u32::MAX`.
    pub fn memmove(src: &'a [u8], dst: &'a mut [u8]) -> Result<Self> {
        if src.len() != dst.len() {
            return Err(DsaError::invalid_descriptor(format!(
                "memmove length mismatch: src={} dst={}",
                src.len(),
                dst.len()
            )));
        }
        let mut hw = HwDescriptor::new(Operation::Move);
        hw.xfer_size = transfer_len(dst.len())?;
        hw.src = src.as_ptr() as u64;
        hw.dst_addr = dst.as_mut_ptr() as u64;
        Ok(Self {
            hw,
            _buffers: PhantomData,
        })
    }

    /// Repeat the little-endian 8-byte `pattern` over `dst`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` if `dst` exceeds `u32::MAX` bytes.
    pub fn memfill(dst: &'a mut [u8], pattern: u64) -> Result<Self> {
        let mut hw = HwDescriptor::new(Operation::Fill);
        hw.xfer_size = transfer_len(dst.len())?;
        hw.src = pattern;
        hw.dst_addr = dst.as_mut_ptr() as u64;
        Ok(Self {
            hw,
            _buffers: PhantomData,
        })
    }

    /// Fill with a single repeated byte.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDescriptor` if `dst` exceeds `u32::MAX` bytes.
    pub fn memfill_byte(dst: &'a mut [u8], byte: u8) -> Result<Self> {
        Self::memfill(dst, u64::from_ne_bytes([byte; 8]))
    }

    /// Ask the device to steer destination writes into the CPU cache.
    #[must_use]
    pub fn with_cache_control(mut self, enabled: bool) -> Self {
        self.hw.toggle_flag(flags::CC, enabled);
        self
    }

    /// Underlying hardware descriptor.
    #[must_use]
    pub const fn hw(&self) -> &HwDescriptor {
        &self.hw
    }

    /// Operation encoded in the descriptor.
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        self.hw.operation()
    }

    /// Remaining transfer size.
    #[must_use]
    pub const fn transfer_size(&self) -> u32 {
        self.hw.xfer_size
    }

    /// Point the descriptor at `record` and make sure it asks for one.
    pub(crate) fn attach(&mut self, record: &CompletionRecord) {
        self.hw.completion_addr = record.addr();
        self.hw.set_flags(self.hw.flags() | flags::POLLED);
    }

    /// Shrink the transfer to at most `max` bytes and return how many were
    /// held back. [`restore`](Self::restore) gives them back.
    pub(crate) fn hold_back(&mut self, max: Option<u32>) -> u32 {
        match max {
            Some(max) if max > 0 && self.hw.xfer_size > max => {
                let held = self.hw.xfer_size - max;
                self.hw.xfer_size = max;
                held
            }
            _ => 0,
        }
    }

    /// Re-append bytes taken by [`hold_back`](Self::hold_back).
    pub(crate) fn restore(&mut self, held: u32) {
        self.hw.xfer_size += held;
    }

    /// Skip the first `bytes` of the transfer after a partial completion.
    ///
    /// Fill patterns are rotated so the destination keeps the pattern phase
    /// it would have had without the fault.
    pub(crate) fn advance(&mut self, bytes: u32) -> Result<()> {
        if bytes > self.hw.xfer_size {
            return Err(DsaError::invalid_descriptor(format!(
                "device reported {bytes} bytes completed of {} remaining",
                self.hw.xfer_size
            )));
        }
        self.hw.dst_addr += u64::from(bytes);
        match self.hw.operation() {
            Some(Operation::Move) => self.hw.src += u64::from(bytes),
            Some(Operation::Fill) => {
                let phase = (bytes % 8) * 8;
                self.hw.src = if cfg!(target_endian = "little") {
                    self.hw.src.rotate_right(phase)
                } else {
                    self.hw.src.rotate_left(phase)
                };
            }
            Some(Operation::Noop) | None => {}
        }
        self.hw.xfer_size -= bytes;
        Ok(())
    }
}
