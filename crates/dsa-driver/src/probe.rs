//! Memory access latency probes
//!
//! Single timed loads that show where a byte currently lives: not yet
//! mapped (page fault), flushed to DRAM, or in cache. After an accelerator
//! fill the same probe shows whether the device left the written lines in
//! the CPU cache.

use crate::arch;
use crate::completion::CompletionOutcome;
use crate::cycles::CycleCounter;
use crate::descriptor::Descriptor;
use crate::error::{DsaError, Result};
use crate::portal::SubmissionPortal;
use crate::verify::write_chunk_size;
use crate::WorkQueueClient;

/// Cycles for one load in three cache states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessLatencies {
    /// First access to an untouched page
    pub first_touch: u64,
    /// Access right after flushing the line
    pub after_flush: u64,
    /// Access to a line just loaded
    pub cached: u64,
}

/// Result of a fill followed by edge probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillProbe {
    /// The fill completed in one submission.
    Completed {
        /// Cycles to load the last byte
        last_byte: u64,
        /// Cycles to load the first byte
        first_byte: u64,
    },
    /// The fill stopped on a page fault.
    Partial {
        /// Bytes written before the fault
        bytes_completed: u32,
        /// Write granularity inferred from `bytes_completed`
        write_chunk: Option<u32>,
    },
}

/// Time one volatile load from `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for reads.
pub unsafe fn timed_load<C: CycleCounter + ?Sized>(counter: &C, ptr: *const u8) -> u64 {
    let start = counter.now();
    // SAFETY: forwarded contract.
    let value = unsafe { ptr.read_volatile() };
    let end = counter.now();
    std::hint::black_box(value);
    end.saturating_sub(start)
}

/// Probe the first three bytes of `buf`, which must not have been touched
/// yet for `first_touch` to include the page fault.
///
/// # Errors
///
/// Returns `InvalidDescriptor` if `buf` is shorter than 3 bytes.
pub fn probe_access<C: CycleCounter + ?Sized>(counter: &C, buf: &[u8]) -> Result<AccessLatencies> {
    if buf.len() < 3 {
        return Err(DsaError::invalid_descriptor("probe buffer needs at least 3 bytes"));
    }
    let base = buf.as_ptr();

    // SAFETY: all offsets are < buf.len().
    unsafe {
        let first_touch = timed_load(counter, base);

        arch::flush_line(base.add(1));
        arch::load_fence();
        let after_flush = timed_load(counter, base.add(1));

        std::hint::black_box(base.add(2).read_volatile());
        let cached = timed_load(counter, base.add(2));

        Ok(AccessLatencies {
            first_touch,
            after_flush,
            cached,
        })
    }
}

/// Fill `buf` with `pattern` in a single submission, then time loads of the
/// last and the first byte.
///
/// # Errors
///
/// Returns `OperationFailed` for non-recoverable statuses and the client's
/// submission errors.
pub fn probe_fill<P, C>(
    client: &mut WorkQueueClient<P>,
    counter: &C,
    buf: &mut [u8],
    pattern: u64,
) -> Result<FillProbe>
where
    P: SubmissionPortal,
    C: CycleCounter + ?Sized,
{
    if buf.is_empty() {
        return Err(DsaError::invalid_descriptor("probe buffer is empty"));
    }
    buf[0] = 0;

    match client.submit_once(Descriptor::memfill(buf, pattern)?)? {
        CompletionOutcome::Success => {
            let base = buf.as_ptr();
            // SAFETY: both offsets are inside buf.
            let (last_byte, first_byte) = unsafe {
                (
                    timed_load(counter, base.add(buf.len() - 1)),
                    timed_load(counter, base),
                )
            };
            Ok(FillProbe::Completed {
                last_byte,
                first_byte,
            })
        }
        CompletionOutcome::PageFault {
            bytes_completed, ..
        } => Ok(FillProbe::Partial {
            bytes_completed,
            write_chunk: write_chunk_size(bytes_completed),
        }),
        CompletionOutcome::Failed {
            status,
            bytes_completed,
        } => Err(DsaError::OperationFailed {
            status,
            bytes_completed,
        }),
    }
}
