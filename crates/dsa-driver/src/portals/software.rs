// SPDX-License-Identifier: AGPL-3.0-only

//! Software (in-process) accelerator
//!
//! Executes descriptors on the CPU inside `enqueue` and writes the
//! completion record before returning, exactly as the device would have
//! written it. Fault and back-pressure behaviour is scripted so the client's
//! retry, poll and resume paths can be driven deterministically:
//!
//! - `reject_first(n)`: the first `n` enqueue attempts find the queue full
//! - `fault_after(k)`: the next accepted descriptor stops after `k` bytes
//!   with a write-side page fault (queue several for several submissions)
//! - `fault_every(k)`: every accepted descriptor longer than `k` stops after `k`
//! - `fail_with(code)`: every accepted descriptor completes with `code`
//! - `stall()`: descriptors are accepted but the record is never written
//! - `complete_after(d)`: the record is written from another thread `d`
//!   after acceptance, like a device that takes time

use crate::completion::CompletionRecord;
use crate::portal::{Enqueue, PortalType, SubmissionPortal};
use dsa_hw::opcode::Operation;
use dsa_hw::status::{code, STATUS_WRITE};
use dsa_hw::HwDescriptor;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// Counters kept by the software portal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortalStats {
    /// Every call to `enqueue`
    pub attempts: u64,
    /// Descriptors taken
    pub accepted: u64,
    /// Attempts refused as queue-full
    pub rejected: u64,
    /// Partial completions reported
    pub faults: u64,
}

/// CPU model of a shared work queue.
#[derive(Debug, Default)]
pub struct SoftwarePortal {
    reject_first: u64,
    reject_always: bool,
    scripted_faults: VecDeque<u32>,
    fault_every: Option<u32>,
    fail_with: Option<u8>,
    stall: bool,
    completion_delay: Option<Duration>,
    max_transfer_size: Option<u64>,
    stats: PortalStats,
    history: Vec<HwDescriptor>,
}

impl SoftwarePortal {
    /// Portal that accepts and completes everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the first `n` enqueue attempts.
    #[must_use]
    pub fn reject_first(mut self, n: u64) -> Self {
        self.reject_first = n;
        self
    }

    /// Refuse every enqueue attempt.
    #[must_use]
    pub fn reject_always(mut self) -> Self {
        self.reject_always = true;
        self
    }

    /// Stop the next accepted descriptor after `bytes` bytes.
    #[must_use]
    pub fn fault_after(mut self, bytes: u32) -> Self {
        self.scripted_faults.push_back(bytes);
        self
    }

    /// Stop every accepted descriptor after at most `bytes` bytes.
    #[must_use]
    pub fn fault_every(mut self, bytes: u32) -> Self {
        self.fault_every = Some(bytes);
        self
    }

    /// Complete every accepted descriptor with status `code`.
    #[must_use]
    pub fn fail_with(mut self, status: u8) -> Self {
        self.fail_with = Some(status);
        self
    }

    /// Accept descriptors without ever completing them.
    #[must_use]
    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Write completion records from a separate thread after `delay`.
    #[must_use]
    pub fn complete_after(mut self, delay: Duration) -> Self {
        self.completion_delay = Some(delay);
        self
    }

    /// Reject transfers larger than `bytes` with `XFER_ERANGE`.
    #[must_use]
    pub fn with_max_transfer_size(mut self, bytes: u64) -> Self {
        self.max_transfer_size = Some(bytes);
        self
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> PortalStats {
        self.stats
    }

    /// Accepted descriptors, oldest first.
    #[must_use]
    pub fn history(&self) -> &[HwDescriptor] {
        &self.history
    }

    fn refuses(&self) -> bool {
        self.reject_always || self.stats.rejected < self.reject_first
    }

    /// Bytes to process before faulting, if this descriptor faults.
    fn fault_point(&mut self, xfer: u32) -> Option<u32> {
        let limit = self.scripted_faults.pop_front().or(self.fault_every)?;
        (limit < xfer).then_some(limit)
    }

    /// Carry out `desc` and describe the record the device would write.
    ///
    /// # Safety
    ///
    /// Source and destination of `desc` must be valid for `xfer_size` bytes.
    unsafe fn execute(&mut self, desc: &HwDescriptor) -> (u8, u32, u64) {
        if let Some(status) = self.fail_with {
            return (status, 0, 0);
        }
        let Some(op) = desc.operation() else {
            return (code::BAD_OPCODE, 0, 0);
        };
        if self
            .max_transfer_size
            .is_some_and(|max| u64::from(desc.xfer_size) > max)
        {
            return (code::XFER_ERANGE, 0, 0);
        }

        let fault = match op {
            Operation::Noop => None,
            Operation::Move | Operation::Fill => self.fault_point(desc.xfer_size),
        };
        let done = fault.unwrap_or(desc.xfer_size);

        #[allow(clippy::cast_possible_truncation)]
        let dst = desc.dst_addr as usize as *mut u8;
        let len = done as usize;
        match op {
            Operation::Noop => {}
            // SAFETY: caller guarantees both ranges are valid; ptr::copy
            // tolerates overlap like the device's memmove.
            Operation::Move => unsafe {
                std::ptr::copy(desc.src as usize as *const u8, dst, len);
            },
            Operation::Fill => {
                let pattern = desc.src.to_ne_bytes();
                for (i, byte) in pattern.iter().cycle().take(len).enumerate() {
                    // SAFETY: i < len <= xfer_size, within the destination.
                    unsafe { dst.add(i).write(*byte) };
                }
            }
        }

        match fault {
            Some(bytes) => {
                self.stats.faults += 1;
                (
                    code::PAGE_FAULT_NOBOF | STATUS_WRITE,
                    bytes,
                    desc.dst_addr + u64::from(bytes),
                )
            }
            None => (code::SUCCESS, done, 0),
        }
    }
}

impl SubmissionPortal for SoftwarePortal {
    unsafe fn enqueue(&mut self, desc: &HwDescriptor) -> Enqueue {
        self.stats.attempts += 1;
        if self.refuses() {
            self.stats.rejected += 1;
            trace!("software portal: queue full (attempt {})", self.stats.attempts);
            return Enqueue::Rejected;
        }

        self.stats.accepted += 1;
        self.history.push(*desc);
        if self.stall {
            return Enqueue::Accepted;
        }

        // SAFETY: forwarded enqueue contract.
        let (status, bytes, fault_addr) = unsafe { self.execute(desc) };
        debug!(
            "software portal: {:?} {} bytes -> status {status:#04x}, {bytes} done",
            desc.operation(),
            desc.xfer_size
        );

        if !desc.requests_completion() || desc.completion_addr == 0 {
            return Enqueue::Accepted;
        }
        let addr = desc.completion_addr;
        let publish = move || {
            // SAFETY: the completion address comes from a 32-byte aligned
            // CompletionRecord that stays alive until it turns terminal, per
            // the enqueue contract.
            let record = unsafe { &*(addr as usize as *const CompletionRecord) };
            record.publish(status, bytes, fault_addr);
        };
        match self.completion_delay {
            Some(delay) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    publish();
                });
            }
            None => publish(),
        }
        Enqueue::Accepted
    }

    fn portal_type(&self) -> PortalType {
        PortalType::Software
    }

    fn max_transfer_size(&self) -> Option<u64> {
        self.max_transfer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionOutcome;

    fn submit(portal: &mut SoftwarePortal, desc: &mut HwDescriptor, record: &CompletionRecord) -> Enqueue {
        desc.completion_addr = record.addr();
        record.reset();
        // SAFETY: buffers and record outlive the synchronous call.
        unsafe { portal.enqueue(desc) }
    }

    #[test]
    fn executes_a_fill_synchronously() {
        let mut buf = vec![0u8; 100];
        let mut desc = HwDescriptor::new(Operation::Fill);
        desc.src = u64::from_ne_bytes([0xab; 8]);
        desc.dst_addr = buf.as_mut_ptr() as u64;
        desc.xfer_size = 100;
        let record = CompletionRecord::new();

        let mut portal = SoftwarePortal::new();
        assert_eq!(submit(&mut portal, &mut desc, &record), Enqueue::Accepted);
        assert_eq!(record.outcome(), Some(CompletionOutcome::Success));
        assert_eq!(record.bytes_completed(), 100);
        assert!(buf.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn scripted_fault_stops_early() {
        let src: Vec<u8> = (0..64).collect();
        let mut dst = vec![0u8; 64];
        let mut desc = HwDescriptor::new(Operation::Move);
        desc.src = src.as_ptr() as u64;
        desc.dst_addr = dst.as_mut_ptr() as u64;
        desc.xfer_size = 64;
        let record = CompletionRecord::new();

        let mut portal = SoftwarePortal::new().fault_after(24);
        submit(&mut portal, &mut desc, &record);
        assert_eq!(
            record.outcome(),
            Some(CompletionOutcome::PageFault {
                bytes_completed: 24,
                fault_addr: desc.dst_addr + 24,
                write: true,
            })
        );
        assert_eq!(&dst[..24], &src[..24]);
        assert!(dst[24..].iter().all(|&b| b == 0));
        assert_eq!(portal.stats().faults, 1);
    }

    #[test]
    fn rejections_are_counted() {
        let mut buf = [0u8; 8];
        let mut desc = HwDescriptor::new(Operation::Fill);
        desc.dst_addr = buf.as_mut_ptr() as u64;
        desc.xfer_size = 8;
        let record = CompletionRecord::new();

        let mut portal = SoftwarePortal::new().reject_first(2);
        assert_eq!(submit(&mut portal, &mut desc, &record), Enqueue::Rejected);
        assert_eq!(submit(&mut portal, &mut desc, &record), Enqueue::Rejected);
        assert_eq!(submit(&mut portal, &mut desc, &record), Enqueue::Accepted);
        assert_eq!(
            portal.stats(),
            PortalStats {
                attempts: 3,
                accepted: 1,
                rejected: 2,
                faults: 0
            }
        );
        assert_eq!(portal.history().len(), 1);
    }

    #[test]
    fn unknown_opcode_fails() {
        let mut desc = HwDescriptor::new(Operation::Noop);
        desc.set_opcode(0x3f);
        let record = CompletionRecord::new();

        let mut portal = SoftwarePortal::new();
        submit(&mut portal, &mut desc, &record);
        assert_eq!(record.status().code(), code::BAD_OPCODE);
    }

    #[test]
    fn delayed_completion_arrives_later() {
        let mut buf = [0u8; 8];
        let mut desc = HwDescriptor::new(Operation::Fill);
        desc.dst_addr = buf.as_mut_ptr() as u64;
        desc.xfer_size = 8;
        let record = CompletionRecord::new();

        let mut portal = SoftwarePortal::new().complete_after(Duration::from_millis(10));
        assert_eq!(submit(&mut portal, &mut desc, &record), Enqueue::Accepted);
        while record.outcome().is_none() {
            std::hint::spin_loop();
        }
        assert_eq!(record.outcome(), Some(CompletionOutcome::Success));
    }

    #[test]
    fn stalled_portal_never_completes() {
        let mut buf = [0u8; 8];
        let mut desc = HwDescriptor::new(Operation::Fill);
        desc.dst_addr = buf.as_mut_ptr() as u64;
        desc.xfer_size = 8;
        let record = CompletionRecord::new();

        let mut portal = SoftwarePortal::new().stall();
        assert_eq!(submit(&mut portal, &mut desc, &record), Enqueue::Accepted);
        assert_eq!(record.outcome(), None);
    }
}
