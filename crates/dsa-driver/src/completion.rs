//! Completion record shared between the CPU and the accelerator
//!
//! The record is written by the device (or the software portal) and read by
//! the submitting thread. Every field is an atomic so the polling side can
//! read it without tearing; the status byte is the publication point:
//! writers store it last with `Release`, the poller loads it with `Acquire`.

use dsa_hw::completion::{COMPLETION_ALIGN, COMPLETION_SIZE};
use dsa_hw::status::code;
use dsa_hw::{CompletionStatus, StatusCode};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// 32-byte aligned completion record.
#[repr(C, align(32))]
#[derive(Debug, Default)]
pub struct CompletionRecord {
    status: AtomicU8,
    result: AtomicU8,
    rsvd: [u8; 2],
    bytes_completed: AtomicU32,
    fault_addr: AtomicU64,
    op_specific: [AtomicU64; 2],
}

const _: () = assert!(std::mem::size_of::<CompletionRecord>() == COMPLETION_SIZE);
const _: () = assert!(std::mem::align_of::<CompletionRecord>() == COMPLETION_ALIGN);

impl CompletionRecord {
    /// Fresh record with status 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address to place in a descriptor.
    #[must_use]
    pub fn addr(&self) -> u64 {
        std::ptr::from_ref(self) as u64
    }

    /// Return to the idle state before a (re)submission.
    ///
    /// Only the status byte matters: the other fields are read after a
    /// nonzero status is observed and are always rewritten with it.
    pub fn reset(&self) {
        self.status.store(code::NONE, Ordering::Release);
    }

    /// Status byte as seen by the poller.
    pub fn status(&self) -> CompletionStatus {
        CompletionStatus(self.status.load(Ordering::Acquire))
    }

    /// Bytes completed, valid once the status is terminal.
    pub fn bytes_completed(&self) -> u32 {
        self.bytes_completed.load(Ordering::Relaxed)
    }

    /// Fault address, valid for page-fault statuses.
    pub fn fault_addr(&self) -> u64 {
        self.fault_addr.load(Ordering::Relaxed)
    }

    /// Operation result byte.
    pub fn result(&self) -> u8 {
        self.result.load(Ordering::Relaxed)
    }

    /// Publish a terminal record. Payload first, status last.
    pub fn publish(&self, status: u8, bytes_completed: u32, fault_addr: u64) {
        self.bytes_completed.store(bytes_completed, Ordering::Relaxed);
        self.fault_addr.store(fault_addr, Ordering::Relaxed);
        self.status.store(status, Ordering::Release);
    }

    /// Decode the record. `None` while pending.
    pub fn outcome(&self) -> Option<CompletionOutcome> {
        let status = self.status();
        match status.classify() {
            StatusCode::Pending => None,
            StatusCode::Success => Some(CompletionOutcome::Success),
            StatusCode::PageFault => Some(CompletionOutcome::PageFault {
                bytes_completed: self.bytes_completed(),
                fault_addr: self.fault_addr(),
                write: status.is_write_fault(),
            }),
            StatusCode::Failure(_) => Some(CompletionOutcome::Failed {
                status,
                bytes_completed: self.bytes_completed(),
            }),
        }
    }
}

/// Terminal state of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The whole transfer completed.
    Success,
    /// Recoverable fault; `bytes_completed` bytes were processed.
    PageFault {
        /// Bytes processed before the fault
        bytes_completed: u32,
        /// Faulting virtual address
        fault_addr: u64,
        /// Fault hit the write side of the transfer
        write: bool,
    },
    /// Non-recoverable status.
    Failed {
        /// Raw status byte
        status: CompletionStatus,
        /// Bytes processed before the failure
        bytes_completed: u32,
    },
}
