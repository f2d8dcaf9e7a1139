//! Completion status byte.
//!
//! Bits 0..6 carry the status code, bit 7 tells whether a page fault hit the
//! write side of the transfer.

/// Mask selecting the status code.
pub const STATUS_MASK: u8 = 0x3F;

/// Set when a reported page fault happened on a write access.
pub const STATUS_WRITE: u8 = 0x80;

/// Status codes written by the device (`DSA_COMP_*`).
pub mod code {
    /// Record not written yet.
    pub const NONE: u8 = 0x00;
    /// Success.
    pub const SUCCESS: u8 = 0x01;
    /// Success with false predicate.
    pub const SUCCESS_PRED: u8 = 0x02;
    /// Page fault, block-on-fault not set: partial completion.
    pub const PAGE_FAULT_NOBOF: u8 = 0x03;
    /// Page fault with interrupt handle.
    pub const PAGE_FAULT_IR: u8 = 0x04;
    /// Batch failure.
    pub const BATCH_FAIL: u8 = 0x05;
    /// Page fault while reading a batch.
    pub const BATCH_PAGE_FAULT: u8 = 0x06;
    /// Invalid opcode.
    pub const BAD_OPCODE: u8 = 0x10;
    /// Invalid flags.
    pub const INVALID_FLAGS: u8 = 0x11;
    /// Reserved field not zero.
    pub const NOZERO_RESERVE: u8 = 0x12;
    /// Transfer size out of range.
    pub const XFER_ERANGE: u8 = 0x13;
    /// Overlapping buffers.
    pub const OVERLAP_BUFFERS: u8 = 0x16;
    /// Completion record address translation failed.
    pub const CRA_XLAT: u8 = 0x1A;
    /// Completion record address misaligned.
    pub const CRA_ALIGN: u8 = 0x1B;
    /// Address misaligned.
    pub const ADDR_ALIGN: u8 = 0x1C;
    /// Privilege violation.
    pub const PRIV_BAD: u8 = 0x1D;
    /// Internal hardware error.
    pub const HW_ERR1: u8 = 0x20;
    /// Address translation failure.
    pub const TRANSLATION_FAIL: u8 = 0x22;
}

/// Coarse classification of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Not written yet.
    Pending,
    /// Operation completed (with or without a true predicate).
    Success,
    /// Recoverable page fault: the remainder can be resubmitted.
    PageFault,
    /// Any other code.
    Failure(u8),
}

/// Raw status byte with decoding helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompletionStatus(pub u8);

impl CompletionStatus {
    /// Raw byte.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Status code without the write bit.
    #[must_use]
    pub const fn code(self) -> u8 {
        self.0 & STATUS_MASK
    }

    /// Whether the device has written the record.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.0 != code::NONE
    }

    /// Whether a fault was reported on the write side.
    #[must_use]
    pub const fn is_write_fault(self) -> bool {
        self.0 & STATUS_WRITE != 0
    }

    /// Classify the status byte.
    #[must_use]
    pub const fn classify(self) -> StatusCode {
        match self.code() {
            code::NONE if self.0 == 0 => StatusCode::Pending,
            code::SUCCESS | code::SUCCESS_PRED => StatusCode::Success,
            code::PAGE_FAULT_NOBOF => StatusCode::PageFault,
            other => StatusCode::Failure(other),
        }
    }

    /// Short name of the status code, for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.code() {
            code::NONE => "none",
            code::SUCCESS => "success",
            code::SUCCESS_PRED => "success (false predicate)",
            code::PAGE_FAULT_NOBOF => "page fault",
            code::PAGE_FAULT_IR => "page fault (interrupt handle)",
            code::BATCH_FAIL => "batch failure",
            code::BATCH_PAGE_FAULT => "batch page fault",
            code::BAD_OPCODE => "invalid opcode",
            code::INVALID_FLAGS => "invalid flags",
            code::NOZERO_RESERVE => "reserved field set",
            code::XFER_ERANGE => "transfer size out of range",
            code::OVERLAP_BUFFERS => "overlapping buffers",
            code::CRA_XLAT => "completion address translation",
            code::CRA_ALIGN => "completion address alignment",
            code::ADDR_ALIGN => "address alignment",
            code::PRIV_BAD => "privilege",
            code::HW_ERR1 => "hardware error",
            code::TRANSLATION_FAIL => "translation failure",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.name())
    }
}
