//! Completion record layout.
//!
//! ```text
//! offset  size  field
//! 0x00    1     status      (0 = not yet written)
//! 0x01    1     result
//! 0x02    2     reserved
//! 0x04    4     bytes completed
//! 0x08    8     fault address
//! 0x10    16    operation specific
//! ```
//!
//! The record must be 32-byte aligned. The device writes the status byte
//! last, so a nonzero status makes every other field valid.

use bytemuck::{Pod, Zeroable};

/// Size of a DSA completion record.
pub const COMPLETION_SIZE: usize = 32;

/// Required alignment of the completion record address.
pub const COMPLETION_ALIGN: usize = 32;

/// Offset of the status byte.
pub const STATUS_OFFSET: usize = 0x00;
/// Offset of the result byte.
pub const RESULT_OFFSET: usize = 0x01;
/// Offset of the bytes-completed word.
pub const BYTES_COMPLETED_OFFSET: usize = 0x04;
/// Offset of the fault address.
pub const FAULT_ADDR_OFFSET: usize = 0x08;

/// Plain snapshot of a completion record, copied out after the status byte
/// became nonzero.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct HwCompletion {
    /// Raw status byte (see [`crate::status`]).
    pub status: u8,
    /// Operation result (compare operations).
    pub result: u8,
    /// Reserved.
    pub rsvd: u16,
    /// Bytes processed before the operation stopped.
    pub bytes_completed: u32,
    /// Faulting virtual address for page-fault statuses.
    pub fault_addr: u64,
    /// Operation-specific fields.
    pub op_specific: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<HwCompletion>() == COMPLETION_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_layout_matches_offsets() {
        let record = HwCompletion {
            status: 0x83,
            result: 0x01,
            bytes_completed: 0x0102_0304,
            fault_addr: 0xAABB_CCDD_0000_1000,
            ..HwCompletion::default()
        };
        let bytes = bytemuck::bytes_of(&record);
        assert_eq!(bytes[STATUS_OFFSET], 0x83);
        assert_eq!(bytes[RESULT_OFFSET], 0x01);
        assert_eq!(bytes[BYTES_COMPLETED_OFFSET], 0x04);
        assert_eq!(bytes[FAULT_ADDR_OFFSET + 1], 0x10);
    }
}
