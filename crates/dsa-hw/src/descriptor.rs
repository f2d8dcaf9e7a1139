//! 64-byte work descriptor.
//!
//! ```text
//! offset  size  field
//! 0x00    4     pasid:20 | rsvd:11 | priv:1
//! 0x04    4     flags:24 | opcode:8
//! 0x08    8     completion record address
//! 0x10    8     source address  (fill: 8-byte pattern)
//! 0x18    8     destination address
//! 0x20    4     transfer size
//! 0x24    2     interrupt handle
//! 0x26    2     reserved
//! 0x28    24    operation specific
//! ```

use crate::opcode::{flags, Operation};
use bytemuck::{Pod, Zeroable};

/// Size of one descriptor as consumed by `ENQCMD` / `MOVDIR64B`.
pub const DESCRIPTOR_SIZE: usize = 64;

/// Raw hardware descriptor.
///
/// All address fields are virtual addresses in the submitter's address space
/// (shared virtual memory); the accelerator resolves them through the IOMMU.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HwDescriptor {
    /// PASID (bits 0..20) and privilege bit (31). Zero for `ENQCMD`: the
    /// PASID is supplied by the CPU from `IA32_PASID`.
    pub pasid_priv: u32,
    /// Flags (bits 0..24) and opcode (bits 24..32).
    pub flags_opcode: u32,
    /// Completion record address.
    pub completion_addr: u64,
    /// Source address, or the fill pattern for [`Operation::Fill`].
    pub src: u64,
    /// Destination address.
    pub dst_addr: u64,
    /// Transfer size in bytes.
    pub xfer_size: u32,
    /// Interrupt handle (unused when polling).
    pub int_handle: u16,
    /// Reserved, must be zero.
    pub rsvd: u16,
    /// Operation-specific fields.
    pub op_specific: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<HwDescriptor>() == DESCRIPTOR_SIZE);

impl HwDescriptor {
    /// Zeroed descriptor for `op` with the polling flags set.
    #[must_use]
    pub fn new(op: Operation) -> Self {
        let mut desc = Self::zeroed();
        desc.set_opcode(op.opcode());
        desc.set_flags(flags::POLLED);
        desc
    }

    /// Opcode byte.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        (self.flags_opcode >> 24) as u8
    }

    /// Decoded operation, if the opcode is one this crate models.
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        Operation::from_opcode(self.opcode())
    }

    /// Replace the opcode, keeping the flags.
    pub fn set_opcode(&mut self, opcode: u8) {
        self.flags_opcode = (self.flags_opcode & flags::MASK) | (u32::from(opcode) << 24);
    }

    /// 24-bit flag field.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        self.flags_opcode & flags::MASK
    }

    /// Replace the flag field, keeping the opcode. Bits above 24 are dropped.
    pub fn set_flags(&mut self, value: u32) {
        self.flags_opcode = (self.flags_opcode & !flags::MASK) | (value & flags::MASK);
    }

    /// Set or clear a single flag.
    pub fn toggle_flag(&mut self, flag: u32, enabled: bool) {
        let current = self.flags();
        let next = if enabled { current | flag } else { current & !flag };
        self.set_flags(next);
    }

    /// Whether the descriptor asks for a completion record at a valid address.
    #[must_use]
    pub const fn requests_completion(&self) -> bool {
        self.flags() & flags::POLLED == flags::POLLED
    }

    /// View as the 64 bytes written to the portal.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DESCRIPTOR_SIZE] {
        bytemuck::cast_ref(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_match_idxd_header() {
        let mut desc = HwDescriptor::zeroed();
        desc.completion_addr = 0x1111_1111_1111_1111;
        desc.src = 0x2222_2222_2222_2222;
        desc.dst_addr = 0x3333_3333_3333_3333;
        desc.xfer_size = 0x4444_4444;
        let bytes = desc.as_bytes();
        assert_eq!(bytes[0x08], 0x11);
        assert_eq!(bytes[0x10], 0x22);
        assert_eq!(bytes[0x18], 0x33);
        assert_eq!(bytes[0x20], 0x44);
        assert_eq!(bytes[0x24], 0x00);
    }

    #[test]
    fn opcode_lives_in_the_top_byte() {
        let desc = HwDescriptor::new(Operation::Fill);
        assert_eq!(desc.as_bytes()[7], crate::opcode::MEMFILL);
        assert_eq!(desc.flags(), flags::POLLED);
        assert!(desc.requests_completion());
    }

    #[test]
    fn flag_updates_keep_the_opcode() {
        let mut desc = HwDescriptor::new(Operation::Move);
        desc.toggle_flag(flags::CC, true);
        assert_eq!(desc.operation(), Some(Operation::Move));
        assert_eq!(desc.flags() & flags::CC, flags::CC);

        desc.toggle_flag(flags::CC, false);
        assert_eq!(desc.flags(), flags::POLLED);

        desc.set_flags(u32::MAX);
        assert_eq!(desc.opcode(), crate::opcode::MEMMOVE);
    }
}
