//! Operation codes and descriptor flag bits.
//!
//! The descriptor's second dword packs `flags` in bits 0..24 and the opcode
//! in bits 24..32.

// ── Operation codes ──────────────────────────────────────────────────────────

/// No operation. Still writes a completion record when requested.
pub const NOOP: u8 = 0x00;
/// Batch of descriptors.
pub const BATCH: u8 = 0x01;
/// Drain outstanding descriptors.
pub const DRAIN: u8 = 0x02;
/// Memory move: copy `xfer_size` bytes from source to destination.
pub const MEMMOVE: u8 = 0x03;
/// Memory fill: repeat the 8-byte pattern over `xfer_size` destination bytes.
pub const MEMFILL: u8 = 0x04;
/// Memory compare.
pub const COMPARE: u8 = 0x05;
/// Compare against pattern.
pub const COMPVAL: u8 = 0x06;

/// Operations this workspace builds descriptors for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`NOOP`]
    Noop,
    /// [`MEMMOVE`]
    Move,
    /// [`MEMFILL`]
    Fill,
}

impl Operation {
    /// Opcode byte written into the descriptor.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Noop => NOOP,
            Self::Move => MEMMOVE,
            Self::Fill => MEMFILL,
        }
    }

    /// Decode an opcode byte. Unknown opcodes return `None`.
    #[must_use]
    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            NOOP => Some(Self::Noop),
            MEMMOVE => Some(Self::Move),
            MEMFILL => Some(Self::Fill),
            _ => None,
        }
    }

    /// Whether the source field carries an address (as opposed to a pattern).
    #[must_use]
    pub const fn has_source_address(self) -> bool {
        matches!(self, Self::Move)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Noop => write!(f, "noop"),
            Self::Move => write!(f, "memmove"),
            Self::Fill => write!(f, "memfill"),
        }
    }
}

// ── Descriptor flags ─────────────────────────────────────────────────────────

/// Descriptor flag bits (24-bit field).
pub mod flags {
    /// Fence: wait for earlier descriptors in the batch.
    pub const FENCE: u32 = 0x0001;
    /// Block on fault instead of reporting a partial completion.
    pub const BLOCK_ON_FAULT: u32 = 0x0002;
    /// Completion record address valid.
    pub const CRAV: u32 = 0x0004;
    /// Request completion record.
    pub const RCR: u32 = 0x0008;
    /// Request completion interrupt.
    pub const RCI: u32 = 0x0010;
    /// Completion record steering.
    pub const CRSTS: u32 = 0x0020;
    /// Check result.
    pub const CR: u32 = 0x0040;
    /// Cache control: direct destination writes into the CPU cache.
    pub const CC: u32 = 0x0080;

    /// Mask of the bits that fit in the descriptor flag field.
    pub const MASK: u32 = 0x00FF_FFFF;

    /// Flags required for the polling protocol: the device must write a
    /// completion record to a valid address.
    pub const POLLED: u32 = RCR | CRAV;
}
