//! Hardware ABI model for the Intel Data Streaming Accelerator (DSA).
//!
//! This crate performs **no hardware access**. It is a pure model of what the
//! accelerator expects in memory and what it writes back: descriptor layout,
//! completion record layout, opcodes, flag bits, status codes and the
//! work-queue naming used by the `idxd` kernel driver.
//!
//! Layouts follow `include/uapi/linux/idxd.h`.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`opcode`] | Operation codes and descriptor flag bits |
//! | [`descriptor`] | 64-byte `HwDescriptor` (bytemuck `Pod`) |
//! | [`completion`] | Completion record layout and alignment |
//! | [`status`] | Status byte decoding (`CompletionStatus`) |
//! | [`wq`] | Portal size, sysfs/devfs paths, queue type/mode |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod completion;
pub mod descriptor;
pub mod opcode;
pub mod status;
pub mod wq;

pub use descriptor::HwDescriptor;
pub use status::{CompletionStatus, StatusCode};
