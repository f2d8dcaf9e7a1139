//! User-space client for Intel DSA shared work queues.
//!
//! Submits memory-move and memory-fill descriptors with `ENQCMD`, polls the
//! completion record and resumes partial completions after page faults.
//! On top of the client sits a timing-slot channel sender that modulates
//! device activity onto a calibrated slot grid.
//!
//! # Portal hierarchy
//!
//! ```text
//! Hardware (x86-64, idxd driver, user/shared WQ):
//!   HardwarePortal  : mapped /dev/dsa/wqX.Y page + ENQCMD
//!
//! Testing / CI:
//!   SoftwarePortal  : executes descriptors on the CPU, scripted faults
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use dsa_driver::{HardwarePortal, WorkQueueClient};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = WorkQueueClient::new(HardwarePortal::open_first()?);
//!
//! let src = vec![0xAAu8; 1 << 20];
//! let mut dst = vec![0u8; 1 << 20];
//! let report = client.memmove(&src, &mut dst)?;
//! println!("{} bytes, {} resumptions", report.requested, report.resumptions());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod arch;
pub mod buffer;
pub mod channel;
mod client;
mod completion;
pub mod config;
pub mod cycles;
mod descriptor;
mod discovery;
mod error;
mod portal;
pub mod portals;
pub mod probe;
pub mod verify;

pub use buffer::{HugePageBuffer, PageSize};
pub use client::{PageFaultStep, TransferReport, WorkQueueClient};
pub use completion::{CompletionOutcome, CompletionRecord};
pub use config::{ChannelConfig, ClientConfig};
pub use cycles::{CycleCounter, Tsc};
pub use descriptor::Descriptor;
pub use discovery::{WorkQueueInfo, WqManager};
pub use error::{DsaError, Result};
pub use portal::{select_portal, Enqueue, PortalSelection, PortalType, SubmissionPortal};
pub use portals::{HardwarePortal, PortalStats, SoftwarePortal};
