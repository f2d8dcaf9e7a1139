//! Submission portal abstraction
//!
//! A portal accepts or rejects one 64-byte descriptor at a time and reports
//! nothing else. The hardware portal is an `ENQCMD` to a mapped work-queue
//! page; the software portal executes descriptors on the CPU so the client
//! protocol can be exercised without an accelerator.

use crate::error::Result;
use dsa_hw::HwDescriptor;
use std::fmt::Debug;

/// Outcome of one enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// The queue took the descriptor.
    Accepted,
    /// The shared queue was full; the identical write may be retried.
    Rejected,
}

/// Write-only channel to an accelerator work queue.
pub trait SubmissionPortal: Debug {
    /// Try to place `desc` in the queue.
    ///
    /// # Safety
    ///
    /// Every address in `desc` (source, destination, completion record) must
    /// stay valid and unaliased by other writers until the completion record
    /// becomes terminal. The device acts on raw virtual addresses.
    unsafe fn enqueue(&mut self, desc: &HwDescriptor) -> Enqueue;

    /// Portal kind, for logs.
    fn portal_type(&self) -> PortalType;

    /// Largest transfer the queue accepts, when known.
    fn max_transfer_size(&self) -> Option<u64> {
        None
    }
}

impl<P: SubmissionPortal + ?Sized> SubmissionPortal for Box<P> {
    unsafe fn enqueue(&mut self, desc: &HwDescriptor) -> Enqueue {
        // SAFETY: forwarded contract.
        unsafe { (**self).enqueue(desc) }
    }

    fn portal_type(&self) -> PortalType {
        (**self).portal_type()
    }

    fn max_transfer_size(&self) -> Option<u64> {
        (**self).max_transfer_size()
    }
}

/// Portal type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalType {
    /// Mapped work-queue portal (`ENQCMD`)
    Hardware,

    /// In-process accelerator model
    Software,
}

impl std::fmt::Display for PortalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "Hardware (ENQCMD)"),
            Self::Software => write!(f, "Software"),
        }
    }
}

/// Portal selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalSelection {
    /// Hardware when a usable queue exists, software otherwise
    Auto,

    /// Force the hardware portal
    Hardware,

    /// Force the software portal
    Software,
}

/// Open a portal according to `selection`.
///
/// # Errors
///
/// Returns the hardware portal's error when hardware is forced and no queue
/// can be mapped.
pub fn select_portal(selection: PortalSelection) -> Result<Box<dyn SubmissionPortal>> {
    use crate::portals::{HardwarePortal, SoftwarePortal};

    match selection {
        PortalSelection::Auto => match HardwarePortal::open_first() {
            Ok(portal) => {
                tracing::info!("Using hardware portal {}", portal.path().display());
                Ok(Box::new(portal))
            }
            Err(e) => {
                tracing::info!("Hardware portal unavailable ({e}), using software portal");
                Ok(Box::new(SoftwarePortal::new()))
            }
        },
        PortalSelection::Hardware => {
            HardwarePortal::open_first().map(|p| Box::new(p) as Box<dyn SubmissionPortal>)
        }
        PortalSelection::Software => Ok(Box::new(SoftwarePortal::new())),
    }
}
