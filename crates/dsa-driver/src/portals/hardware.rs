
//! Mapped work-queue portal
//!
//! Opens `/dev/dsa/wqX.Y`, maps its 4 KiB submission page write-only and
//! submits descriptors with `ENQCMD`. The kernel driver binds the process
//! PASID on open, so descriptors carry plain virtual addresses.

use crate::arch;
use crate::discovery::{WorkQueueInfo, WqManager};
use crate::error::{DsaError, Result};
use crate::portal::{Enqueue, PortalType, SubmissionPortal};
use dsa_hw::wq::PORTAL_SIZE;
use dsa_hw::HwDescriptor;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Write-only mapping of a shared work queue's submission page.
#[derive(Debug)]
pub struct HardwarePortal {
    ptr: NonNull<u8>,
    path: PathBuf,
    max_transfer_size: Option<u64>,
    _file: File,
}

impl HardwarePortal {
    /// Map the portal of a discovered queue.
    ///
    /// # Errors
    ///
    /// See [`HardwarePortal::open_path`].
    pub fn open(info: &WorkQueueInfo) -> Result<Self> {
        let mut portal = Self::open_path(&info.dev_path)?;
        portal.max_transfer_size = (info.max_transfer_size > 0).then_some(info.max_transfer_size);
        Ok(portal)
    }

    /// Map the portal of the queue at `path`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the device file is missing,
    /// `Unsupported` off x86-64 and `MappingFailed` if open or mmap fails
    /// (typically a permission problem or a disabled queue).
    pub fn open_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DsaError::device_not_found(path));
        }
        if !arch::HAS_ENQCMD {
            return Err(DsaError::unsupported("ENQCMD submission requires x86-64"));
        }

        tracing::debug!("Mapping work-queue portal: {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DsaError::mapping_failed(format!("Cannot open {}: {e}", path.display())))?;

        // SAFETY: the fd was just opened and outlives the mapping (stored in
        // the struct). PORTAL_SIZE is the page the driver exposes at offset
        // 0; the mapping is released in Drop and never exposed as a slice.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                PORTAL_SIZE,
                ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::POPULATE,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| DsaError::mapping_failed(format!("mmap of {} failed: {e}", path.display())))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| DsaError::mapping_failed("mmap returned a null portal"))?;

        tracing::info!("Mapped portal {} at {ptr:p}", path.display());

        Ok(Self {
            ptr,
            path: path.to_path_buf(),
            max_transfer_size: None,
            _file: file,
        })
    }

    /// Map the first usable queue.
    ///
    /// `DSA_WQ_PATH` short-circuits discovery.
    ///
    /// # Errors
    ///
    /// Returns `NoDeviceAvailable` if discovery finds no usable queue, or
    /// any error from [`HardwarePortal::open_path`].
    pub fn open_first() -> Result<Self> {
        if let Some(path) = crate::config::wq_path_override() {
            tracing::info!("Using work queue from {}: {}", crate::config::ENV_WQ_PATH, path.display());
            return Self::open_path(&path);
        }

        let manager = WqManager::discover()?;
        let info = manager.first_usable()?;
        tracing::info!("Selected work queue {} on {}", info.name, info.device);
        Self::open(info)
    }

    /// Device file backing this portal.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SubmissionPortal for HardwarePortal {
    unsafe fn enqueue(&mut self, desc: &HwDescriptor) -> Enqueue {
        // SAFETY: ptr is the start of the mapped portal page (page aligned);
        // the caller upholds the descriptor address contract.
        #[cfg(target_arch = "x86_64")]
        let accepted = unsafe { arch::enqcmd(self.ptr.as_ptr(), desc) };

        // open_path refuses to build a portal on these targets
        #[cfg(not(target_arch = "x86_64"))]
        let accepted = {
            let _ = desc;
            false
        };

        if accepted {
            Enqueue::Accepted
        } else {
            Enqueue::Rejected
        }
    }

    fn portal_type(&self) -> PortalType {
        PortalType::Hardware
    }

    fn max_transfer_size(&self) -> Option<u64> {
        self.max_transfer_size
    }
}

impl Drop for HardwarePortal {
    fn drop(&mut self) {
        // SAFETY: ptr/PORTAL_SIZE are exactly what mmap returned and the
        // mapping is not referenced anywhere else.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), PORTAL_SIZE) {
                tracing::error!("munmap of portal {} failed: {e}", self.path.display());
            }
        }
    }
}

// SAFETY: the portal page is only written through `&mut self`; moving the
// mapping between threads is fine because ENQCMD carries the process PASID.
unsafe impl Send for HardwarePortal {}
