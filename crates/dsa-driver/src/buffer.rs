//! Anonymous buffers backed by huge pages
//!
//! Large fills and moves fault far less often on huge pages, and a 1 GiB
//! page lets a whole transfer complete without a single resumption.

use crate::error::{DsaError, Result};
use rustix::mm::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use std::ptr::NonNull;

/// Backing page size of a [`HugePageBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    /// Regular 4 KiB pages
    Normal,
    /// The system's default huge page size (2 MiB on x86-64)
    Huge2M,
    /// 1 GiB huge pages
    Huge1G,
}

impl PageSize {
    /// Page size in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Normal => 4096,
            Self::Huge2M => 2 << 20,
            Self::Huge1G => 1 << 30,
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn map_flags(self) -> MapFlags {
        let extra = match self {
            Self::Normal => 0,
            Self::Huge2M => libc::MAP_HUGETLB as u32,
            Self::Huge1G => (libc::MAP_HUGETLB | libc::MAP_HUGE_1GB) as u32,
        };
        MapFlags::PRIVATE | MapFlags::from_bits_retain(extra)
    }
}

impl std::fmt::Display for PageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "4 KiB"),
            Self::Huge2M => write!(f, "2 MiB"),
            Self::Huge1G => write!(f, "1 GiB"),
        }
    }
}

/// Private anonymous read/write mapping.
#[derive(Debug)]
pub struct HugePageBuffer {
    ptr: NonNull<u8>,
    len: usize,
    mapped: usize,
    page_size: PageSize,
}

impl HugePageBuffer {
    /// Map `len` bytes on pages of `page_size` and touch the first byte.
    ///
    /// # Errors
    ///
    /// Returns `MappingFailed` if `len` is zero or the kernel refuses the
    /// mapping (usually an empty huge page pool).
    pub fn new(len: usize, page_size: PageSize) -> Result<Self> {
        let buf = Self::new_untouched(len, page_size)?;
        // SAFETY: ptr is the start of a fresh writable mapping of >= 1 byte.
        unsafe { buf.ptr.as_ptr().write_volatile(0) };
        Ok(buf)
    }

    /// Map without touching any page, so the first access takes the fault.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn new_untouched(len: usize, page_size: PageSize) -> Result<Self> {
        if len == 0 {
            return Err(DsaError::mapping_failed("zero-length buffer"));
        }
        let mapped = len
            .checked_next_multiple_of(page_size.bytes())
            .ok_or_else(|| DsaError::mapping_failed(format!("{len} bytes overflows page rounding")))?;

        // SAFETY: anonymous mapping with a null hint; the region is owned by
        // the returned value and released in Drop.
        let addr = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                mapped,
                ProtFlags::READ | ProtFlags::WRITE,
                page_size.map_flags(),
            )
        }
        .map_err(|e| DsaError::mapping_failed(format!("{mapped} bytes on {page_size} pages: {e}")))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| DsaError::mapping_failed("mmap returned null"))?;

        tracing::debug!("Mapped {mapped} bytes on {page_size} pages at {ptr:p}");
        Ok(Self {
            ptr,
            len,
            mapped,
            page_size,
        })
    }

    /// Like [`new`](Self::new), falling back to normal pages if huge pages
    /// are unavailable.
    ///
    /// # Errors
    ///
    /// Returns `MappingFailed` only if the normal-page mapping fails too.
    pub fn with_fallback(len: usize, page_size: PageSize) -> Result<Self> {
        match Self::new(len, page_size) {
            Ok(buf) => Ok(buf),
            Err(e) if page_size != PageSize::Normal => {
                tracing::warn!("{e}; falling back to normal pages");
                Self::new(len, PageSize::Normal)
            }
            Err(e) => Err(e),
        }
    }

    /// Requested length.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero-length buffers cannot be built.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing page size.
    #[must_use]
    pub const fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// Start of the buffer.
    #[must_use]
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Buffer contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+len is mapped read/write for the life of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Buffer contents, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HugePageBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/mapped are what mmap returned; no slices outlive self.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.mapped) {
                tracing::error!("munmap of {} byte buffer failed: {e}", self.mapped);
            }
        }
    }
}

// SAFETY: the mapping is exclusively owned; access goes through &self/&mut self.
unsafe impl Send for HugePageBuffer {}
// SAFETY: shared access is read-only.
unsafe impl Sync for HugePageBuffer {}
