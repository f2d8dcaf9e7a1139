//! CPU primitives used around submission and timing
//!
//! x86-64 gets the real instructions (`ENQCMD`, `SFENCE`, `LFENCE`, `RDTSC`,
//! `CLFLUSH`). Other targets get portable stand-ins so the software portal
//! and the channel logic still build and test everywhere; the hardware
//! portal refuses to open there.

#![allow(clippy::inline_always)]

#[cfg(not(target_arch = "x86_64"))]
use std::sync::atomic::{fence, Ordering};

#[cfg(target_arch = "x86_64")]
use dsa_hw::HwDescriptor;

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{_mm_clflush, _mm_lfence, _mm_sfence, _rdtsc};

/// Whether this build can drive real work queues.
pub const HAS_ENQCMD: bool = cfg!(target_arch = "x86_64");

/// Make earlier stores globally visible before the next enqueue.
#[inline(always)]
pub fn store_fence() {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: SFENCE has no operands and SSE is baseline on x86-64.
    unsafe {
        _mm_sfence();
    }
    #[cfg(not(target_arch = "x86_64"))]
    fence(Ordering::SeqCst);
}

/// Serialize instruction issue around a cycle-counter read.
#[inline(always)]
pub fn load_fence() {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: LFENCE has no operands and SSE2 is baseline on x86-64.
    unsafe {
        _mm_lfence();
    }
    #[cfg(not(target_arch = "x86_64"))]
    fence(Ordering::SeqCst);
}

/// Raw time-stamp counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn rdtsc() -> u64 {
    // SAFETY: RDTSC is unprivileged unless CR4.TSD is set, which Linux does
    // not do for ordinary processes.
    unsafe { _rdtsc() }
}

/// Flush the cache line holding `ptr`.
///
/// # Safety
///
/// `ptr` must point into mapped memory.
#[inline(always)]
pub unsafe fn flush_line(ptr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: caller guarantees ptr is mapped; CLFLUSH is baseline (SSE2).
    unsafe {
        _mm_clflush(ptr);
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = ptr;
        fence(Ordering::SeqCst);
    }
}

/// Submit one descriptor with `ENQCMD`.
///
/// Returns `true` when the queue accepted the descriptor and `false` when
/// the shared queue was full (ZF set). Nothing else is reported.
///
/// # Safety
///
/// `portal` must be the 64-byte-aligned start of a mapped work-queue portal
/// and every address inside `desc` must stay valid until the device writes
/// the completion record.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn enqcmd(portal: *mut u8, desc: &HwDescriptor) -> bool {
    let rejected: u8;
    // ENQCMD rax, [rdx] is encoded by hand: older assemblers lack the mnemonic.
    // SAFETY: caller guarantees portal is a mapped WQ portal; desc is 64 bytes.
    unsafe {
        core::arch::asm!(
            ".byte 0xf2, 0x0f, 0x38, 0xf8, 0x02",
            "setz {rejected}",
            in("rax") portal,
            in("rdx") std::ptr::from_ref(desc),
            rejected = out(reg_byte) rejected,
            options(nostack),
        );
    }
    rejected == 0
}
