//! Physical-to-kernel-pointer translation.
//!
//! This module is the single source of truth for how the kernel reaches
//! physical memory. On the real machine physical RAM is identity-mapped in
//! the kernel window, so the offset is zero; the test harness points it at a
//! simulated arena instead. Everything that writes into a frame (segment
//! copy, stack construction, page tables) goes through here.

use core::sync::atomic::{AtomicUsize, Ordering};

use manta_abi::addr::PhysAddr;
use manta_lib::InitFlag;

static DIRECT_MAP_DELTA: AtomicUsize = AtomicUsize::new(0);
static DIRECT_MAP_INIT: InitFlag = InitFlag::new();

/// Register the physical-to-pointer delta. Called once during boot (with 0
/// on the identity-mapped machine) or by the test harness.
pub fn init(delta: usize) {
    DIRECT_MAP_DELTA.store(delta, Ordering::Release);

    if !DIRECT_MAP_INIT.init_once() {
        panic!("direct map already initialized - init() called twice!");
    }
}

#[inline]
pub fn is_available() -> bool {
    DIRECT_MAP_INIT.is_set()
}

#[inline]
pub fn delta() -> usize {
    debug_assert!(is_available(), "direct map not initialized");
    DIRECT_MAP_DELTA.load(Ordering::Acquire)
}

/// Extension trait adding direct-map translation to `PhysAddr`.
pub trait PhysAddrDirect {
    /// Kernel pointer to the byte at this physical address.
    fn to_ptr(self) -> *mut u8;

    /// As `to_ptr`, but returns `None` before the map is registered or for
    /// the null address.
    fn try_to_ptr(self) -> Option<*mut u8>;
}

impl PhysAddrDirect for PhysAddr {
    #[inline]
    fn to_ptr(self) -> *mut u8 {
        (delta().wrapping_add(self.as_u32() as usize)) as *mut u8
    }

    #[inline]
    fn try_to_ptr(self) -> Option<*mut u8> {
        if self.is_null() || !is_available() {
            return None;
        }
        Some(self.to_ptr())
    }
}

/// Borrow one whole frame as a byte slice.
///
/// # Safety
///
/// The frame must be owned by the caller (allocated and not concurrently
/// aliased as a different type).
pub unsafe fn frame_bytes<'a>(phys: PhysAddr) -> &'a mut [u8] {
    core::slice::from_raw_parts_mut(phys.to_ptr(), crate::mm_constants::PAGE_SIZE_4KB_USIZE)
}
