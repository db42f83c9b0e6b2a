//! Physical page frame allocator.
//!
//! First-fit bitmap allocator over the physical region the boot code hands
//! to [`page_alloc_init`]. Fresh frames leave here with a reference count of
//! one; [`free_page_frame`] is refcount-aware and only returns a frame to
//! the pool once the count drops to zero, so every unmap path can call it
//! unconditionally.

use core::ffi::c_int;

use manta_abi::addr::PhysAddr;
use manta_lib::{IrqMutex, klog_info};

use crate::direct_map::PhysAddrDirect;
use crate::frame_ref::{frame_ref_clear, frame_ref_dec, frame_ref_set_one};
use crate::mm_constants::{MAX_FRAMES, PAGE_SIZE_4KB, PAGE_SIZE_4KB_USIZE};

/// Zero the frame before returning it.
pub const ALLOC_FLAG_ZERO: u32 = 0x01;

const BITMAP_WORDS: usize = MAX_FRAMES / 64;

struct PageAllocator {
    region_base: u32,
    total_frames: u32,
    free_frames: u32,
    next_hint: u32,
    bitmap: [u64; BITMAP_WORDS],
}

impl PageAllocator {
    const fn new() -> Self {
        Self {
            region_base: 0,
            total_frames: 0,
            free_frames: 0,
            next_hint: 0,
            bitmap: [0; BITMAP_WORDS],
        }
    }

    #[inline]
    fn index_of(&self, phys: PhysAddr) -> Option<u32> {
        let addr = phys.as_u32();
        if self.total_frames == 0 || addr < self.region_base {
            return None;
        }
        let idx = (addr - self.region_base) / PAGE_SIZE_4KB;
        if idx < self.total_frames { Some(idx) } else { None }
    }

    #[inline]
    fn is_used(&self, idx: u32) -> bool {
        self.bitmap[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
    }

    #[inline]
    fn mark(&mut self, idx: u32, used: bool) {
        let word = (idx / 64) as usize;
        let bit = 1u64 << (idx % 64);
        if used {
            self.bitmap[word] |= bit;
        } else {
            self.bitmap[word] &= !bit;
        }
    }

    fn take_first_free(&mut self) -> Option<u32> {
        if self.free_frames == 0 {
            return None;
        }
        let total = self.total_frames;
        let mut idx = self.next_hint % total.max(1);
        for _ in 0..total {
            if !self.is_used(idx) {
                self.mark(idx, true);
                self.free_frames -= 1;
                self.next_hint = (idx + 1) % total;
                return Some(idx);
            }
            idx = (idx + 1) % total;
        }
        None
    }
}

static PAGE_ALLOC: IrqMutex<PageAllocator> = IrqMutex::new(PageAllocator::new());

/// Hand the allocator its physical region. `base` must be page-aligned and
/// the region must fit inside the refcount table's coverage.
pub fn page_alloc_init(base: PhysAddr, frame_count: u32) {
    let mut alloc = PAGE_ALLOC.lock();
    let mut count = frame_count.min(MAX_FRAMES as u32);
    let end_index = (base.as_u32() / PAGE_SIZE_4KB).saturating_add(count);
    if end_index > MAX_FRAMES as u32 {
        count = (MAX_FRAMES as u32).saturating_sub(base.as_u32() / PAGE_SIZE_4KB);
    }
    alloc.region_base = base.page_base().as_u32();
    alloc.total_frames = count;
    alloc.free_frames = count;
    alloc.next_hint = 0;
    alloc.bitmap = [0; BITMAP_WORDS];
    klog_info!(
        "page_alloc: {} frames at {:#x}",
        count,
        alloc.region_base
    );
}

/// Allocate one 4KB frame. Returns `PhysAddr::NULL` when the pool is empty.
pub fn alloc_page_frame(flags: u32) -> PhysAddr {
    let phys = {
        let mut alloc = PAGE_ALLOC.lock();
        match alloc.take_first_free() {
            Some(idx) => PhysAddr::new(alloc.region_base + idx * PAGE_SIZE_4KB),
            None => return PhysAddr::NULL,
        }
    };

    frame_ref_set_one(phys);

    if flags & ALLOC_FLAG_ZERO != 0 {
        if let Some(ptr) = phys.try_to_ptr() {
            // SAFETY: the frame was just taken from the free pool and is
            // exclusively ours.
            unsafe { core::ptr::write_bytes(ptr, 0, PAGE_SIZE_4KB_USIZE) };
        }
    }

    phys
}

/// Drop one reference to a frame, returning it to the pool when the count
/// reaches zero. Returns the remaining reference count, or -1 for addresses
/// the allocator does not own.
pub fn free_page_frame(phys: PhysAddr) -> c_int {
    if phys.is_null() {
        return -1;
    }

    let remaining = frame_ref_dec(phys);
    if remaining > 0 {
        return remaining as c_int;
    }

    let mut alloc = PAGE_ALLOC.lock();
    let Some(idx) = alloc.index_of(phys) else {
        klog_info!("free_page_frame: untracked address {:#x}", phys.as_u32());
        return -1;
    };
    if !alloc.is_used(idx) {
        klog_info!("free_page_frame: double free of {:#x}", phys.as_u32());
        return -1;
    }
    alloc.mark(idx, false);
    alloc.free_frames += 1;
    drop(alloc);

    frame_ref_clear(phys);
    0
}

/// Whether the allocator owns this address.
pub fn page_frame_is_tracked(phys: PhysAddr) -> bool {
    PAGE_ALLOC.lock().index_of(phys).is_some()
}

pub fn get_page_allocator_stats(total: &mut u32, free: &mut u32) {
    let alloc = PAGE_ALLOC.lock();
    *total = alloc.total_frames;
    *free = alloc.free_frames;
}
