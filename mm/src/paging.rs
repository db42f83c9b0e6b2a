//! Two-level i386 page tables.
//!
//! A process page directory is one frame of 1024 entries, each naming a page
//! table frame that maps 4MB of address space. The tables live in frames
//! from [`crate::page_alloc`] and are read and written through the direct
//! map, so this layer works identically on the real machine and under the
//! hosted test harness.
//!
//! Leaf frames are owned by the VMA layer; teardown here only releases the
//! page-table tree itself.

use core::ffi::c_int;
use core::ptr;

use alloc::boxed::Box;

use manta_abi::addr::{PhysAddr, VirtAddr};
use manta_lib::klog_info;

use crate::direct_map::PhysAddrDirect;
use crate::mm_constants::PAGE_SIZE_4KB;
use crate::page_alloc::{ALLOC_FLAG_ZERO, alloc_page_frame, free_page_frame};
use crate::paging_defs::{PAGE_TABLE_ENTRIES, PageFlags};

/// One page directory or page table: 1024 32-bit entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [u32; PAGE_TABLE_ENTRIES],
}

impl PageTable {
    #[inline]
    pub fn entry(&self, idx: usize) -> u32 {
        self.entries[idx]
    }

    #[inline]
    pub fn set_entry(&mut self, idx: usize, value: u32) {
        self.entries[idx] = value;
    }

    pub fn zero(&mut self) {
        self.entries = [0; PAGE_TABLE_ENTRIES];
    }
}

/// A process's top-level translation structure.
#[repr(C)]
pub struct ProcessPageDir {
    pub dir_phys: PhysAddr,
    pub process_id: u32,
}

unsafe impl Send for ProcessPageDir {}
unsafe impl Sync for ProcessPageDir {}

#[inline]
fn dir_index(vaddr: VirtAddr) -> usize {
    (vaddr.as_u32() >> 22) as usize
}

#[inline]
fn table_index(vaddr: VirtAddr) -> usize {
    ((vaddr.as_u32() >> 12) & 0x3FF) as usize
}

#[inline]
fn table_ptr(phys: PhysAddr) -> *mut PageTable {
    phys.to_ptr() as *mut PageTable
}

#[cfg(target_arch = "x86")]
#[inline]
fn flush_tlb_page(vaddr: VirtAddr) {
    unsafe {
        core::arch::asm!("invlpg [{0}]", in(reg) vaddr.as_u32(), options(nostack, preserves_flags));
    }
}

#[cfg(not(target_arch = "x86"))]
#[inline]
fn flush_tlb_page(_vaddr: VirtAddr) {}

/// Create an empty user page directory. Returns null if a frame or the
/// descriptor cannot be allocated.
pub fn create_user_page_dir(process_id: u32) -> *mut ProcessPageDir {
    let dir_phys = alloc_page_frame(ALLOC_FLAG_ZERO);
    if dir_phys.is_null() {
        klog_info!("create_user_page_dir: no frame for directory");
        return ptr::null_mut();
    }

    let pd = Box::new(ProcessPageDir {
        dir_phys,
        process_id,
    });
    Box::into_raw(pd)
}

/// Fetch (optionally creating) the page table covering `vaddr`.
fn table_for(page_dir: *mut ProcessPageDir, vaddr: VirtAddr, create: bool) -> *mut PageTable {
    if page_dir.is_null() {
        return ptr::null_mut();
    }
    let dir = unsafe { &mut *table_ptr((*page_dir).dir_phys) };
    let di = dir_index(vaddr);
    let entry = dir.entry(di);

    if entry & PageFlags::PRESENT.bits() != 0 {
        return table_ptr(PhysAddr::new(PageFlags::extract_address(entry)));
    }

    if !create {
        return ptr::null_mut();
    }

    let table_phys = alloc_page_frame(ALLOC_FLAG_ZERO);
    if table_phys.is_null() {
        return ptr::null_mut();
    }
    // Intermediate entries carry the widest permissions; the leaf PTE is
    // what actually enforces protection.
    let dir_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
    dir.set_entry(di, table_phys.as_u32() | dir_flags.bits());
    table_ptr(table_phys)
}

/// Map one 4KB page in the given directory. An existing mapping at `vaddr`
/// is overwritten (COW resolution relies on this).
pub fn map_page_in_dir(
    page_dir: *mut ProcessPageDir,
    vaddr: VirtAddr,
    phys: PhysAddr,
    flags: PageFlags,
) -> c_int {
    if page_dir.is_null() || phys.is_null() || !vaddr.is_aligned(PAGE_SIZE_4KB) {
        return -1;
    }
    let table = table_for(page_dir, vaddr, true);
    if table.is_null() {
        return -1;
    }
    let table = unsafe { &mut *table };
    table.set_entry(
        table_index(vaddr),
        phys.page_base().as_u32() | flags.bits(),
    );
    flush_tlb_page(vaddr);
    0
}

/// Remove the mapping for one page. Returns -1 if nothing was mapped.
/// The frame itself is not freed; that is the caller's decision, made
/// through the frame refcounter.
pub fn unmap_page_in_dir(page_dir: *mut ProcessPageDir, vaddr: VirtAddr) -> c_int {
    let table = table_for(page_dir, vaddr, false);
    if table.is_null() {
        return -1;
    }
    let table = unsafe { &mut *table };
    let ti = table_index(vaddr);
    if table.entry(ti) & PageFlags::PRESENT.bits() == 0 {
        return -1;
    }
    table.set_entry(ti, 0);
    flush_tlb_page(vaddr);
    0
}

/// Query the frame backing `vaddr`. `PhysAddr::NULL` when not present.
pub fn virt_to_phys_in_dir(page_dir: *mut ProcessPageDir, vaddr: VirtAddr) -> PhysAddr {
    let table = table_for(page_dir, vaddr, false);
    if table.is_null() {
        return PhysAddr::NULL;
    }
    let entry = unsafe { (*table).entry(table_index(vaddr)) };
    if entry & PageFlags::PRESENT.bits() == 0 {
        return PhysAddr::NULL;
    }
    PhysAddr::new(PageFlags::extract_address(entry))
}

/// Flags of the PTE covering `vaddr`, if present.
pub fn paging_get_pte_flags(page_dir: *mut ProcessPageDir, vaddr: VirtAddr) -> Option<PageFlags> {
    let table = table_for(page_dir, vaddr, false);
    if table.is_null() {
        return None;
    }
    let entry = unsafe { (*table).entry(table_index(vaddr)) };
    if entry & PageFlags::PRESENT.bits() == 0 {
        return None;
    }
    Some(PageFlags::from_bits_truncate(
        entry & !PageFlags::ADDRESS_MASK,
    ))
}

/// Mark a present page copy-on-write: read-only with the COW bit.
pub fn paging_mark_cow(page_dir: *mut ProcessPageDir, vaddr: VirtAddr) -> c_int {
    let table = table_for(page_dir, vaddr, false);
    if table.is_null() {
        return -1;
    }
    let table = unsafe { &mut *table };
    let ti = table_index(vaddr);
    let entry = table.entry(ti);
    if entry & PageFlags::PRESENT.bits() == 0 {
        return -1;
    }
    let new_entry = (entry & !PageFlags::WRITABLE.bits()) | PageFlags::COW.bits();
    table.set_entry(ti, new_entry);
    flush_tlb_page(vaddr);
    0
}

pub fn paging_is_cow(page_dir: *mut ProcessPageDir, vaddr: VirtAddr) -> bool {
    matches!(
        paging_get_pte_flags(page_dir, vaddr),
        Some(flags) if flags.contains(PageFlags::COW)
    )
}

/// Rewrite the protection bits of every resident PTE in `[start, end)`.
///
/// COW PTEs are left untouched: they must stay read-only until the next
/// write fault resolves the copy, or two address spaces would scribble on a
/// shared frame.
pub fn paging_update_range_protection(
    page_dir: *mut ProcessPageDir,
    start: VirtAddr,
    end: VirtAddr,
    prot: PageFlags,
) {
    let mut addr = start.page_base();
    while addr < end {
        let table = table_for(page_dir, addr, false);
        if !table.is_null() {
            let table = unsafe { &mut *table };
            let ti = table_index(addr);
            let entry = table.entry(ti);
            let present = entry & PageFlags::PRESENT.bits() != 0;
            let cow = entry & PageFlags::COW.bits() != 0;
            if present && !cow {
                let frame = PageFlags::extract_address(entry);
                table.set_entry(ti, frame | prot.bits());
                flush_tlb_page(addr);
            }
        }
        addr = addr.offset(PAGE_SIZE_4KB);
    }
}

/// Pre-allocate the page tables covering `[start, end)` without mapping any
/// leaf pages; the scaffolding for demand-paged ranges, so the fault path
/// never has to allocate more than the single faulting frame.
pub fn ensure_range_tables(page_dir: *mut ProcessPageDir, start: VirtAddr, end: VirtAddr) -> c_int {
    let mut addr = start.page_base();
    while addr < end {
        if table_for(page_dir, addr, true).is_null() {
            return -1;
        }
        // Jump to the next 4MB boundary covered by a fresh table.
        let next = (addr.as_u32() & 0xFFC0_0000).wrapping_add(0x40_0000);
        if next <= addr.as_u32() {
            break;
        }
        addr = VirtAddr::new(next);
    }
    0
}

/// Release the page-table tree (directory entries and table frames).
/// Leaf frames must already have been released by the VMA layer.
pub fn paging_free_user_space(page_dir: *mut ProcessPageDir) {
    if page_dir.is_null() {
        return;
    }
    let dir = unsafe { &mut *table_ptr((*page_dir).dir_phys) };
    for di in 0..PAGE_TABLE_ENTRIES {
        let entry = dir.entry(di);
        if entry & PageFlags::PRESENT.bits() != 0 {
            free_page_frame(PhysAddr::new(PageFlags::extract_address(entry)));
            dir.set_entry(di, 0);
        }
    }
}

/// Destroy a page directory created by [`create_user_page_dir`]: the table
/// tree, the directory frame, and the descriptor itself.
pub fn destroy_user_page_dir(page_dir: *mut ProcessPageDir) {
    if page_dir.is_null() {
        return;
    }
    paging_free_user_space(page_dir);
    let pd = unsafe { Box::from_raw(page_dir) };
    free_page_frame(pd.dir_phys);
}
