//! Copy-on-write fault resolution.
//!
//! A COW page is mapped read-only with the COW marker; the frame may be
//! shared with another address space. On the first write fault: if we are
//! the last holder the page simply becomes writable in place, otherwise the
//! contents move to a private frame and the shared frame loses one
//! reference.

use core::ptr;

use manta_abi::addr::{PhysAddr, VirtAddr};

use crate::direct_map::PhysAddrDirect;
use crate::error::MmError;
use crate::frame_ref::frame_ref_get;
use crate::mm_constants::{PAGE_SIZE_4KB, PAGE_SIZE_4KB_USIZE};
use crate::page_alloc::{ALLOC_FLAG_ZERO, alloc_page_frame, free_page_frame};
use crate::paging::{ProcessPageDir, map_page_in_dir, paging_is_cow, virt_to_phys_in_dir};
use crate::paging_defs::PageFlags;

use crate::demand::{PF_ERR_PRESENT, PF_ERR_WRITE};

/// Is this a write fault on a present COW page?
pub fn is_cow_fault(page_dir: *mut ProcessPageDir, fault_addr: u32, error_code: u32) -> bool {
    if error_code & PF_ERR_WRITE == 0 || error_code & PF_ERR_PRESENT == 0 {
        return false;
    }
    paging_is_cow(page_dir, VirtAddr::new(fault_addr))
}

/// Resolve a COW fault at `fault_addr`.
pub fn handle_cow_fault(page_dir: *mut ProcessPageDir, fault_addr: u32) -> Result<(), MmError> {
    if page_dir.is_null() {
        return Err(MmError::NullPageDir);
    }

    let aligned = VirtAddr::new(fault_addr & !(PAGE_SIZE_4KB - 1));

    if !paging_is_cow(page_dir, aligned) {
        return Err(MmError::NotCowPage);
    }

    let old_phys = virt_to_phys_in_dir(page_dir, aligned);
    if old_phys.is_null() {
        return Err(MmError::InvalidAddress);
    }

    if frame_ref_get(old_phys) <= 1 {
        resolve_single_ref(page_dir, aligned, old_phys)
    } else {
        resolve_multi_ref(page_dir, aligned, old_phys)
    }
}

/// Last holder: drop the COW marker and make the page writable in place.
fn resolve_single_ref(
    page_dir: *mut ProcessPageDir,
    aligned: VirtAddr,
    phys: PhysAddr,
) -> Result<(), MmError> {
    if map_page_in_dir(page_dir, aligned, phys, PageFlags::USER_RW) != 0 {
        return Err(MmError::MappingFailed);
    }
    Ok(())
}

/// Shared frame: copy into a private frame, remap, release one reference.
fn resolve_multi_ref(
    page_dir: *mut ProcessPageDir,
    aligned: VirtAddr,
    old_phys: PhysAddr,
) -> Result<(), MmError> {
    let new_phys = alloc_page_frame(ALLOC_FLAG_ZERO);
    if new_phys.is_null() {
        return Err(MmError::NoMemory);
    }

    // SAFETY: the source frame is readable through the direct map and the
    // destination frame is exclusively ours.
    unsafe {
        ptr::copy_nonoverlapping(old_phys.to_ptr(), new_phys.to_ptr(), PAGE_SIZE_4KB_USIZE);
    }

    if map_page_in_dir(page_dir, aligned, new_phys, PageFlags::USER_RW) != 0 {
        free_page_frame(new_phys);
        return Err(MmError::MappingFailed);
    }

    free_page_frame(old_phys);
    Ok(())
}
