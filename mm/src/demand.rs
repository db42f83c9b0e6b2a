//! Demand paging: lazy frame allocation on first access.
//!
//! Anonymous mmap regions carry `LAZY|ANON` and own no frames until the
//! process touches them. The page-fault handler routes a not-present fault
//! inside such a region here; the page materializes as a zeroed frame with
//! the VMA's permissions.

use manta_abi::addr::VirtAddr;

use crate::error::MmError;
use crate::mm_constants::PAGE_SIZE_4KB;
use crate::page_alloc::{ALLOC_FLAG_ZERO, alloc_page_frame, free_page_frame};
use crate::paging::{map_page_in_dir, virt_to_phys_in_dir};
use crate::process::{process_page_dir, process_vma_flags};
use crate::vma_flags::VmaFlags;

// i386 page-fault error code bits.
pub const PF_ERR_PRESENT: u32 = 0x01;
pub const PF_ERR_WRITE: u32 = 0x02;
pub const PF_ERR_USER: u32 = 0x04;

/// Is this fault one demand paging can satisfy: a not-present access
/// inside a lazy anonymous region?
pub fn is_demand_fault(pid: u32, fault_addr: u32, error_code: u32) -> bool {
    if error_code & PF_ERR_PRESENT != 0 {
        return false;
    }
    match process_vma_flags(pid, fault_addr) {
        Some(flags) => flags.is_demand_paged() && flags.is_anonymous(),
        None => false,
    }
}

/// Does the region's protection admit this access?
pub fn can_satisfy_fault(error_code: u32, vma_flags: VmaFlags) -> bool {
    if error_code & PF_ERR_WRITE != 0 && !vma_flags.is_writable() {
        return false;
    }
    if error_code & PF_ERR_USER != 0 && !vma_flags.contains(VmaFlags::READ) {
        return false;
    }
    true
}

/// Materialize the faulting page: allocate a zeroed frame and map it with
/// the VMA's permissions.
pub fn handle_demand_fault(pid: u32, fault_addr: u32, error_code: u32) -> Result<(), MmError> {
    let page_dir = process_page_dir(pid);
    if page_dir.is_null() {
        return Err(MmError::NullPageDir);
    }

    let aligned = fault_addr & !(PAGE_SIZE_4KB - 1);

    let vma_flags = process_vma_flags(pid, aligned).ok_or(MmError::NoVma)?;
    if !vma_flags.is_demand_paged() || !vma_flags.is_anonymous() {
        return Err(MmError::NotDemandPaged);
    }
    if !can_satisfy_fault(error_code, vma_flags) {
        return Err(MmError::PermissionDenied);
    }

    // Another fault may have raced us in on the same page; nothing to do.
    if !virt_to_phys_in_dir(page_dir, VirtAddr::new(aligned)).is_null() {
        return Ok(());
    }

    let frame = alloc_page_frame(ALLOC_FLAG_ZERO);
    if frame.is_null() {
        return Err(MmError::NoMemory);
    }

    if map_page_in_dir(page_dir, VirtAddr::new(aligned), frame, vma_flags.to_page_flags()) != 0 {
        free_page_frame(frame);
        return Err(MmError::MappingFailed);
    }

    Ok(())
}
