//! User page-fault dispatch.
//!
//! The architecture trap handler calls [`handle_user_fault`] with the
//! faulting address and the hardware error code. Demand paging is tried
//! first (not-present faults), then copy-on-write (write faults on present
//! pages). `false` means the fault is genuine and the caller should signal
//! the process.

use crate::cow;
use crate::demand;
use crate::process::process_page_dir;

/// Try to resolve a user-mode page fault. Returns true when the access can
/// be retried.
pub fn handle_user_fault(pid: u32, fault_addr: u32, error_code: u32) -> bool {
    if demand::is_demand_fault(pid, fault_addr, error_code) {
        return demand::handle_demand_fault(pid, fault_addr, error_code).is_ok();
    }

    let page_dir = process_page_dir(pid);
    if cow::is_cow_fault(page_dir, fault_addr, error_code) {
        return cow::handle_cow_fault(page_dir, fault_addr).is_ok();
    }

    false
}
