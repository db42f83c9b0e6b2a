//! Linux-ABI memory syscalls: `brk`, `mmap2`, `munmap`, `mprotect`,
//! `set_thread_area`.
//!
//! The syscall dispatcher hands these raw arguments it already pulled out of
//! the trap frame. Returns follow the Linux convention: negative errno in
//! the low word, except `brk`, which returns the resulting break address
//! unconditionally; userland detects failure by comparing against what it
//! asked for.

use manta_abi::addr::VirtAddr;
use manta_abi::errno::{self, to_syscall_ret};
use manta_abi::task::{TLS_GDT_ENTRY, UserDesc};
use manta_lib::kernel_services::{fs, platform};
use manta_lib::klog_info;

use crate::direct_map;
use crate::mm_constants::PAGE_SIZE_4KB;
use crate::page_alloc::{ALLOC_FLAG_ZERO, alloc_page_frame, free_page_frame};
use crate::paging::{ensure_range_tables, map_page_in_dir, paging_update_range_protection};
use crate::paging_defs::PageFlags;
use crate::process::{FdKind, find_process, unmap_and_free_range};
use crate::vma_flags::{VmaFlags, VmaKind};

// Linux mmap constants (i386 values).
pub const PROT_READ: u32 = 0x1;
pub const PROT_WRITE: u32 = 0x2;
pub const PROT_EXEC: u32 = 0x4;

pub const MAP_SHARED: u32 = 0x01;
pub const MAP_PRIVATE: u32 = 0x02;
pub const MAP_FIXED: u32 = 0x10;
pub const MAP_ANONYMOUS: u32 = 0x20;

#[inline]
fn page_align_up(value: u32) -> Option<u32> {
    value
        .checked_add(PAGE_SIZE_4KB - 1)
        .map(|v| v & !(PAGE_SIZE_4KB - 1))
}

fn prot_to_vma_flags(prot: u32) -> VmaFlags {
    let mut flags = VmaFlags::READ;
    if prot & PROT_WRITE != 0 {
        flags |= VmaFlags::WRITE;
    }
    if prot & PROT_EXEC != 0 {
        flags |= VmaFlags::EXEC;
    }
    flags
}

fn prot_to_page_flags(prot: u32) -> PageFlags {
    if prot & PROT_WRITE != 0 {
        PageFlags::USER_RW
    } else {
        PageFlags::USER_RO
    }
}

// ---------------------------------------------------------------------------
// brk
// ---------------------------------------------------------------------------

/// Move the program break. `new_brk == 0` queries the current break.
/// Returns the resulting break; unchanged when the request cannot be met.
pub fn sys_brk(pid: u32, new_brk: u32) -> u32 {
    let process = find_process(pid);
    if process.is_null() {
        return 0;
    }

    // SAFETY: a process's break is only moved by its own syscall context.
    unsafe {
        let page_dir = (*process).page_dir;
        let Some(vma) = (*process).vma.as_mut() else {
            // Legacy tasks have no heap tracking.
            return 0;
        };

        if new_brk == 0 || new_brk < vma.heap_start {
            return vma.heap_current;
        }

        let old_mapped = match page_align_up(vma.heap_current.max(vma.heap_start)) {
            Some(v) => v,
            None => return vma.heap_current,
        };
        let new_mapped = match page_align_up(new_brk) {
            Some(v) => v,
            None => return vma.heap_current,
        };

        if new_mapped > old_mapped {
            // Grow: the new pages must not run into a neighboring mapping.
            if vma.range_overlaps(old_mapped, new_mapped) {
                return vma.heap_current;
            }

            let heap_flags = VmaFlags::READ | VmaFlags::WRITE | VmaFlags::ANON;
            let mut va = old_mapped;
            while va < new_mapped {
                let frame = alloc_page_frame(ALLOC_FLAG_ZERO);
                let mapped_ok = !frame.is_null()
                    && map_page_in_dir(page_dir, VirtAddr::new(va), frame, PageFlags::USER_RW)
                        == 0;
                if !mapped_ok {
                    if !frame.is_null() {
                        free_page_frame(frame);
                    }
                    // Roll back this call's pages; the break does not move.
                    unmap_and_free_range(process, old_mapped, va);
                    klog_info!("brk: allocation failed, break stays at {:#x}", vma.heap_current);
                    return vma.heap_current;
                }
                va += PAGE_SIZE_4KB;
            }

            // Extend the heap VMA (or materialize it on first growth).
            let extended = vma
                .iter_active_mut()
                .find(|v| v.kind == VmaKind::Heap && v.end == old_mapped)
                .map(|v| {
                    v.end = new_mapped;
                })
                .is_some();
            if !extended
                && vma
                    .insert(old_mapped, new_mapped, heap_flags, VmaKind::Heap)
                    .is_err()
            {
                unmap_and_free_range(process, old_mapped, new_mapped);
                return vma.heap_current;
            }
        } else if new_mapped < old_mapped {
            // Shrink: free the vacated pages and trim the heap VMA.
            unmap_and_free_range(process, new_mapped, old_mapped);
            vma.remove(new_mapped, old_mapped);
        }

        vma.heap_current = new_brk;
        vma.heap_current
    }
}

// ---------------------------------------------------------------------------
// mmap2 / munmap
// ---------------------------------------------------------------------------

/// Map anonymous or file-backed memory. Returns the mapped address or a
/// negative errno cast to u32.
pub fn sys_mmap2(pid: u32, addr: u32, len: u32, prot: u32, flags: u32, fd: u32, pgoff: u32) -> u32 {
    let process = find_process(pid);
    if process.is_null() {
        return to_syscall_ret(errno::ESRCH);
    }
    if len == 0 {
        return to_syscall_ret(errno::EINVAL);
    }
    let Some(aligned_len) = page_align_up(len) else {
        return to_syscall_ret(errno::EINVAL);
    };

    // SAFETY: single-mutator discipline.
    unsafe {
        if (*process).vma.is_none() {
            return legacy_mmap(process, aligned_len, flags);
        }

        let page_dir = (*process).page_dir;

        let target = if flags & MAP_FIXED != 0 {
            if addr & (PAGE_SIZE_4KB - 1) != 0 {
                return to_syscall_ret(errno::EINVAL);
            }
            // A fixed mapping replaces whatever was there.
            let end = match addr.checked_add(aligned_len) {
                Some(v) => v,
                None => return to_syscall_ret(errno::EINVAL),
            };
            unmap_and_free_range(process, addr, end);
            let vma = (*process).vma.as_mut().unwrap();
            vma.remove(addr, end);
            addr
        } else {
            let vma = (*process).vma.as_mut().unwrap();
            match vma.find_free(aligned_len) {
                Some(a) => a,
                None => return to_syscall_ret(errno::ENOMEM),
            }
        };
        let end = target + aligned_len;

        if flags & MAP_ANONYMOUS != 0 {
            // Demand-paged: only the VMA and page-table scaffolding exist
            // until the first touch faults a frame in.
            let vma_flags = prot_to_vma_flags(prot) | VmaFlags::ANON | VmaFlags::LAZY;
            let vma = (*process).vma.as_mut().unwrap();
            if vma.insert(target, end, vma_flags, VmaKind::Anon).is_err() {
                return to_syscall_ret(errno::ENOMEM);
            }
            if ensure_range_tables(page_dir, VirtAddr::new(target), VirtAddr::new(end)) != 0 {
                let vma = (*process).vma.as_mut().unwrap();
                vma.remove(target, end);
                return to_syscall_ret(errno::ENOMEM);
            }
            return target;
        }

        // File-backed: populate eagerly by reading the file at the given
        // offset. No write-back, no shared-file semantics; the pages are
        // ordinary anonymous memory initialized from the file.
        if fd as usize >= crate::mm_constants::MAX_FDS {
            return to_syscall_ret(errno::EBADF);
        }
        let fde = (*process).fds[fd as usize];
        if fde.kind != FdKind::File {
            return to_syscall_ret(errno::EBADF);
        }

        let vma = (*process).vma.as_mut().unwrap();
        if vma
            .insert(target, end, prot_to_vma_flags(prot), VmaKind::Anon)
            .is_err()
        {
            return to_syscall_ret(errno::ENOMEM);
        }

        let mut va = target;
        let mut page_index = 0u32;
        while va < end {
            let frame = alloc_page_frame(ALLOC_FLAG_ZERO);
            let mapped_ok = !frame.is_null()
                && map_page_in_dir(page_dir, VirtAddr::new(va), frame, prot_to_page_flags(prot))
                    == 0;
            if !mapped_ok {
                if !frame.is_null() {
                    free_page_frame(frame);
                }
                unmap_and_free_range(process, target, va);
                let vma = (*process).vma.as_mut().unwrap();
                vma.remove(target, end);
                return to_syscall_ret(errno::ENOMEM);
            }

            // A short or failed read leaves the page zero-filled rather
            // than failing the whole mapping.
            let file_off = pgoff
                .wrapping_mul(PAGE_SIZE_4KB)
                .wrapping_add(page_index * PAGE_SIZE_4KB);
            let buf = direct_map::frame_bytes(frame);
            let _ = fs::fs_read_at(fde.inode, buf, file_off);

            va += PAGE_SIZE_4KB;
            page_index += 1;
        }

        target
    }
}

/// Pre-VMA tasks get the historical eager bump-pointer mapping.
unsafe fn legacy_mmap(process: *mut crate::process::Process, aligned_len: u32, flags: u32) -> u32 {
    if flags & MAP_ANONYMOUS == 0 {
        return to_syscall_ret(errno::ENOSYS);
    }

    let page_dir = (*process).page_dir;
    let va_start = (*process).mmap_next;
    let mut va = va_start;
    let end = match va_start.checked_add(aligned_len) {
        Some(v) => v,
        None => return to_syscall_ret(errno::ENOMEM),
    };

    while va < end {
        let frame = alloc_page_frame(ALLOC_FLAG_ZERO);
        if frame.is_null() {
            return to_syscall_ret(errno::ENOMEM);
        }
        if map_page_in_dir(page_dir, VirtAddr::new(va), frame, PageFlags::USER_RW) != 0 {
            free_page_frame(frame);
            return to_syscall_ret(errno::ENOMEM);
        }
        (*process).loose_frames.push(frame);
        va += PAGE_SIZE_4KB;
    }

    (*process).mmap_next = end;
    va_start
}

/// Unmap `[addr, addr+len)`. Pages that were never faulted in still lose
/// their VMA coverage; resident frames go back through the refcounter.
pub fn sys_munmap(pid: u32, addr: u32, len: u32) -> i32 {
    let process = find_process(pid);
    if process.is_null() {
        return -errno::ESRCH;
    }
    if len == 0 || addr & (PAGE_SIZE_4KB - 1) != 0 {
        return -errno::EINVAL;
    }
    let Some(end) = addr.checked_add(len).and_then(page_align_up) else {
        return -errno::EINVAL;
    };

    // SAFETY: single-mutator discipline.
    unsafe {
        if (*process).vma.is_none() {
            // Historical behavior: nothing tracked, nothing to do.
            return 0;
        }
        unmap_and_free_range(process, addr, end);
        (*process).vma.as_mut().unwrap().remove(addr, end);
    }
    0
}

// ---------------------------------------------------------------------------
// mprotect
// ---------------------------------------------------------------------------

/// Change protection on `[addr, addr+len)`: VMAs are split at both range
/// boundaries and updated, and resident PTEs are rewritten; except pages
/// currently marked copy-on-write, which must stay read-only until the next
/// write fault resolves the copy.
pub fn sys_mprotect(pid: u32, addr: u32, len: u32, prot: u32) -> i32 {
    let process = find_process(pid);
    if process.is_null() {
        return -errno::ESRCH;
    }
    if len == 0 || addr & (PAGE_SIZE_4KB - 1) != 0 {
        return -errno::EINVAL;
    }
    let Some(end) = addr.checked_add(len).and_then(page_align_up) else {
        return -errno::EINVAL;
    };

    // SAFETY: single-mutator discipline.
    unsafe {
        let page_dir = (*process).page_dir;
        let Some(vma) = (*process).vma.as_mut() else {
            return -errno::EINVAL;
        };

        if vma.split(addr).is_err() || vma.split(end).is_err() {
            return -errno::ENOMEM;
        }

        let new_prot = prot_to_vma_flags(prot);
        for v in vma.iter_active_mut() {
            if v.start >= addr && v.end <= end {
                let state = v.flags
                    & (VmaFlags::GROWSDOWN | VmaFlags::ANON | VmaFlags::LAZY | VmaFlags::COW);
                v.flags = new_prot | state;
            }
        }

        paging_update_range_protection(
            page_dir,
            VirtAddr::new(addr),
            VirtAddr::new(end),
            prot_to_page_flags(prot),
        );
    }
    0
}

// ---------------------------------------------------------------------------
// set_thread_area
// ---------------------------------------------------------------------------

/// Install the thread-local-storage base for the calling task. The
/// descriptor's `entry_number` is rewritten with the fixed GDT slot.
pub fn sys_set_thread_area(pid: u32, u_info: &mut UserDesc) -> i32 {
    let process = find_process(pid);
    if process.is_null() {
        return -errno::EINVAL;
    }

    // SAFETY: single-mutator discipline.
    unsafe {
        (*process).tls_base = u_info.base_addr;
    }
    platform::gdt_set_gs_base(u_info.base_addr);

    u_info.entry_number = TLS_GDT_ENTRY;
    0
}
