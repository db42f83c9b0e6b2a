//! In-place image replacement (`execve`).
//!
//! Replaces a *running* process's image, as opposed to `elf_run` which
//! creates a new process. The argument strings are copied into kernel
//! buffers before anything else: they usually live in the very address space
//! about to be destroyed.
//!
//! Ordering is deliberate and matches the historical behavior of this
//! kernel: the old image is torn down *before* the new file is read and
//! validated. Once teardown has begun there is no old image to fall back
//! to, so any failure from that point forces the process into a zombie with
//! a fixed exit code rather than leaving a half-built address space
//! runnable.

use alloc::string::String;
use alloc::vec::Vec;

use manta_abi::errno;
use manta_abi::task::{EXEC_FAILED_EXIT_CODE, TaskState};
use manta_lib::kernel_services::platform;
use manta_lib::klog_info;

use crate::elf;
use crate::loader::build_process_image;
use crate::mm_constants::{MAX_FILE_SIZE, MMAP_BASE};
use crate::paging::create_user_page_dir;
use crate::process::{Process, find_process, teardown_user_image};
use crate::vma::VmaTable;

/// Mark the process dead after a post-teardown failure. The old image is
/// gone and the new one never materialized; there is nothing to resume.
fn fail_exec(process: *mut Process, pid: u32) {
    teardown_user_image(process, false);
    // SAFETY: single-mutator discipline; this is the process's own syscall.
    unsafe {
        (*process).state = TaskState::Zombie;
        (*process).exit_code = EXEC_FAILED_EXIT_CODE;
    }
    klog_info!("exec: pid {} killed after failed image replacement", pid);
}

/// Replace the calling process's image with the executable at `path`.
/// Returns 0 on success or a negative errno.
pub fn elf_exec(pid: u32, path: &str, argv: &[&[u8]]) -> i32 {
    let process = find_process(pid);
    if process.is_null() {
        return -errno::ESRCH;
    }

    // Private copies first; path and argv may point into the condemned
    // address space.
    let path_copy = String::from(path);
    let argv_copy: Vec<Vec<u8>> = argv.iter().map(|a| a.to_vec()).collect();

    // Point of no return: release the old image, keeping the kernel stack
    // we are executing on.
    teardown_user_image(process, true);

    // SAFETY: single-mutator discipline.
    unsafe {
        (*process).close_cloexec_fds();
        (*process).sig.reset_handlers();
        (*process).tls_base = 0;
        (*process).mmap_next = MMAP_BASE;
    }
    platform::gdt_set_gs_base(0);

    let page_dir = create_user_page_dir(pid);
    if page_dir.is_null() {
        fail_exec(process, pid);
        return -errno::ENOMEM;
    }
    // SAFETY: as above.
    unsafe {
        (*process).page_dir = page_dir;
        (*process).vma = Some(VmaTable::new());
    }

    let mut file = alloc::vec![0u8; MAX_FILE_SIZE];
    let n = manta_lib::kernel_services::fs::fs_read_file(&path_copy, &mut file);
    if n < 0 {
        fail_exec(process, pid);
        return n as i32;
    }
    file.truncate(n as usize);

    if !elf::detect(&file) {
        fail_exec(process, pid);
        return -errno::ENOEXEC;
    }

    let argv_refs: Vec<&[u8]> = argv_copy.iter().map(|a| a.as_slice()).collect();
    match build_process_image(process, &file, &argv_refs) {
        Ok(()) => {
            // SAFETY: as above.
            unsafe {
                (*process).set_name(&path_copy);
                (*process).state = TaskState::Ready;
            }
            0
        }
        Err(e) => {
            fail_exec(process, pid);
            -e.errno()
        }
    }
}
