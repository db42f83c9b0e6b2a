//! Per-process state and the fixed process table.
//!
//! A process owns exactly one page directory, an optional VMA table (legacy
//! kernel tasks predate VMA tracking and carry only the bounded
//! `loose_frames` list), its stacks, TLS base, a minimal fd table, and
//! signal state. The table itself is a fixed array guarded by an
//! `IrqMutex`; per the kernel's single-mutator discipline a process's
//! address space is only ever touched by its own syscalls or by the loader
//! before the process becomes runnable, so entries are handed out as raw
//! pointers the way the rest of the kernel expects.

use core::ffi::c_int;
use core::ptr;

use manta_abi::addr::{PhysAddr, VirtAddr};
use manta_abi::signal::SigState;
use manta_abi::task::TaskState;
use manta_lib::{IrqMutex, klog_info};

use crate::mm_constants::{
    INVALID_PID, LEGACY_FRAME_SLOTS, MAX_FDS, MAX_TASKS, MMAP_BASE, PAGE_SIZE_4KB,
};
use crate::page_alloc::free_page_frame;
use crate::paging::{
    ProcessPageDir, destroy_user_page_dir, unmap_page_in_dir, virt_to_phys_in_dir,
};
use crate::vma::VmaTable;
use crate::vma_flags::VmaFlags;

/// Linux O_CLOEXEC / FD_CLOEXEC as this kernel stores it.
pub const O_CLOEXEC: u32 = 0o2000000;

pub const TASK_NAME_LEN: usize = 32;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FdKind {
    #[default]
    None = 0,
    File = 1,
    Tty = 2,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FdEntry {
    pub kind: FdKind,
    pub inode: u32,
    pub offset: u32,
    pub flags: u32,
}

impl FdEntry {
    #[inline]
    pub fn is_cloexec(&self) -> bool {
        self.flags & O_CLOEXEC != 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Bounded list of directly-owned frames for tasks with no VMA table.
/// Freed unconditionally on the exit and failure paths; never consulted for
/// anything else.
#[derive(Clone, Copy)]
pub struct LooseFrames {
    frames: [PhysAddr; LEGACY_FRAME_SLOTS],
    count: usize,
}

impl LooseFrames {
    pub const fn new() -> Self {
        Self {
            frames: [PhysAddr::NULL; LEGACY_FRAME_SLOTS],
            count: 0,
        }
    }

    /// Track a frame. Returns -1 when the list is full (the frame is then
    /// leaked until process exit; the cap exists to bound kernel state).
    pub fn push(&mut self, frame: PhysAddr) -> c_int {
        if self.count >= LEGACY_FRAME_SLOTS {
            return -1;
        }
        self.frames[self.count] = frame;
        self.count += 1;
        0
    }

    /// Free every tracked frame and empty the list.
    pub fn release_all(&mut self) {
        for i in 0..self.count {
            if !self.frames[i].is_null() {
                free_page_frame(self.frames[i]);
            }
        }
        self.frames = [PhysAddr::NULL; LEGACY_FRAME_SLOTS];
        self.count = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub struct Process {
    pub pid: u32,
    pub state: TaskState,
    pub exit_code: u32,
    pub name: [u8; TASK_NAME_LEN],
    pub page_dir: *mut ProcessPageDir,
    pub vma: Option<VmaTable>,
    /// Bump-pointer mmap hint for tasks without a VMA table.
    pub mmap_next: u32,
    pub tls_base: u32,
    pub kernel_stack: PhysAddr,
    pub user_stack: PhysAddr,
    /// Saved kernel ESP; points at the trap frame that next enters user mode.
    pub kernel_esp: u32,
    pub sig: SigState,
    pub fds: [FdEntry; MAX_FDS],
    pub loose_frames: LooseFrames,
}

unsafe impl Send for Process {}

impl Process {
    const fn unused() -> Self {
        Self {
            pid: INVALID_PID,
            state: TaskState::Unused,
            exit_code: 0,
            name: [0; TASK_NAME_LEN],
            page_dir: ptr::null_mut(),
            vma: None,
            mmap_next: MMAP_BASE,
            tls_base: 0,
            kernel_stack: PhysAddr::NULL,
            user_stack: PhysAddr::NULL,
            kernel_esp: 0,
            sig: SigState::new(),
            fds: [FdEntry {
                kind: FdKind::None,
                inode: 0,
                offset: 0,
                flags: 0,
            }; MAX_FDS],
            loose_frames: LooseFrames::new(),
        }
    }

    fn reset(&mut self) {
        *self = Self::unused();
    }

    pub fn set_name(&mut self, path: &str) {
        // Short name: final path component.
        let base = path.rsplit('/').next().unwrap_or(path);
        let bytes = base.as_bytes();
        let len = bytes.len().min(TASK_NAME_LEN - 1);
        self.name = [0; TASK_NAME_LEN];
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(0);
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }

    /// Close every descriptor marked close-on-exec.
    pub fn close_cloexec_fds(&mut self) {
        for fd in self.fds.iter_mut() {
            if fd.kind != FdKind::None && fd.is_cloexec() {
                fd.clear();
            }
        }
    }
}

struct ProcessTable {
    processes: [Process; MAX_TASKS],
    num_processes: u32,
    next_pid: u32,
}

impl ProcessTable {
    const fn new() -> Self {
        Self {
            processes: [const { Process::unused() }; MAX_TASKS],
            num_processes: 0,
            next_pid: 1,
        }
    }
}

static PROCESS_TABLE: IrqMutex<ProcessTable> = IrqMutex::new(ProcessTable::new());

/// Look up a live process by pid. Null when absent.
pub fn find_process(pid: u32) -> *mut Process {
    if pid == INVALID_PID {
        return ptr::null_mut();
    }
    let table = PROCESS_TABLE.lock();
    for process in table.processes.iter() {
        if process.pid == pid && process.state != TaskState::Unused {
            return process as *const _ as *mut Process;
        }
    }
    ptr::null_mut()
}

/// Reserve a process slot in the Blocked state and assign a pid.
/// Null when the table is full.
pub fn alloc_process_slot() -> *mut Process {
    let mut table = PROCESS_TABLE.lock();
    if table.num_processes >= MAX_TASKS as u32 {
        klog_info!("process: table full");
        return ptr::null_mut();
    }

    let mut slot: *mut Process = ptr::null_mut();
    for process in table.processes.iter() {
        if process.state == TaskState::Unused {
            slot = process as *const _ as *mut Process;
            break;
        }
    }
    if slot.is_null() {
        return ptr::null_mut();
    }

    let pid = table.next_pid;
    table.next_pid += 1;
    table.num_processes += 1;

    // SAFETY: the slot was just claimed under the table lock and nothing
    // else can observe it until the pid is published.
    unsafe {
        (*slot).reset();
        (*slot).pid = pid;
        (*slot).state = TaskState::Blocked;
    }
    slot
}

/// Return a slot to the pool without any teardown (load-failure path where
/// no resources were attached yet, or final exit reaping).
pub fn release_process_slot(process: *mut Process) {
    if process.is_null() {
        return;
    }
    let mut table = PROCESS_TABLE.lock();
    // SAFETY: caller owns the slot; the table lock orders the reset against
    // concurrent scans.
    unsafe {
        if (*process).state != TaskState::Unused {
            (*process).reset();
            table.num_processes = table.num_processes.saturating_sub(1);
        }
    }
}

pub fn process_count() -> u32 {
    PROCESS_TABLE.lock().num_processes
}

/// Unmap `[start, end)` in the process's directory and drop one reference to
/// every resident frame. Returns how many pages were actually resident.
pub fn unmap_and_free_range(process: *mut Process, start: u32, end: u32) -> u32 {
    if process.is_null() {
        return 0;
    }
    let page_dir = unsafe { (*process).page_dir };
    if page_dir.is_null() || start >= end {
        return 0;
    }

    let mut freed = 0u32;
    let mut addr = start & !(PAGE_SIZE_4KB - 1);
    while addr < end {
        let vaddr = VirtAddr::new(addr);
        let phys = virt_to_phys_in_dir(page_dir, vaddr);
        if !phys.is_null() {
            unmap_page_in_dir(page_dir, vaddr);
            free_page_frame(phys);
            freed += 1;
        }
        addr = addr.wrapping_add(PAGE_SIZE_4KB);
        if addr == 0 {
            break;
        }
    }
    freed
}

/// Release the whole user image: every VMA-tracked page, the legacy frame
/// list, and the page directory. The kernel stack survives when
/// `keep_kernel_stack` (exec reuses it for the rewritten trap frame).
pub fn teardown_user_image(process: *mut Process, keep_kernel_stack: bool) {
    if process.is_null() {
        return;
    }

    // SAFETY: single-mutator discipline; only the owning context runs
    // teardown.
    unsafe {
        if let Some(vma) = (*process).vma.as_ref() {
            // Collect ranges first; unmapping mutates nothing in the table.
            let mut ranges = [(0u32, 0u32); crate::mm_constants::VMA_MAX_PER_TASK];
            let mut n = 0;
            for v in vma.iter_active() {
                ranges[n] = (v.start, v.end);
                n += 1;
            }
            for &(start, end) in ranges.iter().take(n) {
                unmap_and_free_range(process, start, end);
            }
        }
        if let Some(vma) = (*process).vma.as_mut() {
            vma.clear();
        }
        (*process).vma = None;

        (*process).loose_frames.release_all();

        if !(*process).user_stack.is_null() {
            // Normally freed via its VMA; the null check keeps the legacy
            // path honest.
            (*process).user_stack = PhysAddr::NULL;
        }

        if !keep_kernel_stack && !(*process).kernel_stack.is_null() {
            free_page_frame((*process).kernel_stack);
            (*process).kernel_stack = PhysAddr::NULL;
        }

        if !(*process).page_dir.is_null() {
            destroy_user_page_dir((*process).page_dir);
            (*process).page_dir = ptr::null_mut();
        }
    }
}

/// Terminate a process: release its image and mark it Zombie with the given
/// exit code. The slot itself is reclaimed when the parent reaps it.
pub fn process_exit(pid: u32, exit_code: u32) {
    let process = find_process(pid);
    if process.is_null() {
        return;
    }
    teardown_user_image(process, false);
    // SAFETY: single-mutator discipline.
    unsafe {
        (*process).state = TaskState::Zombie;
        (*process).exit_code = exit_code;
    }
    klog_info!("process {} exited with code {}", pid, exit_code);
}

/// VMA flags covering `addr` in the given process, if any.
pub fn process_vma_flags(pid: u32, addr: u32) -> Option<VmaFlags> {
    let process = find_process(pid);
    if process.is_null() {
        return None;
    }
    // SAFETY: read-only peek under the single-mutator discipline.
    unsafe {
        (*process)
            .vma
            .as_ref()
            .and_then(|t| t.find(addr & !(PAGE_SIZE_4KB - 1)))
            .map(|v| v.flags)
    }
}

pub fn process_page_dir(pid: u32) -> *mut ProcessPageDir {
    let process = find_process(pid);
    if process.is_null() {
        return ptr::null_mut();
    }
    unsafe { (*process).page_dir }
}
