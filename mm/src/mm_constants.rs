//! Compile-time layout and capacity constants for the memory subsystem.

/// 4KB page size.
pub const PAGE_SIZE_4KB: u32 = 0x1000;

/// 4KB page size as usize for slicing and indexing.
pub const PAGE_SIZE_4KB_USIZE: usize = PAGE_SIZE_4KB as usize;

/// Frames tracked by the refcount table (256 MB of physical memory).
pub const MAX_FRAMES: usize = 65536;

/// Maximum VMAs per process. The table is a fixed arena; insertion fails
/// when it fills and the caller must surface an out-of-resources error.
pub const VMA_MAX_PER_TASK: usize = 64;

/// Process table capacity.
pub const MAX_TASKS: usize = 32;

/// Per-process file descriptor table size.
pub const MAX_FDS: usize = 16;

/// Cap on frames a process may hold in its legacy (non-VMA-tracked) list.
pub const LEGACY_FRAME_SLOTS: usize = 64;

/// Largest executable image the loader will read. Larger files are
/// rejected before any resource is committed.
pub const MAX_FILE_SIZE: usize = 4 * 1024 * 1024;

/// Sentinel for "no process".
pub const INVALID_PID: u32 = 0;

// ---------------------------------------------------------------------------
// User address-space layout
// ---------------------------------------------------------------------------
//
//   0x0800_0000   ET_DYN (PIE) load base
//   0x2000_0000   anonymous-mmap arena (gap search starts here)
//   0x3000_0000   dynamic-linker image (fixed, reserved)
//   0x4000_0000   user stack page
//   0xC000_0000   kernel split; nothing user-visible above this

/// Load bias applied to position-independent main images.
pub const ELF_PIE_BASE: u32 = 0x0800_0000;

/// Fixed base for the PT_INTERP dynamic-linker image.
pub const ELF_INTERP_BASE: u32 = 0x3000_0000;

/// First address the mmap gap search considers.
pub const MMAP_BASE: u32 = 0x2000_0000;

/// Exclusive upper bound for mmap gap search.
pub const MMAP_LIMIT: u32 = 0x4000_0000;

/// The single user-stack page lives at [USER_STACK_BASE, USER_STACK_TOP).
pub const USER_STACK_BASE: u32 = 0x4000_0000;
pub const USER_STACK_TOP: u32 = USER_STACK_BASE + PAGE_SIZE_4KB;

/// User segments must stay strictly below the kernel split.
pub const USER_SPACE_END_VA: u32 = 0xC000_0000;
