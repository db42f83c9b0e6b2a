//! ELF auxiliary vector definitions (kernel-userland ABI).
//!
//! The auxiliary vector is placed on the user stack by the kernel during
//! exec. It provides runtime information that the C library startup code
//! (crt1 / `__libc_start_main`) and the dynamic linker need to initialize.
//!
//! Stack layout after exec:
//!   [argc] [argv0..argvN] [NULL] [env0..envN] [NULL] [auxv entries] [AT_NULL,0]
//!
//! On i386 every entry is a pair of 32-bit words. The kernel emits a fixed
//! set of entries in a fixed order ([`AUX_VECTOR_ENTRIES`]); getting this
//! layout wrong silently corrupts every dynamically-linked binary's startup.

/// Auxiliary vector entry (two u32 words).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuxEntry {
    pub a_type: u32,
    pub a_val: u32,
}

impl AuxEntry {
    #[inline]
    pub const fn new(a_type: u32, a_val: u32) -> Self {
        Self { a_type, a_val }
    }
}

/// Number of entries the kernel pushes, including the AT_NULL terminator.
pub const AUX_VECTOR_ENTRIES: usize = 15;

// =============================================================================
// Auxiliary vector type constants (from ELF spec / Linux ABI)
// =============================================================================

/// End of auxiliary vector.
pub const AT_NULL: u32 = 0;

/// Address of program headers in memory.
pub const AT_PHDR: u32 = 3;

/// Size of each program header entry.
pub const AT_PHENT: u32 = 4;

/// Number of program headers.
pub const AT_PHNUM: u32 = 5;

/// System page size.
pub const AT_PAGESZ: u32 = 6;

/// Base address of the interpreter (0 for static binaries).
pub const AT_BASE: u32 = 7;

/// Flags (unused, set to 0).
pub const AT_FLAGS: u32 = 8;

/// Entry point of the program (not the interpreter).
pub const AT_ENTRY: u32 = 9;

/// Real UID of the process.
pub const AT_UID: u32 = 11;

/// Effective UID.
pub const AT_EUID: u32 = 12;

/// Real GID of the process.
pub const AT_GID: u32 = 13;

/// Effective GID.
pub const AT_EGID: u32 = 14;

/// Clock ticks per second (for times()).
pub const AT_CLKTCK: u32 = 17;

/// Secure mode boolean (0 = normal).
pub const AT_SECURE: u32 = 23;

/// Address of 16 random bytes on the stack.
pub const AT_RANDOM: u32 = 25;
