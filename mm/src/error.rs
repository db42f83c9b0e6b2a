//! Unified error type for the memory management subsystem.
//!
//! ELF format errors stay in `elf::ElfError`; they are a separate taxonomy
//! (refused before any resource is committed) and carry no overlap with the
//! resource/paging variants here.

use core::fmt;

use manta_abi::errno;

/// Memory management error.
///
/// Covers paging, VMA bookkeeping, demand paging, and copy-on-write.
/// Variants are organized by the subsystem that typically produces them,
/// but any MM operation may return any variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    NoMemory,
    MappingFailed,
    InvalidAddress,
    NullPageDir,
    VmaTableFull,
    VmaOverlap,
    NoVma,
    NotCowPage,
    NotDemandPaged,
    PermissionDenied,
    NoSuchProcess,
    NoProcessSlot,
    StackExhausted,
}

impl MmError {
    /// Linux errno this error surfaces as at the syscall boundary.
    pub const fn errno(self) -> i32 {
        match self {
            Self::NoMemory | Self::VmaTableFull | Self::StackExhausted => errno::ENOMEM,
            Self::MappingFailed => errno::EIO,
            Self::InvalidAddress | Self::VmaOverlap | Self::NoVma => errno::EINVAL,
            Self::NullPageDir | Self::NoSuchProcess => errno::ESRCH,
            Self::NoProcessSlot => errno::EAGAIN,
            Self::NotCowPage | Self::NotDemandPaged => errno::EFAULT,
            Self::PermissionDenied => errno::EACCES,
        }
    }
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory => write!(f, "out of memory for page allocation"),
            Self::MappingFailed => write!(f, "page mapping operation failed"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::NullPageDir => write!(f, "null page directory"),
            Self::VmaTableFull => write!(f, "VMA table full"),
            Self::VmaOverlap => write!(f, "range overlaps an active VMA"),
            Self::NoVma => write!(f, "no VMA covers the address"),
            Self::NotCowPage => write!(f, "page is not copy-on-write"),
            Self::NotDemandPaged => write!(f, "page is not demand-paged"),
            Self::PermissionDenied => write!(f, "VMA permissions deny this access"),
            Self::NoSuchProcess => write!(f, "no such process"),
            Self::NoProcessSlot => write!(f, "no free process slot"),
            Self::StackExhausted => write!(f, "initial stack page exhausted"),
        }
    }
}

/// Convenience result type for memory management operations.
pub type MmResult<T = ()> = Result<T, MmError>;
