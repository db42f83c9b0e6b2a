//! Manta memory management: per-process address spaces and the Linux i386
//! process-image ABI.
//!
//! This crate owns everything between the raw physical page pool and the
//! syscall dispatcher: frame refcounting, the two-level paging layer, VMA
//! tracking, the ELF32 loader (static and PT_INTERP dynamic images), the
//! initial stack / auxiliary vector builder, in-place image replacement
//! (`elf_exec`), the Linux memory syscalls, and demand/COW fault resolution.
//!
//! The filesystem, scheduler, and hardware programming are reached through
//! `manta_lib::kernel_services`; boot code registers the real
//! implementations, tests register fixtures.

#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod cow;
pub mod demand;
pub mod direct_map;
pub mod elf;
pub mod error;
pub mod exec;
pub mod fault;
pub mod frame_ref;
pub mod init_stack;
pub mod loader;
pub mod mm_constants;
pub mod page_alloc;
pub mod paging;
pub mod paging_defs;
pub mod process;
pub mod syscall;
pub mod trapframe;
pub mod vma;
pub mod vma_flags;

#[cfg(test)]
pub mod test_fixtures;
