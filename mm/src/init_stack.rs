//! Initial user stack and auxiliary vector construction.
//!
//! The stack grows down from the top of the single user-stack page:
//! 16 bytes of entropy (`AT_RANDOM` points here), NUL-terminated argv
//! strings, and then, word-aligned and padded so the vector block ends
//! 16-byte aligned per the i386 SysV ABI: `argc`, the argv pointer table, the
//! (empty) envp table, and the fixed auxiliary vector. The dynamic linker
//! trusts this layout byte for byte, so construction goes through a typed
//! cursor rather than raw pointer arithmetic.

use alloc::vec::Vec;

use manta_abi::addr::PhysAddr;
use manta_abi::auxv::{
    self, AUX_VECTOR_ENTRIES, AuxEntry,
};
use manta_lib::kernel_services::platform;

use crate::direct_map::PhysAddrDirect;
use crate::error::{MmError, MmResult};
use crate::mm_constants::{PAGE_SIZE_4KB_USIZE, USER_STACK_BASE, USER_STACK_TOP};

/// Everything the stack builder needs to know about the loaded image.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfExecInfo {
    /// Where the CPU starts: the interpreter's entry for dynamic images,
    /// the program's own entry otherwise.
    pub entry: u32,
    /// The main program's entry point, reported via `AT_ENTRY`.
    pub at_entry: u32,
    /// User VA of the program header table (0 if unmapped).
    pub phdr_addr: u32,
    /// Size of one program header entry.
    pub phent: u16,
    /// Number of program headers.
    pub phnum: u16,
    /// Interpreter load base; 0 for statically linked images.
    pub interp_base: u32,
}

/// Downward cursor over the user stack page.
///
/// Tracks the user virtual SP and the kernel-visible page together so a
/// push can never write through one and forget the other, and refuses to
/// run off the bottom of the page.
struct StackWriter<'a> {
    page: &'a mut [u8],
    sp: u32,
}

impl<'a> StackWriter<'a> {
    fn new(page: &'a mut [u8]) -> Self {
        Self {
            page,
            sp: USER_STACK_TOP,
        }
    }

    #[inline]
    fn sp(&self) -> u32 {
        self.sp
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> MmResult<u32> {
        let len = bytes.len() as u32;
        if self.sp - USER_STACK_BASE < len {
            return Err(MmError::StackExhausted);
        }
        self.sp -= len;
        let off = (self.sp - USER_STACK_BASE) as usize;
        self.page[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(self.sp)
    }

    fn push_u32(&mut self, value: u32) -> MmResult<u32> {
        self.push_bytes(&value.to_le_bytes())
    }

    fn push_aux(&mut self, entry: AuxEntry) -> MmResult<()> {
        // Pushed value-then-type so the pair reads (type, value) in memory.
        self.push_u32(entry.a_val)?;
        self.push_u32(entry.a_type)?;
        Ok(())
    }

    fn align_down(&mut self, align: u32) {
        self.sp &= !(align - 1);
    }
}

/// Build the initial stack image in the given user-stack frame and return
/// the user ESP to enter with.
pub fn build_initial_stack(
    stack_frame: PhysAddr,
    argv: &[&[u8]],
    info: &ElfExecInfo,
) -> MmResult<u32> {
    let page =
        // SAFETY: the stack frame was freshly allocated for this process
        // and is not yet visible to anyone else.
        unsafe { core::slice::from_raw_parts_mut(stack_frame.to_ptr(), PAGE_SIZE_4KB_USIZE) };
    let mut writer = StackWriter::new(page);

    // AT_RANDOM payload first, highest on the stack.
    let mut random = [0u8; 16];
    platform::rng_fill(&mut random);
    let random_va = writer.push_bytes(&random)?;

    // Argument strings, NUL-terminated, argv[0] ending up lowest.
    let mut argv_ptrs: Vec<u32> = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        writer.push_bytes(&[0])?;
        let va = writer.push_bytes(arg)?;
        argv_ptrs.push(va);
    }
    argv_ptrs.reverse();

    writer.align_down(4);

    // Pad so the vector block (argc .. AT_NULL) ends 16-byte aligned: the
    // ABI wants ESP % 16 == 0 at the entry point.
    let block_words = 1 + argv.len() + 1 + 1 + 2 * AUX_VECTOR_ENTRIES;
    let block_bytes = (block_words * 4) as u32;
    let slack = writer.sp().wrapping_sub(block_bytes) & 15;
    for _ in 0..slack / 4 {
        writer.push_u32(0)?;
    }

    // Auxiliary vector, pushed in reverse so it reads forward in memory.
    let aux = [
        AuxEntry::new(auxv::AT_PHDR, info.phdr_addr),
        AuxEntry::new(auxv::AT_PHENT, info.phent as u32),
        AuxEntry::new(auxv::AT_PHNUM, info.phnum as u32),
        AuxEntry::new(auxv::AT_PAGESZ, crate::mm_constants::PAGE_SIZE_4KB),
        AuxEntry::new(auxv::AT_BASE, info.interp_base),
        AuxEntry::new(auxv::AT_FLAGS, 0),
        AuxEntry::new(auxv::AT_ENTRY, info.at_entry),
        AuxEntry::new(auxv::AT_UID, platform::current_uid()),
        AuxEntry::new(auxv::AT_EUID, platform::current_uid()),
        AuxEntry::new(auxv::AT_GID, platform::current_gid()),
        AuxEntry::new(auxv::AT_EGID, platform::current_gid()),
        AuxEntry::new(auxv::AT_SECURE, 0),
        AuxEntry::new(auxv::AT_CLKTCK, platform::clock_tick_hz()),
        AuxEntry::new(auxv::AT_RANDOM, random_va),
        AuxEntry::new(auxv::AT_NULL, 0),
    ];
    debug_assert_eq!(aux.len(), AUX_VECTOR_ENTRIES);
    for entry in aux.iter().rev() {
        writer.push_aux(*entry)?;
    }

    // Empty environment, then the argv pointer table and argc.
    writer.push_u32(0)?;
    writer.push_u32(0)?;
    for va in argv_ptrs.iter().rev() {
        writer.push_u32(*va)?;
    }
    let esp = writer.push_u32(argv.len() as u32)?;

    debug_assert_eq!(esp & 15, 0, "entry ESP must be 16-byte aligned");
    Ok(esp)
}
