//! ELF image loading: process creation and the shared segment-mapping core.
//!
//! [`elf_run`] creates a new process from an executable on the filesystem:
//! validate, map every PT_LOAD segment (one zeroed frame per page, file
//! bytes copied in), bootstrap the PT_INTERP dynamic linker when present,
//! build the initial stack and trap frame, and mark the process runnable.
//! Format errors are refused before any resource is committed; failures
//! after that unwind every frame through the VMA table and release the page
//! directory, so a half-built address space is never left reachable.
//!
//! [`build_process_image`] is the common body shared with the exec path;
//! exec differs only in what happens around it.

use alloc::vec;
use alloc::vec::Vec;

use manta_abi::addr::{PhysAddr, VirtAddr};
use manta_abi::errno;
use manta_abi::task::TaskState;
use manta_lib::kernel_services::fs;
use manta_lib::{klog_debug, klog_info};

use crate::elf::{self, Elf32Phdr, ElfError, ElfImage};
use crate::error::MmError;
use crate::init_stack::{ElfExecInfo, build_initial_stack};
use crate::mm_constants::{
    ELF_INTERP_BASE, ELF_PIE_BASE, MAX_FILE_SIZE, PAGE_SIZE_4KB, USER_STACK_BASE, USER_STACK_TOP,
};
use crate::page_alloc::{ALLOC_FLAG_ZERO, alloc_page_frame, free_page_frame};
use crate::paging::{ProcessPageDir, create_user_page_dir, map_page_in_dir, virt_to_phys_in_dir};
use crate::paging_defs::PageFlags;
use crate::process::{
    Process, alloc_process_slot, release_process_slot, teardown_user_image,
};
use crate::trapframe::{TrapFrame, write_initial_frame};
use crate::vma::VmaTable;
use crate::vma_flags::{VmaFlags, VmaKind};
use crate::direct_map::PhysAddrDirect;

/// Why a load failed. Format errors cost nothing; resource and I/O errors
/// may require the caller to unwind partial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    Format(ElfError),
    Resource(MmError),
    Io(i32),
}

impl LoadError {
    pub const fn errno(self) -> i32 {
        match self {
            Self::Format(_) => errno::ENOEXEC,
            Self::Resource(e) => e.errno(),
            Self::Io(e) => e,
        }
    }
}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        Self::Format(e)
    }
}

impl From<MmError> for LoadError {
    fn from(e: MmError) -> Self {
        Self::Resource(e)
    }
}

/// What mapping one image produced.
struct MappedImage {
    entry: u32,
    phdr_addr: u32,
    phnum: u16,
    phent: u16,
    /// Page-aligned end of the highest segment; the initial program break.
    brk_top: u32,
}

fn segment_page_flags(phdr: &Elf32Phdr) -> PageFlags {
    if phdr.is_writable() {
        PageFlags::USER_RW
    } else {
        PageFlags::USER_RO
    }
}

fn segment_vma_flags(phdr: &Elf32Phdr) -> VmaFlags {
    let mut flags = VmaFlags::READ;
    if phdr.is_writable() {
        flags |= VmaFlags::WRITE;
    }
    if phdr.is_executable() {
        flags |= VmaFlags::EXEC;
    }
    flags
}

/// Copy the slice of file data that lands inside the page at `page_va`.
/// The frame is already zeroed, so the BSS tail needs no explicit fill.
fn copy_segment_page(
    data: &[u8],
    phdr: &Elf32Phdr,
    bias: u32,
    page_va: u32,
    frame: PhysAddr,
) {
    let seg_start = phdr.p_vaddr.wrapping_add(bias);
    let seg_file_end = seg_start.wrapping_add(phdr.p_filesz);
    let page_end = page_va.wrapping_add(PAGE_SIZE_4KB);

    let copy_start = seg_start.max(page_va);
    let copy_end = seg_file_end.min(page_end);
    if copy_start >= copy_end {
        return;
    }

    let src_off = (phdr.p_offset + (copy_start - seg_start)) as usize;
    let dst_off = (copy_start - page_va) as usize;
    let len = (copy_end - copy_start) as usize;
    if src_off + len > data.len() {
        return;
    }

    // SAFETY: the frame was allocated for this page moments ago and mapped
    // nowhere else.
    unsafe {
        let dst = frame.to_ptr().add(dst_off);
        core::ptr::copy_nonoverlapping(data.as_ptr().add(src_off), dst, len);
    }
}

/// Map every PT_LOAD segment of `elf` at `bias`, registering one image VMA
/// per segment. On error the caller unwinds through the VMA table.
fn map_elf_segments(
    page_dir: *mut ProcessPageDir,
    vma: &mut VmaTable,
    elf: &ElfImage<'_>,
    bias: u32,
) -> Result<MappedImage, LoadError> {
    let header = elf.header();

    // Refuse the whole image before touching any resource.
    elf.load_segment_count()?;
    for i in 0..header.e_phnum as usize {
        let phdr = elf.phdr(i)?;
        if phdr.is_load() {
            elf.validate_segment(&phdr, bias)?;
        }
    }

    let mut brk_top = 0u32;

    for i in 0..header.e_phnum as usize {
        let phdr = elf.phdr(i)?;
        if !phdr.is_load() || phdr.p_memsz == 0 {
            continue;
        }

        let seg_start = phdr.p_vaddr.wrapping_add(bias) & !(PAGE_SIZE_4KB - 1);
        let seg_end = (phdr.end_address().map_err(LoadError::Format)?.wrapping_add(bias)
            + PAGE_SIZE_4KB
            - 1)
            & !(PAGE_SIZE_4KB - 1);

        // Register the segment first; the failure unwind walks the VMA
        // table, so coverage must exist before any frame is committed.
        // Clip off any page a previous segment's VMA already covers.
        let mut insert_start = seg_start;
        while let Some(prev) = vma.find(insert_start) {
            insert_start = prev.end;
        }
        if insert_start < seg_end {
            vma.insert(insert_start, seg_end, segment_vma_flags(&phdr), VmaKind::Image)?;
        }

        let mut va = seg_start;
        while va < seg_end {
            let vaddr = VirtAddr::new(va);
            let existing = virt_to_phys_in_dir(page_dir, vaddr);
            let frame = if !existing.is_null() {
                // Adjacent segments can share a boundary page; reuse the
                // frame and widen its permissions if this segment writes.
                if phdr.is_writable() {
                    map_page_in_dir(page_dir, vaddr, existing, PageFlags::USER_RW);
                }
                existing
            } else {
                let frame = alloc_page_frame(ALLOC_FLAG_ZERO);
                if frame.is_null() {
                    klog_info!("elf: out of physical memory at {:#x}", va);
                    return Err(MmError::NoMemory.into());
                }
                if map_page_in_dir(page_dir, vaddr, frame, segment_page_flags(&phdr)) != 0 {
                    free_page_frame(frame);
                    return Err(MmError::MappingFailed.into());
                }
                frame
            };

            copy_segment_page(elf.data(), &phdr, bias, va, frame);
            va += PAGE_SIZE_4KB;
        }

        if seg_end > brk_top {
            brk_top = seg_end;
        }
    }

    Ok(MappedImage {
        entry: header.e_entry.wrapping_add(bias),
        phdr_addr: elf.phdr_table_vaddr(bias)?,
        phnum: header.e_phnum,
        phent: header.e_phentsize,
        brk_top,
    })
}

/// Read a whole file into a fresh buffer, bounded by [`MAX_FILE_SIZE`].
fn read_image_file(path: &str) -> Result<Vec<u8>, LoadError> {
    let mut buf = vec![0u8; MAX_FILE_SIZE];
    let n = fs::fs_read_file(path, &mut buf);
    if n < 0 {
        return Err(LoadError::Io(-(n as i32)));
    }
    buf.truncate(n as usize);
    Ok(buf)
}

/// Load the PT_INTERP dynamic linker at its fixed, reserved base and return
/// its entry point.
pub fn load_interpreter(
    page_dir: *mut ProcessPageDir,
    vma: &mut VmaTable,
    path: &str,
) -> Result<u32, LoadError> {
    let file = read_image_file(path)?;
    if !elf::detect(&file) {
        klog_info!("elf: interpreter {} is not an ELF image", path);
        return Err(ElfError::BadInterpreter.into());
    }
    let interp = ElfImage::new(&file)?;
    let mapped = map_elf_segments(page_dir, vma, &interp, ELF_INTERP_BASE)?;
    klog_debug!("elf: interpreter {} entry {:#x}", path, mapped.entry);
    Ok(mapped.entry)
}

/// The load sequence shared by process creation and image replacement:
/// segments, interpreter, heap boundary, stacks, and the trap frame.
///
/// On entry the process already owns a fresh page directory and VMA table.
/// On failure, partial state is left for the caller to unwind with
/// [`teardown_user_image`]; run and exec dispose of it differently.
pub fn build_process_image(
    process: *mut Process,
    data: &[u8],
    argv: &[&[u8]],
) -> Result<(), LoadError> {
    let elf = ElfImage::new(data)?;
    let bias = if elf.header().is_pie() { ELF_PIE_BASE } else { 0 };

    // SAFETY: single-mutator discipline; the process is either freshly
    // reserved (run) or executing this very syscall (exec).
    let (page_dir, vma) = unsafe {
        (
            (*process).page_dir,
            (*process).vma.as_mut().ok_or(MmError::NullPageDir)?,
        )
    };
    if page_dir.is_null() {
        return Err(MmError::NullPageDir.into());
    }

    let mapped = map_elf_segments(page_dir, vma, &elf, bias)?;

    let mut info = ElfExecInfo {
        entry: mapped.entry,
        at_entry: mapped.entry,
        phdr_addr: mapped.phdr_addr,
        phent: mapped.phent,
        phnum: mapped.phnum,
        interp_base: 0,
    };

    if let Some(interp_path) = elf.interp_path()? {
        let interp_entry = load_interpreter(page_dir, vma, interp_path)?;
        info.entry = interp_entry;
        info.interp_base = ELF_INTERP_BASE;
    }

    vma.heap_start = mapped.brk_top;
    vma.heap_current = mapped.brk_top;

    // One page of user stack, VMA first so the unwind can see it.
    vma.insert(
        USER_STACK_BASE,
        USER_STACK_TOP,
        VmaFlags::READ | VmaFlags::WRITE | VmaFlags::GROWSDOWN,
        VmaKind::Stack,
    )?;
    let user_stack = alloc_page_frame(ALLOC_FLAG_ZERO);
    if user_stack.is_null() {
        return Err(MmError::NoMemory.into());
    }
    if map_page_in_dir(
        page_dir,
        VirtAddr::new(USER_STACK_BASE),
        user_stack,
        PageFlags::USER_RW,
    ) != 0
    {
        free_page_frame(user_stack);
        return Err(MmError::MappingFailed.into());
    }

    let esp = build_initial_stack(user_stack, argv, &info)?;

    // SAFETY: as above.
    unsafe {
        (*process).user_stack = user_stack;

        // Exec reuses the kernel stack it is currently running on; run
        // allocates a fresh one.
        if (*process).kernel_stack.is_null() {
            let kernel_stack = alloc_page_frame(ALLOC_FLAG_ZERO);
            if kernel_stack.is_null() {
                return Err(MmError::NoMemory.into());
            }
            (*process).kernel_stack = kernel_stack;
        }

        let frame = TrapFrame::user_entry(info.entry, esp);
        (*process).kernel_esp = write_initial_frame((*process).kernel_stack, &frame);
    }

    Ok(())
}

/// Load and start a new process from an executable. Returns its pid.
pub fn elf_run(path: &str, argv: &[&[u8]]) -> Result<u32, LoadError> {
    let file = read_image_file(path)?;

    // Silent refusal for non-ELF files; callers probe file types with this.
    if !elf::detect(&file) {
        return Err(ElfError::InvalidMagic.into());
    }
    // Full format validation before any resource is committed.
    let image = ElfImage::new(&file)?;
    image.load_segment_count()?;

    let process = alloc_process_slot();
    if process.is_null() {
        return Err(MmError::NoProcessSlot.into());
    }
    // SAFETY: freshly reserved slot, not yet runnable.
    let pid = unsafe { (*process).pid };

    let page_dir = create_user_page_dir(pid);
    if page_dir.is_null() {
        release_process_slot(process);
        return Err(MmError::NoMemory.into());
    }

    // SAFETY: as above.
    unsafe {
        (*process).page_dir = page_dir;
        (*process).vma = Some(VmaTable::new());
        (*process).set_name(path);
    }

    match build_process_image(process, &file, argv) {
        Ok(()) => {
            // SAFETY: as above.
            unsafe {
                (*process).state = TaskState::Ready;
            }
            klog_info!("elf: started {} as pid {}", path, pid);
            Ok(pid)
        }
        Err(e) => {
            // Unwind everything mapped so far; the slot goes back unused.
            teardown_user_image(process, false);
            release_process_slot(process);
            klog_info!("elf: load of {} failed", path);
            Err(e)
        }
    }
}
