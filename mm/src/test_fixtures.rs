//! Hosted test environment.
//!
//! Stands up everything the subsystem expects from boot code: a simulated
//! physical arena behind the direct map, the page allocator, and fixture
//! kernel services (an in-memory filesystem, deterministic entropy,
//! recorded GS-base writes). Global state means tests that touch it must
//! not interleave; [`with_env`] hands out a process-wide guard.

use std::collections::HashMap;
use std::string::String;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, Once, PoisonError};
use std::vec::Vec;

use manta_abi::addr::PhysAddr;
use manta_abi::errno;
use manta_lib::kernel_services::fs::{FsServices, register_fs_services};
use manta_lib::kernel_services::platform::{PlatformServices, register_platform_services};

use crate::direct_map;
use crate::mm_constants::PAGE_SIZE_4KB;
use crate::page_alloc::page_alloc_init;

/// Simulated physical region: 16 MB at 1 MB.
pub const TEST_PHYS_BASE: u32 = 0x0010_0000;
pub const TEST_FRAME_COUNT: u32 = 4096;

static ENV_INIT: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Last GS base programmed through the platform service.
pub static LAST_GS_BASE: AtomicU32 = AtomicU32::new(0);

static FILES: Mutex<Option<HashMap<String, Vec<u8>>>> = Mutex::new(None);
static INODES: Mutex<Option<HashMap<u32, Vec<u8>>>> = Mutex::new(None);

fn fixture_read_file(path: &str, buf: &mut [u8]) -> isize {
    let files = FILES.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(map) = files.as_ref() else {
        return -(errno::ENOENT as isize);
    };
    let Some(data) = map.get(path) else {
        return -(errno::ENOENT as isize);
    };
    if data.len() > buf.len() {
        return -(errno::EINVAL as isize);
    }
    buf[..data.len()].copy_from_slice(data);
    data.len() as isize
}

fn fixture_read_at(inode: u32, buf: &mut [u8], offset: u32) -> isize {
    let inodes = INODES.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(map) = inodes.as_ref() else {
        return -(errno::EIO as isize);
    };
    let Some(data) = map.get(&inode) else {
        return -(errno::EIO as isize);
    };
    let off = offset as usize;
    if off >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - off);
    buf[..n].copy_from_slice(&data[off..off + n]);
    n as isize
}

fn fixture_rng_fill(buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = 0xA5u8.wrapping_add(i as u8);
    }
}

fn fixture_gdt_set_gs_base(base: u32) {
    LAST_GS_BASE.store(base, Ordering::SeqCst);
}

fn fixture_uid() -> u32 {
    1000
}

fn fixture_gid() -> u32 {
    1000
}

fn fixture_clock_tick_hz() -> u32 {
    100
}

static FS_TABLE: FsServices = FsServices {
    read_file: fixture_read_file,
    read_at: fixture_read_at,
};

static PLATFORM_TABLE: PlatformServices = PlatformServices {
    rng_fill: fixture_rng_fill,
    gdt_set_gs_base: fixture_gdt_set_gs_base,
    current_uid: fixture_uid,
    current_gid: fixture_gid,
    clock_tick_hz: fixture_clock_tick_hz,
};

fn init_env() {
    // One leaked arena for the whole test process, frame-aligned.
    let layout =
        std::alloc::Layout::from_size_align((TEST_FRAME_COUNT * PAGE_SIZE_4KB) as usize, 4096)
            .unwrap();
    // SAFETY: layout is non-zero; the arena is intentionally leaked.
    let arena = unsafe { std::alloc::alloc_zeroed(layout) };
    assert!(!arena.is_null());

    direct_map::init((arena as usize).wrapping_sub(TEST_PHYS_BASE as usize));
    page_alloc_init(PhysAddr::new(TEST_PHYS_BASE), TEST_FRAME_COUNT);

    register_fs_services(&FS_TABLE);
    register_platform_services(&PLATFORM_TABLE);

    *FILES.lock().unwrap() = Some(HashMap::new());
    *INODES.lock().unwrap() = Some(HashMap::new());
}

/// Run `f` with the environment up and exclusive access to global kernel
/// state.
pub fn with_env<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    ENV_INIT.call_once(init_env);
    f()
}

/// Register a file for `fs_read_file`.
pub fn install_file(path: &str, data: &[u8]) {
    let mut files = FILES.lock().unwrap_or_else(PoisonError::into_inner);
    files
        .get_or_insert_with(HashMap::new)
        .insert(String::from(path), data.to_vec());
}

/// Register an inode for `fs_read_at`.
pub fn install_inode(inode: u32, data: &[u8]) {
    let mut inodes = INODES.lock().unwrap_or_else(PoisonError::into_inner);
    inodes
        .get_or_insert_with(HashMap::new)
        .insert(inode, data.to_vec());
}

// ===========================================================================
// ELF32 image builder
// ===========================================================================

struct BuilderSegment {
    vaddr: u32,
    flags: u32,
    data: Vec<u8>,
    memsz: u32,
    offset_zero: bool,
    zero_filesz: u32,
}

/// Assembles small, valid ELF32 images for loader tests.
pub struct ElfBuilder {
    entry: u32,
    e_type: u16,
    segments: Vec<BuilderSegment>,
    interp: Option<String>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            e_type: crate::elf::ET_EXEC,
            segments: Vec::new(),
            interp: None,
        }
    }

    /// Mark the image position-independent (ET_DYN).
    pub fn pie(mut self) -> Self {
        self.e_type = crate::elf::ET_DYN;
        self
    }

    /// Add a PT_LOAD segment carrying `data`, occupying `memsz` bytes of
    /// memory (the tail past `data` is BSS).
    pub fn segment(mut self, vaddr: u32, flags: u32, data: &[u8], memsz: u32) -> Self {
        assert!(memsz as usize >= data.len());
        self.segments.push(BuilderSegment {
            vaddr,
            flags,
            data: data.to_vec(),
            memsz,
            offset_zero: false,
            zero_filesz: 0,
        });
        self
    }

    /// Add a PT_LOAD segment whose file window starts at offset 0 and spans
    /// `filesz` bytes; the shape real linkers emit for the segment that
    /// maps the ELF header and program header table.
    pub fn segment_at_offset_zero(mut self, vaddr: u32, flags: u32, filesz: u32) -> Self {
        self.segments.push(BuilderSegment {
            vaddr,
            flags,
            data: Vec::new(),
            memsz: filesz,
            offset_zero: true,
            zero_filesz: filesz,
        });
        self
    }

    pub fn interp(mut self, path: &str) -> Self {
        self.interp = Some(String::from(path));
        self
    }

    pub fn build(self) -> Vec<u8> {
        use crate::elf::{PHDR_SIZE, PT_INTERP, PT_LOAD};

        let ph_count = self.segments.len() + usize::from(self.interp.is_some());
        let phdrs_off = 52usize;
        let data_start = phdrs_off + ph_count * PHDR_SIZE;

        let mut image = Vec::new();

        // ELF header.
        image.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1]);
        image.resize(16, 0);
        image.extend_from_slice(&self.e_type.to_le_bytes());
        image.extend_from_slice(&crate::elf::EM_386.to_le_bytes());
        image.extend_from_slice(&1u32.to_le_bytes()); // e_version
        image.extend_from_slice(&self.entry.to_le_bytes());
        image.extend_from_slice(&(phdrs_off as u32).to_le_bytes()); // e_phoff
        image.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        image.extend_from_slice(&52u16.to_le_bytes()); // e_ehsize
        image.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        image.extend_from_slice(&(ph_count as u16).to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(image.len(), 52);

        // Program headers, laying out file blobs after the table.
        let mut blob_cursor = data_start as u32;
        let mut blobs: Vec<(u32, Vec<u8>)> = Vec::new();

        let mut push_phdr = |image: &mut Vec<u8>,
                             p_type: u32,
                             p_offset: u32,
                             p_vaddr: u32,
                             p_filesz: u32,
                             p_memsz: u32,
                             p_flags: u32| {
            image.extend_from_slice(&p_type.to_le_bytes());
            image.extend_from_slice(&p_offset.to_le_bytes());
            image.extend_from_slice(&p_vaddr.to_le_bytes());
            image.extend_from_slice(&p_vaddr.to_le_bytes()); // p_paddr
            image.extend_from_slice(&p_filesz.to_le_bytes());
            image.extend_from_slice(&p_memsz.to_le_bytes());
            image.extend_from_slice(&p_flags.to_le_bytes());
            image.extend_from_slice(&0x1000u32.to_le_bytes()); // p_align
        };

        for seg in &self.segments {
            if seg.offset_zero {
                push_phdr(
                    &mut image,
                    PT_LOAD,
                    0,
                    seg.vaddr,
                    seg.zero_filesz,
                    seg.memsz,
                    seg.flags,
                );
            } else {
                push_phdr(
                    &mut image,
                    PT_LOAD,
                    blob_cursor,
                    seg.vaddr,
                    seg.data.len() as u32,
                    seg.memsz,
                    seg.flags,
                );
                blobs.push((blob_cursor, seg.data.clone()));
                blob_cursor += seg.data.len() as u32;
            }
        }

        if let Some(path) = &self.interp {
            let mut bytes = path.as_bytes().to_vec();
            bytes.push(0);
            push_phdr(
                &mut image,
                PT_INTERP,
                blob_cursor,
                0,
                bytes.len() as u32,
                bytes.len() as u32,
                crate::elf::PF_R,
            );
            blobs.push((blob_cursor, bytes));
        }

        assert_eq!(image.len(), data_start);
        for (off, bytes) in blobs {
            assert_eq!(image.len(), off as usize);
            image.extend_from_slice(&bytes);
        }

        // Pad out any offset-zero file window that outruns the real bytes.
        let min_len = self
            .segments
            .iter()
            .filter(|s| s.offset_zero)
            .map(|s| s.zero_filesz as usize)
            .max()
            .unwrap_or(0);
        if image.len() < min_len {
            image.resize(min_len, 0);
        }

        image
    }
}
