//! ELF32 parsing and validation.
//!
//! The loader assumes the input is untrusted: every header field is
//! bounds-checked with checked arithmetic before use, and validation fails
//! safely before any resource is committed. Format knowledge lives here;
//! mapping policy (load biases, frame allocation, VMA registration) lives in
//! [`crate::loader`].

use core::fmt;

use crate::mm_constants::{PAGE_SIZE_4KB, USER_SPACE_END_VA};

// =============================================================================
// ELF constants
// =============================================================================

/// ELF magic bytes: 0x7f 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding: little-endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF version: current
pub const EV_CURRENT: u8 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// ELF type: shared object (position-independent executable or interpreter)
pub const ET_DYN: u16 = 3;

/// ELF machine: Intel 80386
pub const EM_386: u16 = 3;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type: dynamic linking info
pub const PT_DYNAMIC: u32 = 2;

/// Program header type: interpreter path
pub const PT_INTERP: u32 = 3;

/// Program header type: the program header table itself
pub const PT_PHDR: u32 = 6;

/// Segment flag: executable
pub const PF_X: u32 = 0x1;

/// Segment flag: writable
pub const PF_W: u32 = 0x2;

/// Segment flag: readable
pub const PF_R: u32 = 0x4;

/// ELF32 header size
pub const MIN_ELF_SIZE: usize = 52;

/// ELF32 program header entry size
pub const PHDR_SIZE: usize = 32;

/// Maximum number of program headers we'll process (DoS protection)
pub const MAX_PROGRAM_HEADERS: usize = 64;

/// Longest interpreter path we accept
pub const MAX_INTERP_PATH: usize = 256;

// =============================================================================
// Error type
// =============================================================================

/// Errors that can occur during ELF validation and loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Input buffer is too small to contain an ELF header
    BufferTooSmall,
    /// Invalid ELF magic bytes
    InvalidMagic,
    /// Not a 32-bit ELF file
    Not32Bit,
    /// Not little-endian
    NotLittleEndian,
    /// Invalid ELF version
    InvalidVersion,
    /// Not an executable or shared object
    NotExecutable,
    /// Not for i386
    WrongArchitecture,
    /// Program header offset is invalid
    InvalidPhdrOffset,
    /// Program header size is invalid
    InvalidPhdrSize,
    /// Too many program headers
    TooManyProgramHeaders,
    /// Program header table extends beyond the file
    PhdrTableOverflow,
    /// Segment offset or size extends beyond the file
    InvalidSegmentOffset,
    /// Segment file size larger than memory size
    FileSizeExceedsMemSize,
    /// Segment size overflow (vaddr + memsz wraps)
    SegmentSizeOverflow,
    /// Segment maps outside the user address space
    AddressOutOfBounds,
    /// No PT_LOAD segments found
    NoLoadSegments,
    /// Interpreter path is malformed or out of bounds
    BadInterpreter,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small for ELF header"),
            Self::InvalidMagic => write!(f, "invalid ELF magic bytes"),
            Self::Not32Bit => write!(f, "not a 32-bit ELF"),
            Self::NotLittleEndian => write!(f, "not little-endian"),
            Self::InvalidVersion => write!(f, "invalid ELF version"),
            Self::NotExecutable => write!(f, "not an executable or shared object"),
            Self::WrongArchitecture => write!(f, "not an i386 image"),
            Self::InvalidPhdrOffset => write!(f, "invalid program header offset"),
            Self::InvalidPhdrSize => write!(f, "invalid program header size"),
            Self::TooManyProgramHeaders => write!(f, "too many program headers"),
            Self::PhdrTableOverflow => write!(f, "program header table overflow"),
            Self::InvalidSegmentOffset => write!(f, "segment offset overflow"),
            Self::FileSizeExceedsMemSize => write!(f, "segment file size > memory size"),
            Self::SegmentSizeOverflow => write!(f, "segment size overflow"),
            Self::AddressOutOfBounds => write!(f, "segment outside user address space"),
            Self::NoLoadSegments => write!(f, "no loadable segments"),
            Self::BadInterpreter => write!(f, "malformed interpreter path"),
        }
    }
}

/// Result type for ELF operations.
pub type ElfResult<T> = Result<T, ElfError>;

// =============================================================================
// Detection
// =============================================================================

/// Check the four magic bytes only. Whether the image is an executable or a
/// position-independent object is the caller's job to distinguish.
pub fn detect(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == ELF_MAGIC
}

// =============================================================================
// Headers
// =============================================================================

/// Validated ELF32 header.
#[derive(Debug, Clone, Copy)]
pub struct Elf32Ehdr {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

impl Elf32Ehdr {
    /// Parse and validate an ELF32 header from raw bytes.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < MIN_ELF_SIZE {
            return Err(ElfError::BufferTooSmall);
        }

        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if data[4] != ELFCLASS32 {
            return Err(ElfError::Not32Bit);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::NotLittleEndian);
        }
        if data[6] != EV_CURRENT {
            return Err(ElfError::InvalidVersion);
        }

        let header = Self {
            e_type: read_u16(data, 16),
            e_machine: read_u16(data, 18),
            e_version: read_u32(data, 20),
            e_entry: read_u32(data, 24),
            e_phoff: read_u32(data, 28),
            e_shoff: read_u32(data, 32),
            e_flags: read_u32(data, 36),
            e_ehsize: read_u16(data, 40),
            e_phentsize: read_u16(data, 42),
            e_phnum: read_u16(data, 44),
            e_shentsize: read_u16(data, 46),
            e_shnum: read_u16(data, 48),
            e_shstrndx: read_u16(data, 50),
        };

        if header.e_type != ET_EXEC && header.e_type != ET_DYN {
            return Err(ElfError::NotExecutable);
        }
        if header.e_machine != EM_386 {
            return Err(ElfError::WrongArchitecture);
        }
        if header.e_phoff == 0 {
            return Err(ElfError::InvalidPhdrOffset);
        }
        if (header.e_phentsize as usize) < PHDR_SIZE {
            return Err(ElfError::InvalidPhdrSize);
        }
        if header.e_phnum == 0 {
            return Err(ElfError::NoLoadSegments);
        }
        if header.e_phnum as usize > MAX_PROGRAM_HEADERS {
            return Err(ElfError::TooManyProgramHeaders);
        }

        Ok(header)
    }

    /// Total size of the program header table.
    pub fn phdr_table_size(&self) -> usize {
        self.e_phnum as usize * self.e_phentsize as usize
    }

    /// Position-independent images need a load bias.
    pub fn is_pie(&self) -> bool {
        self.e_type == ET_DYN
    }
}

/// One ELF32 program header.
#[derive(Debug, Clone, Copy)]
pub struct Elf32Phdr {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

impl Elf32Phdr {
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < PHDR_SIZE {
            return Err(ElfError::BufferTooSmall);
        }
        Ok(Self {
            p_type: read_u32(data, 0),
            p_offset: read_u32(data, 4),
            p_vaddr: read_u32(data, 8),
            p_paddr: read_u32(data, 12),
            p_filesz: read_u32(data, 16),
            p_memsz: read_u32(data, 20),
            p_flags: read_u32(data, 24),
            p_align: read_u32(data, 28),
        })
    }

    #[inline]
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.p_flags & PF_W != 0
    }

    #[inline]
    pub fn is_executable(&self) -> bool {
        self.p_flags & PF_X != 0
    }

    /// vaddr + memsz with overflow checking.
    pub fn end_address(&self) -> ElfResult<u32> {
        self.p_vaddr
            .checked_add(self.p_memsz)
            .ok_or(ElfError::SegmentSizeOverflow)
    }

    /// offset + filesz with overflow checking.
    pub fn file_end(&self) -> ElfResult<u32> {
        self.p_offset
            .checked_add(self.p_filesz)
            .ok_or(ElfError::InvalidSegmentOffset)
    }
}

// =============================================================================
// Whole-image wrapper
// =============================================================================

/// A validated view over an ELF32 file in memory.
#[derive(Debug)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    header: Elf32Ehdr,
}

impl<'a> ElfImage<'a> {
    /// Validate the header and the program header table bounds.
    pub fn new(data: &'a [u8]) -> ElfResult<Self> {
        let header = Elf32Ehdr::parse(data)?;

        let table_end = (header.e_phoff as usize)
            .checked_add(header.phdr_table_size())
            .ok_or(ElfError::PhdrTableOverflow)?;
        if table_end > data.len() {
            return Err(ElfError::PhdrTableOverflow);
        }

        Ok(Self { data, header })
    }

    pub fn header(&self) -> &Elf32Ehdr {
        &self.header
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn phdr(&self, index: usize) -> ElfResult<Elf32Phdr> {
        if index >= self.header.e_phnum as usize {
            return Err(ElfError::InvalidPhdrOffset);
        }
        let off = self.header.e_phoff as usize + index * self.header.e_phentsize as usize;
        Elf32Phdr::parse(&self.data[off..off + PHDR_SIZE])
    }

    /// Validate one PT_LOAD segment against the file and the user address
    /// space, with `bias` applied.
    pub fn validate_segment(&self, phdr: &Elf32Phdr, bias: u32) -> ElfResult<()> {
        let file_end = phdr.file_end()?;
        if file_end as usize > self.data.len() {
            return Err(ElfError::InvalidSegmentOffset);
        }
        if phdr.p_filesz > phdr.p_memsz {
            return Err(ElfError::FileSizeExceedsMemSize);
        }

        let vaddr = phdr
            .p_vaddr
            .checked_add(bias)
            .ok_or(ElfError::SegmentSizeOverflow)?;
        let mem_end = phdr
            .end_address()?
            .checked_add(bias)
            .ok_or(ElfError::SegmentSizeOverflow)?;
        let aligned_end = mem_end
            .checked_add(PAGE_SIZE_4KB - 1)
            .ok_or(ElfError::SegmentSizeOverflow)?
            & !(PAGE_SIZE_4KB - 1);

        if vaddr >= USER_SPACE_END_VA || aligned_end > USER_SPACE_END_VA {
            return Err(ElfError::AddressOutOfBounds);
        }

        Ok(())
    }

    /// The PT_INTERP path, if the image requests a dynamic linker.
    pub fn interp_path(&self) -> ElfResult<Option<&'a str>> {
        for i in 0..self.header.e_phnum as usize {
            let phdr = self.phdr(i)?;
            if phdr.p_type != PT_INTERP {
                continue;
            }
            let start = phdr.p_offset as usize;
            let len = phdr.p_filesz as usize;
            if len == 0 || len > MAX_INTERP_PATH {
                return Err(ElfError::BadInterpreter);
            }
            let end = start.checked_add(len).ok_or(ElfError::BadInterpreter)?;
            if end > self.data.len() {
                return Err(ElfError::BadInterpreter);
            }
            let bytes = &self.data[start..end];
            // The path is NUL-terminated inside the segment.
            let nul = bytes
                .iter()
                .position(|&b| b == 0)
                .ok_or(ElfError::BadInterpreter)?;
            let path = core::str::from_utf8(&bytes[..nul]).map_err(|_| ElfError::BadInterpreter)?;
            if path.is_empty() {
                return Err(ElfError::BadInterpreter);
            }
            return Ok(Some(path));
        }
        Ok(None)
    }

    /// User virtual address of the program header table after loading.
    ///
    /// Prefer an explicit PT_PHDR entry. Without one, compute from the
    /// PT_LOAD segment whose file range covers `e_phoff`. Either way, the
    /// result is only trusted if it actually falls inside a loaded segment;
    /// a PT_PHDR that points nowhere is recomputed rather than believed.
    pub fn phdr_table_vaddr(&self, bias: u32) -> ElfResult<u32> {
        let mut from_pt_phdr = None;
        for i in 0..self.header.e_phnum as usize {
            let phdr = self.phdr(i)?;
            if phdr.p_type == PT_PHDR {
                from_pt_phdr = Some(phdr.p_vaddr.wrapping_add(bias));
                break;
            }
        }

        if let Some(addr) = from_pt_phdr {
            if self.vaddr_in_load_segment(addr, bias)? {
                return Ok(addr);
            }
        }

        // Fall back to the segment that maps the header table's file bytes.
        for i in 0..self.header.e_phnum as usize {
            let phdr = self.phdr(i)?;
            if !phdr.is_load() {
                continue;
            }
            let file_end = phdr.file_end()?;
            if self.header.e_phoff >= phdr.p_offset && self.header.e_phoff < file_end {
                let addr = phdr
                    .p_vaddr
                    .wrapping_add(self.header.e_phoff - phdr.p_offset)
                    .wrapping_add(bias);
                return Ok(addr);
            }
        }

        // Not mapped by any segment; the aux vector reports 0 and static
        // startup code copes.
        Ok(0)
    }

    fn vaddr_in_load_segment(&self, addr: u32, bias: u32) -> ElfResult<bool> {
        for i in 0..self.header.e_phnum as usize {
            let phdr = self.phdr(i)?;
            if !phdr.is_load() {
                continue;
            }
            let start = phdr.p_vaddr.wrapping_add(bias);
            let end = phdr.end_address()?.wrapping_add(bias);
            if addr >= start && addr < end {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Count of PT_LOAD segments; images without any are refused.
    pub fn load_segment_count(&self) -> ElfResult<usize> {
        let mut count = 0;
        for i in 0..self.header.e_phnum as usize {
            if self.phdr(i)?.is_load() {
                count += 1;
            }
        }
        if count == 0 {
            return Err(ElfError::NoLoadSegments);
        }
        Ok(count)
    }
}
