//! VMA flags and semantic kinds.
//!
//! Protection bits mirror what userland requests through `mmap`/`mprotect`;
//! state bits track how the region is backed. The conversion to
//! [`PageFlags`] is where COW overrides writability: a COW region maps
//! read-only no matter what its VMA says, until the write fault copies it.

use bitflags::bitflags;

use crate::paging_defs::PageFlags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct VmaFlags: u32 {
        // Protection
        const READ      = 1 << 0;
        const WRITE     = 1 << 1;
        const EXEC      = 1 << 2;

        // State
        /// Stack-style region that grows toward lower addresses.
        const GROWSDOWN = 1 << 3;
        /// Anonymous memory, zero-filled when materialized.
        const ANON      = 1 << 4;
        /// Physical frames are allocated on first fault, not up front.
        const LAZY      = 1 << 5;
        /// Frames are shared with another address space; writes must fault.
        const COW       = 1 << 6;
    }
}

impl VmaFlags {
    /// Leaf PTE flags for a resident page of this region.
    pub const fn to_page_flags(self) -> PageFlags {
        let mut pf = PageFlags::PRESENT.union(PageFlags::USER);
        if self.contains(Self::COW) {
            pf = pf.union(PageFlags::COW);
        } else if self.contains(Self::WRITE) {
            pf = pf.union(PageFlags::WRITABLE);
        }
        pf
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    #[inline]
    pub const fn is_demand_paged(self) -> bool {
        self.contains(Self::LAZY)
    }

    #[inline]
    pub const fn is_anonymous(self) -> bool {
        self.contains(Self::ANON)
    }
}

/// What a VMA is for. Reported in /proc-style maps listings and used by the
/// heap/stack paths to find their regions.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VmaKind {
    #[default]
    None = 0,
    /// ELF PT_LOAD segment.
    Image = 1,
    /// brk heap.
    Heap = 2,
    /// User stack.
    Stack = 3,
    /// Anonymous or file-read mmap.
    Anon = 4,
}

impl VmaKind {
    pub const fn name(self) -> &'static str {
        match self {
            VmaKind::None => "???",
            VmaKind::Image => "image",
            VmaKind::Heap => "heap",
            VmaKind::Stack => "stack",
            VmaKind::Anon => "anon",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_flags_conversion() {
        let rw = VmaFlags::READ | VmaFlags::WRITE;
        let pf = rw.to_page_flags();
        assert!(pf.contains(PageFlags::PRESENT));
        assert!(pf.contains(PageFlags::USER));
        assert!(pf.contains(PageFlags::WRITABLE));

        let ro = VmaFlags::READ | VmaFlags::EXEC;
        assert!(!ro.to_page_flags().contains(PageFlags::WRITABLE));
    }

    #[test]
    fn cow_overrides_writable() {
        let cow = VmaFlags::READ | VmaFlags::WRITE | VmaFlags::COW;
        let pf = cow.to_page_flags();
        assert!(!pf.contains(PageFlags::WRITABLE));
        assert!(pf.contains(PageFlags::COW));
    }
}
