//! Page table entry flags and paging constants (i386, 32-bit PTEs).

use bitflags::bitflags;

bitflags! {
    /// i386 page table entry flags.
    ///
    /// Bits 0-8 are architectural; bits 9-11 are available to the OS and
    /// carry the copy-on-write marker.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Entry is present (bit 0).
        const PRESENT       = 1 << 0;
        /// Page is writable (otherwise read-only) (bit 1).
        const WRITABLE      = 1 << 1;
        /// Page is accessible from user mode (ring 3) (bit 2).
        const USER          = 1 << 2;
        /// Write-through caching (bit 3).
        const WRITE_THROUGH = 1 << 3;
        /// Disable caching for this page (bit 4).
        const CACHE_DISABLE = 1 << 4;
        /// Set by hardware when the page is accessed (bit 5).
        const ACCESSED      = 1 << 5;
        /// Set by hardware when the page is written (bit 6).
        const DIRTY         = 1 << 6;
        /// 4MB page in a directory entry (bit 7). Never set by this kernel
        /// for user mappings.
        const LARGE         = 1 << 7;
        /// Global mapping, not flushed on CR3 switch (bit 8).
        const GLOBAL        = 1 << 8;

        // ===================================================================
        // Software-defined flags (bits 9-11)
        // ===================================================================

        /// Copy-on-Write marker (bit 9). Set together with !WRITABLE; a
        /// write fault on such a page triggers COW resolution.
        const COW           = 1 << 9;

        // ===================================================================
        // Convenience combinations
        // ===================================================================

        /// Kernel read-write page.
        const KERNEL_RW = Self::PRESENT.bits() | Self::WRITABLE.bits();
        /// User read-write page.
        const USER_RW = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
        /// User read-only page.
        const USER_RO = Self::PRESENT.bits() | Self::USER.bits();
    }
}

impl PageFlags {
    /// Bits 12-31 of a PTE hold the 4KB-aligned frame address.
    pub const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Extract the frame address from a page table entry.
    #[inline]
    pub const fn extract_address(pte: u32) -> u32 {
        pte & Self::ADDRESS_MASK
    }
}

/// Entries per page table / page directory (1024 four-byte entries).
pub const PAGE_TABLE_ENTRIES: usize = 1024;
