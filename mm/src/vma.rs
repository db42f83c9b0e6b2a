//! Virtual Memory Area tracking for per-process address spaces.
//!
//! Each process owns a `VmaTable` with up to [`VMA_MAX_PER_TASK`] entries
//! describing its mapped regions (ELF segments, stack, heap, anonymous
//! mmap). All operations are O(n) linear scans over the fixed array; fast
//! enough for our task count and VMA density, and the fixed capacity is part
//! of the contract: when the table fills, insertion fails and the caller
//! propagates an out-of-resources error.
//!
//! Active entries never overlap. Adjacent compatible entries are *not*
//! coalesced; the slack in accounting is accepted.
//!
//! Destroying a table never frees physical frames; frames may be shared
//! with other address spaces, so releasing them is the caller's job, made
//! through the frame refcounter.

use manta_lib::klog_info;

use crate::error::{MmError, MmResult};
use crate::mm_constants::{MMAP_BASE, MMAP_LIMIT, PAGE_SIZE_4KB, VMA_MAX_PER_TASK};
use crate::vma_flags::{VmaFlags, VmaKind};

/// One tracked range. `end` is exclusive; both bounds are page-aligned.
#[derive(Clone, Copy, Debug, Default)]
pub struct Vma {
    pub start: u32,
    pub end: u32,
    pub flags: VmaFlags,
    pub kind: VmaKind,
    pub active: bool,
}

impl Vma {
    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        self.active && addr >= self.start && addr < self.end
    }

    #[inline]
    fn overlaps(&self, start: u32, end: u32) -> bool {
        self.active && start < self.end && end > self.start
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }
}

#[derive(Clone)]
pub struct VmaTable {
    vmas: [Vma; VMA_MAX_PER_TASK],
    count: u32,
    /// Next candidate address for the anonymous-mmap gap search. Advances
    /// monotonically past each successful allocation.
    pub mmap_next: u32,
    /// Initial program break, set by the loader to the page-aligned end of
    /// the highest image segment.
    pub heap_start: u32,
    /// Current program break (raw, not page-aligned). `heap_start ==
    /// heap_current` is the empty-heap placeholder; the heap VMA
    /// materializes on first growth.
    pub heap_current: u32,
    /// Total mapped bytes (informational).
    pub total_mapped: u32,
}

impl VmaTable {
    pub const fn new() -> Self {
        Self {
            vmas: [Vma {
                start: 0,
                end: 0,
                flags: VmaFlags::empty(),
                kind: VmaKind::None,
                active: false,
            }; VMA_MAX_PER_TASK],
            count: 0,
            mmap_next: MMAP_BASE,
            heap_start: 0,
            heap_current: 0,
            total_mapped: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.iter().filter(|v| v.active)
    }

    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = &mut Vma> {
        self.vmas.iter_mut().filter(|v| v.active)
    }

    /// Whether `[start, end)` intersects any active VMA.
    pub fn range_overlaps(&self, start: u32, end: u32) -> bool {
        self.vmas.iter().any(|v| v.overlaps(start, end))
    }

    fn free_slot(&mut self) -> Option<usize> {
        self.vmas.iter().position(|v| !v.active)
    }

    /// Find the active VMA containing `addr`.
    pub fn find(&self, addr: u32) -> Option<&Vma> {
        self.vmas.iter().find(|v| v.contains(addr))
    }

    pub fn find_mut(&mut self, addr: u32) -> Option<&mut Vma> {
        self.vmas.iter_mut().find(|v| v.contains(addr))
    }

    /// Insert a new range. Bounds are page-aligned (start down, end up).
    /// Fails when the table is full or the range would overlap an active
    /// entry.
    pub fn insert(&mut self, start: u32, end: u32, flags: VmaFlags, kind: VmaKind) -> MmResult {
        if start >= end {
            return Err(MmError::InvalidAddress);
        }

        let start = start & !(PAGE_SIZE_4KB - 1);
        let end = match end.checked_add(PAGE_SIZE_4KB - 1) {
            Some(v) => v & !(PAGE_SIZE_4KB - 1),
            None => return Err(MmError::InvalidAddress),
        };

        if self.vmas.iter().any(|v| v.overlaps(start, end)) {
            return Err(MmError::VmaOverlap);
        }

        let Some(slot) = self.free_slot() else {
            klog_info!("vma: table full, cannot insert [{:#x}, {:#x})", start, end);
            return Err(MmError::VmaTableFull);
        };

        self.vmas[slot] = Vma {
            start,
            end,
            flags,
            kind,
            active: true,
        };
        self.count += 1;
        self.total_mapped += end - start;
        Ok(())
    }

    /// Split the VMA containing `addr` into `[start, addr)` and
    /// `[addr, end)`, both keeping the original flags and kind.
    ///
    /// Splitting at an existing boundary, or at an address no VMA covers, is
    /// a silent no-op. Fails only when a new slot is needed and the table is
    /// full.
    pub fn split(&mut self, addr: u32) -> MmResult {
        let addr = addr & !(PAGE_SIZE_4KB - 1);

        let Some(idx) = self.vmas.iter().position(|v| v.contains(addr)) else {
            return Ok(());
        };

        if addr == self.vmas[idx].start || addr == self.vmas[idx].end {
            return Ok(());
        }

        let Some(slot) = self.free_slot() else {
            return Err(MmError::VmaTableFull);
        };

        let upper = Vma {
            start: addr,
            end: self.vmas[idx].end,
            flags: self.vmas[idx].flags,
            kind: self.vmas[idx].kind,
            active: true,
        };
        self.vmas[idx].end = addr;
        self.vmas[slot] = upper;
        self.count += 1;
        Ok(())
    }

    /// Remove all VMA coverage in `[start, end)`, trimming, splitting, or
    /// deactivating entries as needed. Returns the number of pages of
    /// coverage removed; callers use it to unmap the corresponding
    /// physical pages.
    pub fn remove(&mut self, start: u32, end: u32) -> u32 {
        if start >= end {
            return 0;
        }

        let start = start & !(PAGE_SIZE_4KB - 1);
        let end = end
            .checked_add(PAGE_SIZE_4KB - 1)
            .map(|v| v & !(PAGE_SIZE_4KB - 1))
            .unwrap_or(u32::MAX & !(PAGE_SIZE_4KB - 1));

        let mut pages_removed = 0u32;

        for i in 0..VMA_MAX_PER_TASK {
            let v = self.vmas[i];
            if !v.active || v.end <= start || v.start >= end {
                continue;
            }

            if start <= v.start && end >= v.end {
                // Entire VMA inside the removal range.
                pages_removed += v.len() / PAGE_SIZE_4KB;
                self.total_mapped -= v.len();
                self.vmas[i].active = false;
                self.count -= 1;
            } else if start > v.start && end < v.end {
                // Removal punches a hole: shrink to the lower piece and
                // create a new entry for the upper piece. With no free slot
                // the upper piece loses its tracking entry; the pages are
                // still reported so the caller unmaps them.
                let old_end = v.end;
                self.total_mapped -= v.len();
                self.vmas[i].end = start;
                self.total_mapped += self.vmas[i].len();

                if let Some(slot) = self.free_slot() {
                    self.vmas[slot] = Vma {
                        start: end,
                        end: old_end,
                        flags: v.flags,
                        kind: v.kind,
                        active: true,
                    };
                    self.count += 1;
                    self.total_mapped += old_end - end;
                } else {
                    klog_info!("vma: no slot for split remainder, dropping tracking");
                }

                pages_removed += (end - start) / PAGE_SIZE_4KB;
            } else if start <= v.start {
                // Trim from the left.
                pages_removed += (end - v.start) / PAGE_SIZE_4KB;
                self.total_mapped -= end - v.start;
                self.vmas[i].start = end;
            } else {
                // Trim from the right.
                pages_removed += (v.end - start) / PAGE_SIZE_4KB;
                self.total_mapped -= v.end - start;
                self.vmas[i].end = start;
            }
        }

        pages_removed
    }

    /// Find a free gap of at least `len` bytes, scanning forward from the
    /// stored hint and skipping active VMAs. On success the hint advances
    /// past the returned range.
    pub fn find_free(&mut self, len: u32) -> Option<u32> {
        if len == 0 {
            return None;
        }

        let len = len.checked_add(PAGE_SIZE_4KB - 1)? & !(PAGE_SIZE_4KB - 1);
        let mut candidate = self.mmap_next;

        for _ in 0..1024 {
            let candidate_end = candidate.checked_add(len)?;
            if candidate_end > MMAP_LIMIT {
                return None;
            }

            if !self.vmas.iter().any(|v| v.overlaps(candidate, candidate_end)) {
                self.mmap_next = candidate_end;
                return Some(candidate);
            }

            // Advance past whatever VMA we hit.
            let mut best_end = candidate + PAGE_SIZE_4KB;
            for v in self.vmas.iter().filter(|v| v.contains(candidate)) {
                if v.end > best_end {
                    best_end = v.end;
                }
            }
            candidate = best_end;
        }

        None
    }

    /// Deactivate every entry. Physical frames are untouched.
    pub fn clear(&mut self) {
        for v in self.vmas.iter_mut() {
            v.active = false;
        }
        self.count = 0;
        self.total_mapped = 0;
    }
}

impl Default for VmaTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: u32 = PAGE_SIZE_4KB;
    const RW: VmaFlags = VmaFlags::READ.union(VmaFlags::WRITE);

    fn assert_no_overlap(table: &VmaTable) {
        let active: std::vec::Vec<&Vma> = table.iter_active().collect();
        for (i, a) in active.iter().enumerate() {
            for b in active.iter().skip(i + 1) {
                assert!(
                    a.end <= b.start || b.end <= a.start,
                    "VMAs overlap: [{:#x},{:#x}) and [{:#x},{:#x})",
                    a.start,
                    a.end,
                    b.start,
                    b.end
                );
            }
        }
    }

    #[test]
    fn insert_aligns_and_tracks() {
        let mut t = VmaTable::new();
        t.insert(0x1000, 0x2800, RW, VmaKind::Anon).unwrap();
        let v = t.find(0x2FFF).expect("aligned end covers 0x2FFF");
        assert_eq!(v.start, 0x1000);
        assert_eq!(v.end, 0x3000);
        assert_eq!(t.len(), 1);
        assert!(t.find(0x3000).is_none());
    }

    #[test]
    fn insert_rejects_overlap_and_inverted_range() {
        let mut t = VmaTable::new();
        t.insert(0x1000, 0x3000, RW, VmaKind::Anon).unwrap();
        assert_eq!(
            t.insert(0x2000, 0x4000, RW, VmaKind::Anon),
            Err(MmError::VmaOverlap)
        );
        assert_eq!(
            t.insert(0x5000, 0x5000, RW, VmaKind::Anon),
            Err(MmError::InvalidAddress)
        );
        assert_no_overlap(&t);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut t = VmaTable::new();
        for i in 0..VMA_MAX_PER_TASK as u32 {
            t.insert(i * 2 * PG, i * 2 * PG + PG, RW, VmaKind::Anon)
                .unwrap();
        }
        assert_eq!(
            t.insert(0x1000_0000, 0x1000_1000, RW, VmaKind::Anon),
            Err(MmError::VmaTableFull)
        );
    }

    #[test]
    fn split_divides_and_is_idempotent_at_boundaries() {
        let mut t = VmaTable::new();
        t.insert(0x1000, 0x4000, RW, VmaKind::Anon).unwrap();

        // Boundary split: no change.
        t.split(0x1000).unwrap();
        t.split(0x4000).unwrap();
        assert_eq!(t.len(), 1);

        // No VMA covers this point: silent no-op.
        t.split(0x8000).unwrap();
        assert_eq!(t.len(), 1);

        // Interior split.
        t.split(0x2000).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.find(0x1000).unwrap().end, 0x2000);
        assert_eq!(t.find(0x2000).unwrap().end, 0x4000);
        assert_eq!(t.find(0x2000).unwrap().flags, RW);
        assert_no_overlap(&t);
    }

    #[test]
    fn remove_whole_trim_and_hole() {
        let mut t = VmaTable::new();
        t.insert(0x1000, 0x5000, RW, VmaKind::Anon).unwrap();

        // Hole in the middle: 1 page out, table splits in two.
        assert_eq!(t.remove(0x2000, 0x3000), 1);
        assert_eq!(t.len(), 2);
        assert!(t.find(0x2000).is_none());
        assert_eq!(t.find(0x1000).unwrap().end, 0x2000);
        assert_eq!(t.find(0x3000).unwrap().end, 0x5000);
        assert_no_overlap(&t);

        // Left trim of the upper piece.
        assert_eq!(t.remove(0x3000, 0x4000), 1);
        assert_eq!(t.find(0x4000).unwrap().start, 0x4000);

        // Remove everything left.
        assert_eq!(t.remove(0, 0x10000), 2);
        assert_eq!(t.len(), 0);
        assert_eq!(t.total_mapped, 0);
    }

    #[test]
    fn remove_spanning_multiple_vmas() {
        let mut t = VmaTable::new();
        t.insert(0x1000, 0x2000, RW, VmaKind::Anon).unwrap();
        t.insert(0x3000, 0x4000, RW, VmaKind::Image).unwrap();
        assert_eq!(t.remove(0x0000, 0x8000), 2);
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn find_free_returns_aligned_gap_and_advances_hint() {
        let mut t = VmaTable::new();
        let a = t.find_free(3 * PG).expect("gap");
        assert_eq!(a % PG, 0);
        assert_eq!(a, MMAP_BASE);
        assert_eq!(t.mmap_next, a + 3 * PG);

        t.insert(a, a + 3 * PG, RW, VmaKind::Anon).unwrap();
        let b = t.find_free(PG).expect("second gap");
        assert!(b >= a + 3 * PG);
        t.insert(b, b + PG, RW, VmaKind::Anon).unwrap();
        assert_no_overlap(&t);
    }

    #[test]
    fn find_free_skips_occupied_hint() {
        let mut t = VmaTable::new();
        // Occupy the hint location directly.
        t.insert(MMAP_BASE, MMAP_BASE + 4 * PG, RW, VmaKind::Anon)
            .unwrap();
        let a = t.find_free(PG).expect("gap past occupied region");
        assert!(a >= MMAP_BASE + 4 * PG);
        for v in t.iter_active() {
            assert!(a + PG <= v.start || a >= v.end);
        }
    }

    #[test]
    fn find_free_rejects_absurd_sizes() {
        let mut t = VmaTable::new();
        assert!(t.find_free(0).is_none());
        assert!(t.find_free(u32::MAX).is_none());
    }

    #[test]
    fn clone_is_deep() {
        let mut t = VmaTable::new();
        t.insert(0x1000, 0x2000, RW, VmaKind::Image).unwrap();
        t.heap_start = 0x2000;
        t.heap_current = 0x2000;

        let mut c = t.clone();
        c.insert(0x5000, 0x6000, RW, VmaKind::Anon).unwrap();
        c.heap_current = 0x3000;

        assert_eq!(t.len(), 1);
        assert_eq!(c.len(), 2);
        assert_eq!(t.heap_current, 0x2000);
        assert_eq!(c.heap_start, 0x2000);
    }

    #[test]
    fn random_op_sequence_preserves_non_overlap() {
        let mut t = VmaTable::new();
        // Deterministic pseudo-random walk over insert/split/remove.
        let mut seed = 0x1234_5678u32;
        let mut next = || {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            seed
        };
        for _ in 0..200 {
            let base = 0x1000 + (next() % 64) * PG;
            match next() % 3 {
                0 => {
                    let _ = t.insert(base, base + (1 + next() % 4) * PG, RW, VmaKind::Anon);
                }
                1 => {
                    let _ = t.split(base);
                }
                _ => {
                    let _ = t.remove(base, base + (1 + next() % 4) * PG);
                }
            }
            assert_no_overlap(&t);
        }
    }
}
