//! # Memory Page Table
//!
//! One 4 KiB-aligned array of 512 [`PageEntryBits`], used for all four levels.
//! The [`Level`] a table sits at decides how its entries decode.

use crate::page_entry_bits::{EntryKind, PageEntryBits};
use core::fmt;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_memory_addresses::VirtualAddress;

/// Paging level of a table, from the root down.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// Page Map Level 4 (root).
    Pml4,
    /// Page Directory Pointer Table; may hold 1 GiB leaves.
    Pdpt,
    /// Page Directory; may hold 2 MiB leaves.
    Pd,
    /// Page Table; holds 4 KiB leaves only.
    Pt,
}

impl Level {
    /// The entry index `va` selects in a table of this level.
    #[inline]
    #[must_use]
    pub const fn index_of(self, va: VirtualAddress) -> usize {
        match self {
            Self::Pml4 => va.pml4_index(),
            Self::Pdpt => va.pdpt_index(),
            Self::Pd => va.pd_index(),
            Self::Pt => va.pt_index(),
        }
    }

    /// The level below, or `None` for the page table.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }

    /// Bytes mapped by one leaf entry at this level, if leaves are legal here.
    #[inline]
    #[must_use]
    pub const fn leaf_size(self) -> Option<u64> {
        match self {
            Self::Pml4 => None,
            Self::Pdpt => Some(1 << 30),
            Self::Pd => Some(1 << 21),
            Self::Pt => Some(1 << 12),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pml4 => "PML4",
            Self::Pdpt => "PDPT",
            Self::Pd => "PD",
            Self::Pt => "PT",
        })
    }
}

/// A paging structure: 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

impl PageTable {
    /// A table with every entry absent.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::zero(); ENTRIES_PER_TABLE],
        }
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    /// Decoded entry at `index` for a table at `level`.
    #[inline]
    #[must_use]
    pub const fn kind(&self, level: Level, index: usize) -> EntryKind {
        self.entries[index].kind(level)
    }

    /// Whether no entry is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.present())
    }

    /// Iterate `(index, entry)` over present entries only.
    pub fn present_entries(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn indices_follow_the_address_split() {
        let va = VirtualAddress::new(0xFFFF_8888_0123_4567);
        assert_eq!(Level::Pml4.index_of(va), va.pml4_index());
        assert_eq!(Level::Pdpt.index_of(va), va.pdpt_index());
        assert_eq!(Level::Pd.index_of(va), va.pd_index());
        assert_eq!(Level::Pt.index_of(va), va.pt_index());
        assert!(Level::Pml4.index_of(va) < 512);
    }

    #[test]
    fn table_is_one_page() {
        assert_eq!(size_of::<PageTable>(), 4096);
        assert_eq!(align_of::<PageTable>(), 4096);
    }

    #[test]
    fn present_entries_skips_holes() {
        let mut t = PageTable::zeroed();
        t.set(
            3,
            PageEntryBits::kernel_rw().with_physical_address(PhysicalAddress::new(0x3000)),
        );
        t.set(
            500,
            PageEntryBits::kernel_rw().with_physical_address(PhysicalAddress::new(0x7000)),
        );
        let idx: Vec<usize> = t.present_entries().map(|(i, _)| i).collect();
        assert_eq!(idx, vec![3, 500]);
        assert!(!t.is_empty());
        t.zero();
        assert!(t.is_empty());
    }
}
