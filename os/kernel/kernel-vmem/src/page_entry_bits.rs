use crate::page_table::Level;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{Frame, PhysicalAddress};

/// A single 64-bit x86-64 paging-structure entry in its raw bitfield form.
///
/// This structure models the **common superset** of fields found in all
/// four paging levels (PML4E, PDPTE, PDE, PTE). How an entry is interpreted
/// depends on the level it lives in; use [`PageEntryBits::kind`] to get the
/// decoded, tagged view instead of poking at `large_page` directly.
///
/// ### Bit layout (canonical)
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Large page flag (PAT in a PTE) |
/// | 8         | `G`               | Global (leaf only) |
/// | 9         | `owned` (OS)      | Leaf frame came from the frame allocator |
/// | 10–11     | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU` / OS use    | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::user_rw().with_physical_address(PhysicalAddress::new(0x12000));
/// assert!(e.present());
/// assert!(e.user_access());
/// assert_eq!(e.physical_address().as_u64(), 0x12000);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Effective permissions are the intersection over the walk, so a user
    /// leaf needs this bit on every intermediate entry as well.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6) — **leaf only**. Set by the CPU on first write.
    pub dirty: bool,

    /// Large Page / Page Size (PS, bit 7).
    ///
    /// For L3 (PDPTE) and L2 (PDE): when **set**, the entry is a **leaf**
    /// mapping a 1 GiB (L3) or 2 MiB (L2) page. Must be clear in a PML4E; in
    /// a PTE the same position is PAT, which this kernel never sets.
    pub large_page: bool,

    /// Global (G, bit 8) — **leaf only**.
    pub global_translation: bool,

    /// OS-available bit 9: the leaf frame is privately owned by the address
    /// space and goes back to the frame allocator on unmap or destroy.
    pub owned: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (PKU, bits 59..=62) if supported; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

/// Decoded view of a [`PageEntryBits`] at a known [`Level`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// Not present.
    Absent,
    /// Points to the next-level table held in the given frame.
    Table(Frame),
    /// A 4 KiB mapping (PT level).
    Leaf(PhysicalAddress),
    /// A 2 MiB (PD) or 1 GiB (PDPT) mapping.
    Huge(PhysicalAddress),
}

impl PageEntryBits {
    /// An empty (not present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        // store bits [51:12]
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Decode the entry according to the level it lives in.
    #[inline]
    #[must_use]
    pub const fn kind(self, level: Level) -> EntryKind {
        if !self.present() {
            return EntryKind::Absent;
        }
        match level {
            Level::Pt => EntryKind::Leaf(self.physical_address()),
            Level::Pml4 => EntryKind::Table(Frame::containing(self.physical_address())),
            Level::Pdpt | Level::Pd if self.large_page() => {
                EntryKind::Huge(self.physical_address())
            }
            Level::Pdpt | Level::Pd => EntryKind::Table(Frame::containing(self.physical_address())),
        }
    }

    /// Non-leaf link to the table in `frame`.
    #[inline]
    #[must_use]
    pub const fn table(frame: Frame, user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(user)
            .with_physical_address(frame.base())
    }

    /// Kernel read/write data, not executable.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_no_execute(true)
    }

    /// User read/write data, not executable.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_no_execute(true)
    }

    /// User read-only data, not executable.
    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::new()
            .with_present(true)
            .with_user_access(true)
            .with_no_execute(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn absent_decodes_as_absent_at_every_level() {
        let e = PageEntryBits::zero().with_physical_address(PhysicalAddress::new(0x5000));
        for level in [Level::Pml4, Level::Pdpt, Level::Pd, Level::Pt] {
            assert_eq!(e.kind(level), EntryKind::Absent);
        }
    }

    #[test]
    fn large_page_only_means_huge_at_pdpt_and_pd() {
        let e = PageEntryBits::kernel_rw()
            .with_large_page(true)
            .with_physical_address(PhysicalAddress::new(0x4000_0000));
        assert_eq!(
            e.kind(Level::Pdpt),
            EntryKind::Huge(PhysicalAddress::new(0x4000_0000))
        );
        assert_eq!(
            e.kind(Level::Pd),
            EntryKind::Huge(PhysicalAddress::new(0x4000_0000))
        );
        assert_eq!(
            e.kind(Level::Pt),
            EntryKind::Leaf(PhysicalAddress::new(0x4000_0000))
        );
        assert!(matches!(e.kind(Level::Pml4), EntryKind::Table(_)));
    }

    #[test]
    fn table_link_keeps_frame_and_user_bit() {
        let f = Frame::from_index(42);
        let e = PageEntryBits::table(f, true);
        assert_eq!(e.kind(Level::Pd), EntryKind::Table(f));
        assert!(e.user_access());
        assert!(e.writable());
        assert!(!e.no_execute());
    }

    #[test]
    fn owned_bit_is_bit_nine() {
        let e = PageEntryBits::zero().with_owned(true);
        assert_eq!(e.into_bits(), 1 << 9);
    }
}
