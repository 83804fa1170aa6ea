//! # Memory Page Table Mapping Size
//!
//! This module defines the behavior of [`AddressSpace::map`] for the
//! different page sizes.
//!
//! The [`MapSize`] trait is implemented for each page size and provides:
//!
//! - `ensure_chain_for`: make sure the non-leaf chain for a virtual address
//!   exists down to the table that holds the leaf for that page size.
//! - `set_leaf`: write the leaf entry into that table.

use crate::page_entry_bits::{EntryKind, PageEntryBits};
use crate::page_table::Level;
use crate::{AddressSpace, FrameAlloc, MapError, PhysMapper};
use kernel_memory_addresses::{Frame, PageSize, PhysicalAddress, Size1G, Size2M, Size4K, VirtualAddress};

/// # Page-size–directed mapping behavior
///
/// `MapSize` encodes, at the type level, how to:
/// 1) **ensure** the non-leaf page-table chain exists for a given virtual
///    address, and
/// 2) **install** the correct **leaf** entry for that page size.
///
/// ## What `ensure_chain_for` returns
///
/// The frame of the table into which the leaf is written:
///
/// - [`Size1G`]: the **PDPT** (a PDPTE with `PS=1`).
/// - [`Size2M`]: the **PD** (a PDE with `PS=1`).
/// - [`Size4K`]: the **PT** (a PTE).
///
/// Newly created tables are zeroed and linked present + writable, with the
/// user bit when the leaf will be user-accessible. A 2 MiB leaf in the way
/// of a 4 KiB mapping is split; a 1 GiB leaf in the way of anything smaller
/// is an error, and so is a huge mapping on top of an existing table.
pub trait MapSize: PageSize {
    /// The level that holds leaves of this size.
    const LEAF_LEVEL: Level;

    /// Ensure the non-leaf chain for `va` exists down to the table holding
    /// the leaf for `Self`.
    ///
    /// # Errors
    /// See [`AddressSpace::map`].
    fn ensure_chain_for<A: FrameAlloc, M: PhysMapper>(
        aspace: &AddressSpace<M>,
        alloc: &mut A,
        va: VirtualAddress,
        user: bool,
    ) -> Result<Frame, MapError>;

    /// Install the **leaf** entry for `va → pa` in `leaf_table`.
    fn set_leaf<M: PhysMapper>(
        aspace: &AddressSpace<M>,
        leaf_table: Frame,
        va: VirtualAddress,
        pa: PhysicalAddress,
        leaf_flags: PageEntryBits,
    ) {
        debug_assert!(pa.is_aligned::<Self>());
        let huge = !matches!(Self::LEAF_LEVEL, Level::Pt);
        let entry = leaf_flags
            .with_present(true)
            .with_large_page(huge)
            .with_physical_address(pa);
        aspace
            .table(leaf_table)
            .set(Self::LEAF_LEVEL.index_of(va), entry);
    }
}

/// Reject a huge mapping where the leaf slot already links a lower table.
fn reject_table<M: PhysMapper>(
    aspace: &AddressSpace<M>,
    table: Frame,
    level: Level,
    va: VirtualAddress,
) -> Result<Frame, MapError> {
    match aspace.table(table).kind(level, level.index_of(va)) {
        EntryKind::Table(_) => Err(MapError::TableInTheWay(va)),
        EntryKind::Absent | EntryKind::Leaf(_) | EntryKind::Huge(_) => Ok(table),
    }
}

impl MapSize for Size1G {
    const LEAF_LEVEL: Level = Level::Pdpt;

    fn ensure_chain_for<A: FrameAlloc, M: PhysMapper>(
        aspace: &AddressSpace<M>,
        alloc: &mut A,
        va: VirtualAddress,
        user: bool,
    ) -> Result<Frame, MapError> {
        let pdpt = aspace.descend_or_create(alloc, aspace.root(), Level::Pml4, va, user)?;
        reject_table(aspace, pdpt, Level::Pdpt, va)
    }
}

impl MapSize for Size2M {
    const LEAF_LEVEL: Level = Level::Pd;

    fn ensure_chain_for<A: FrameAlloc, M: PhysMapper>(
        aspace: &AddressSpace<M>,
        alloc: &mut A,
        va: VirtualAddress,
        user: bool,
    ) -> Result<Frame, MapError> {
        let pdpt = aspace.descend_or_create(alloc, aspace.root(), Level::Pml4, va, user)?;
        let pd = aspace.descend_or_create(alloc, pdpt, Level::Pdpt, va, user)?;
        reject_table(aspace, pd, Level::Pd, va)
    }
}

impl MapSize for Size4K {
    const LEAF_LEVEL: Level = Level::Pt;

    fn ensure_chain_for<A: FrameAlloc, M: PhysMapper>(
        aspace: &AddressSpace<M>,
        alloc: &mut A,
        va: VirtualAddress,
        user: bool,
    ) -> Result<Frame, MapError> {
        let pdpt = aspace.descend_or_create(alloc, aspace.root(), Level::Pml4, va, user)?;
        let pd = aspace.descend_or_create(alloc, pdpt, Level::Pdpt, va, user)?;
        aspace.descend_or_create(alloc, pd, Level::Pd, va, user)
    }
}
