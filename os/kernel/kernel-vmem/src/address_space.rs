//! # Address Space (x86-64, PML4-rooted)
//!
//! Helpers to build, query and tear down a **single** virtual address space
//! (the tree rooted at one PML4 frame).
//!
//! ## Highlights
//!
//! - [`AddressSpace::create`] allocates a zeroed root and shares the kernel
//!   half of a template root.
//! - [`AddressSpace::map`] installs one mapping; the page size is a type
//!   parameter ([`MapSize`]), intermediate tables are created on demand.
//! - A 4 KiB mapping inside an existing 2 MiB leaf **splits** it: a new page
//!   table replicates the 512 sub-mappings before the requested entry is
//!   overwritten. Inside a 1 GiB leaf the request is rejected.
//! - [`AddressSpace::unmap`] clears one 4 KiB leaf and returns it.
//! - [`AddressSpace::translate`] handles 4 KiB, 2 MiB and 1 GiB leaves.
//! - [`AddressSpace::destroy`] frees every privately owned frame bottom-up.
//!
//! ## Safety
//!
//! Mutating active mappings requires **TLB maintenance**. This type only edits
//! memory; the caller invalidates the affected page afterwards.

mod map_size;

pub use crate::address_space::map_size::MapSize;
use crate::page_entry_bits::{EntryKind, PageEntryBits};
use crate::page_table::{Level, PageTable};
use crate::{FrameAlloc, PhysMapper};
use kernel_info::memory::{ENTRIES_PER_TABLE, KERNEL_HALF_FIRST_INDEX};
use kernel_memory_addresses::{Frame, PhysicalAddress, Size4K, VirtualAddress};
use log::{debug, trace, warn};

/// Errors produced while editing an address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// No frame was available for a table at the given level.
    #[error("out of memory allocating a {0} table")]
    OutOfMemory(Level),
    /// The address is covered by a 1 GiB page, which is never split.
    #[error("{0} lies inside a 1 GiB page")]
    InsideHugePage(VirtualAddress),
    /// A huge mapping was requested where a lower-level table already exists.
    #[error("{0} is already covered by a lower-level table")]
    TableInTheWay(VirtualAddress),
    /// Nothing is mapped at the address.
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    /// The address is not aligned to the requested page size.
    #[error("address 0x{0:X} is not aligned to the page size")]
    Unaligned(u64),
    /// The virtual address is not canonical.
    #[error("{0} is not canonical")]
    NonCanonical(VirtualAddress),
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: Frame, // PML4 frame
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap an existing root frame.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: Frame) -> Self {
        Self { root, mapper }
    }

    /// Allocate a zeroed root and, if given, share the kernel half of
    /// `template` with it.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no root frame is available; nothing is
    /// allocated in that case.
    pub fn create<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        template: Option<Frame>,
    ) -> Result<Self, MapError> {
        let root = alloc
            .alloc_frame()
            .ok_or(MapError::OutOfMemory(Level::Pml4))?;
        mapper.zero_frame(root);
        let space = Self::from_root(mapper, root);
        if let Some(template) = template {
            space.share_kernel_half(template);
        }
        Ok(space)
    }

    /// Frame of the PML4.
    #[inline]
    pub const fn root(&self) -> Frame {
        self.root
    }

    #[inline]
    pub(crate) fn table(&self, frame: Frame) -> &'m mut PageTable {
        self.mapper.table_mut(frame)
    }

    /// Copy the kernel-half top-level entries (`256..512`) from `template`.
    pub fn share_kernel_half(&self, template: Frame) {
        if template == self.root {
            return;
        }
        let src = self.table(template);
        let dst = self.table(self.root);
        for i in KERNEL_HALF_FIRST_INDEX..ENTRIES_PER_TABLE {
            dst.set(i, src.get(i));
        }
    }

    /// Whether the top-level entry covering `va` is present.
    #[must_use]
    pub fn has_top_level_entry(&self, va: VirtualAddress) -> bool {
        self.table(self.root).get(va.pml4_index()).present()
    }

    /// Make sure the top-level entry covering `va` exists, allocating an
    /// empty PDPT if needed. Returns whether a table was created.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the PDPT could not be allocated.
    pub fn ensure_top_level_entry<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<bool, MapError> {
        if self.has_top_level_entry(va) {
            return Ok(false);
        }
        self.descend_or_create(alloc, self.root, Level::Pml4, va, false)?;
        Ok(true)
    }

    /// Make sure the supervisor-only table chain down to the page table for
    /// `va` exists. Returns the page table's frame.
    ///
    /// # Errors
    /// Same as a 4 KiB [`map`](Self::map) walk.
    pub fn ensure_page_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<Frame, MapError> {
        Size4K::ensure_chain_for(self, alloc, va, false)
    }

    /// Map **one** page of size `S` at `va → pa` with `leaf_flags`.
    ///
    /// Missing intermediate tables are allocated zeroed. When the leaf is
    /// user-accessible, every intermediate entry on the path gets the user
    /// bit as well.
    ///
    /// # Errors
    /// - [`MapError::NonCanonical`] / [`MapError::Unaligned`] for bad input.
    /// - [`MapError::InsideHugePage`] if a 1 GiB leaf covers `va`.
    /// - [`MapError::TableInTheWay`] for a huge page over an existing table.
    /// - [`MapError::OutOfMemory`] if a table frame could not be allocated.
    pub fn map<S: MapSize, A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        leaf_flags: PageEntryBits,
    ) -> Result<(), MapError> {
        if !va.is_canonical() {
            return Err(MapError::NonCanonical(va));
        }
        if !va.is_aligned::<S>() {
            return Err(MapError::Unaligned(va.as_u64()));
        }
        if !pa.is_aligned::<S>() {
            return Err(MapError::Unaligned(pa.as_u64()));
        }

        let user = leaf_flags.user_access();
        let leaf_table = S::ensure_chain_for(self, alloc, va, user)?;
        if user {
            self.grant_user_path(va, S::LEAF_LEVEL);
        }
        S::set_leaf(self, leaf_table, va, pa, leaf_flags);
        trace!("mapped {} page {va} -> {pa} in {}", S::NAME, self.root);
        Ok(())
    }

    /// Unmap the single **4 KiB** page at `va` and return the old leaf.
    ///
    /// A 2 MiB leaf covering `va` is split first so its other 511 pages stay
    /// mapped; this may allocate a page table.
    ///
    /// # Errors
    /// - [`MapError::NotMapped`] if nothing is mapped at `va`.
    /// - [`MapError::InsideHugePage`] if a 1 GiB leaf covers `va`.
    /// - [`MapError::OutOfMemory`] if the split needs a frame and none is left.
    pub fn unmap<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PageEntryBits, MapError> {
        let EntryKind::Table(pdpt) = self.table(self.root).kind(Level::Pml4, va.pml4_index())
        else {
            return Err(MapError::NotMapped(va));
        };

        let pd = match self.table(pdpt).kind(Level::Pdpt, va.pdpt_index()) {
            EntryKind::Table(pd) => pd,
            EntryKind::Huge(_) => return Err(MapError::InsideHugePage(va)),
            EntryKind::Absent | EntryKind::Leaf(_) => return Err(MapError::NotMapped(va)),
        };

        let i2 = va.pd_index();
        let pt = match self.table(pd).kind(Level::Pd, i2) {
            EntryKind::Table(pt) => pt,
            EntryKind::Huge(_) => self.split_2m(alloc, pd, i2, false)?,
            EntryKind::Absent | EntryKind::Leaf(_) => return Err(MapError::NotMapped(va)),
        };

        let table = self.table(pt);
        let i1 = va.pt_index();
        let old = table.get(i1);
        if !old.present() {
            return Err(MapError::NotMapped(va));
        }
        table.set(i1, PageEntryBits::zero());
        trace!("unmapped {va} (was {}) in {}", old.physical_address(), self.root);
        Ok(old)
    }

    /// Translate `va` to a physical address if mapped.
    ///
    /// Handles 1 GiB and 2 MiB leaves by adding the in-page offset.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (level, leaf) = self.leaf(va)?;
        let size = level.leaf_size()?;
        Some(leaf.physical_address() + (va.as_u64() & (size - 1)))
    }

    /// The leaf entry mapping `va` and the level it was found at.
    #[must_use]
    pub fn leaf(&self, va: VirtualAddress) -> Option<(Level, PageEntryBits)> {
        let mut frame = self.root;
        let mut level = Level::Pml4;
        loop {
            let entry = self.table(frame).get(level.index_of(va));
            match entry.kind(level) {
                EntryKind::Absent => return None,
                EntryKind::Leaf(_) | EntryKind::Huge(_) => return Some((level, entry)),
                EntryKind::Table(next) => {
                    frame = next;
                    level = level.next()?;
                }
            }
        }
    }

    /// Free every frame this space privately owns and consume the handle.
    ///
    /// Walks the user half (`0..256`) bottom-up: owned 4 KiB leaves first,
    /// then each table, then the root. Kernel-half entries and leaves without
    /// the [`owned`](PageEntryBits::owned) bit are left alone. Returns the
    /// number of frames returned to `alloc`.
    pub fn destroy<A: FrameAlloc>(self, alloc: &mut A) -> usize {
        let root = self.table(self.root);
        let mut freed = 0;
        for (_, entry) in root.present_entries().take_while(|(i, _)| *i < KERNEL_HALF_FIRST_INDEX)
        {
            if let EntryKind::Table(pdpt) = entry.kind(Level::Pml4) {
                freed += self.free_subtree(alloc, pdpt, Level::Pdpt);
            }
        }
        root.zero();
        freed += release(alloc, self.root);
        debug!("destroyed address space {}: {freed} frames freed", self.root);
        freed
    }

    fn free_subtree<A: FrameAlloc>(&self, alloc: &mut A, frame: Frame, level: Level) -> usize {
        let mut freed = 0;
        for (_, entry) in self.table(frame).present_entries() {
            match entry.kind(level) {
                EntryKind::Table(child) => {
                    if let Some(next) = level.next() {
                        freed += self.free_subtree(alloc, child, next);
                    }
                }
                EntryKind::Leaf(pa) if entry.owned() => {
                    freed += release(alloc, Frame::containing(pa));
                }
                _ => {}
            }
        }
        freed + release(alloc, frame)
    }

    /// Follow the link at `va`'s index in `table`, allocating a zeroed child
    /// table when absent. A 2 MiB leaf at PD level is split; any other leaf
    /// rejects the walk without touching memory.
    pub(crate) fn descend_or_create<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        table: Frame,
        level: Level,
        va: VirtualAddress,
        user: bool,
    ) -> Result<Frame, MapError> {
        let t = self.table(table);
        let i = level.index_of(va);
        match t.kind(level, i) {
            EntryKind::Table(next) => Ok(next),
            EntryKind::Absent => {
                let child = level.next().unwrap_or(level);
                let f = alloc.alloc_frame().ok_or(MapError::OutOfMemory(child))?;
                self.mapper.zero_frame(f);
                t.set(i, PageEntryBits::table(f, user));
                Ok(f)
            }
            EntryKind::Huge(_) if level == Level::Pd => self.split_2m(alloc, table, i, user),
            EntryKind::Huge(_) | EntryKind::Leaf(_) => Err(MapError::InsideHugePage(va)),
        }
    }

    /// Replace the 2 MiB leaf at `pd[index]` by a page table that maps the
    /// same 512 pages with the same flags.
    fn split_2m<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        pd: Frame,
        index: usize,
        user: bool,
    ) -> Result<Frame, MapError> {
        let pd_table = self.table(pd);
        let huge = pd_table.get(index);
        let pt_frame = alloc
            .alloc_frame()
            .ok_or(MapError::OutOfMemory(Level::Pt))?;

        let pt = self.table(pt_frame);
        let base = huge.physical_address();
        let small = huge.with_large_page(false);
        for (i, page) in (0..ENTRIES_PER_TABLE as u64).enumerate() {
            pt.set(i, small.with_physical_address(base + page * 4096));
        }

        pd_table.set(
            index,
            PageEntryBits::table(pt_frame, user || huge.user_access()),
        );
        debug!("split 2 MiB page at {base} into page table {pt_frame}");
        Ok(pt_frame)
    }

    /// Set the user bit on every intermediate entry above `leaf_level`.
    fn grant_user_path(&self, va: VirtualAddress, leaf_level: Level) {
        let mut frame = self.root;
        let mut level = Level::Pml4;
        while level != leaf_level {
            let t = self.table(frame);
            let i = level.index_of(va);
            let entry = t.get(i);
            let EntryKind::Table(next) = entry.kind(level) else {
                return;
            };
            if !entry.user_access() {
                t.set(i, entry.with_user_access(true));
            }
            frame = next;
            let Some(lower) = level.next() else {
                return;
            };
            level = lower;
        }
    }
}

fn release<A: FrameAlloc>(alloc: &mut A, frame: Frame) -> usize {
    if alloc.free_frame(frame) {
        1
    } else {
        warn!("frame {frame} was not allocated; not freeing it twice");
        0
    }
}
