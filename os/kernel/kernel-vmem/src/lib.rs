//! # Virtual Memory Support
//!
//! x86-64 four-level paging for the kernel's address spaces.
//!
//! ## What you get
//! - An [`AddressSpace`] walker over one PML4-rooted tree: map, unmap,
//!   translate, huge-page split, kernel-half sharing and teardown.
//! - [`PageEntryBits`], a bitfield over the raw 64-bit entry, decoded into the
//!   tagged [`EntryKind`] (absent / next table / 4 KiB leaf / huge leaf).
//! - A 4 KiB-aligned [`PageTable`] used for every [`Level`].
//! - The allocator/mapper seams ([`FrameAlloc`], [`PhysMapper`]) so the same
//!   code runs against real memory in the kernel and a simulated RAM in tests.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        │
//!   │        │        │        └───► PTE   → maps 4 KiB page
//!   │        │        └────────────► PDE   → PS=1 → 2 MiB page
//!   │        └─────────────────────► PDPTE → PS=1 → 1 GiB page
//!   └──────────────────────────────► PML4E
//! ```
//!
//! ### Leaf vs. non-leaf entries
//!
//! - A **leaf entry** maps physical memory directly: a PTE always, a PDE or
//!   PDPTE when `PS=1`.
//! - A **non-leaf entry** points to the next lower table level.
//!
//! ## Ownership
//!
//! Table frames below the user half of a root belong to that address space.
//! Leaves flagged [`owned`](PageEntryBits::owned) hold frames that came from
//! the frame allocator and are returned on unmap and on destroy. Entries
//! `256..512` of every root are copies of the kernel template and are never
//! freed through a user address space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
mod page_table;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

pub use crate::address_space::{AddressSpace, MapError, MapSize};
pub use crate::page_entry_bits::{EntryKind, PageEntryBits};
pub use crate::page_table::{Level, PageTable};
pub use kernel_memory_addresses::{
    Frame, PageSize, PhysicalAddress, Size1G, Size2M, Size4K, VirtualAddress,
};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Source of **physical** 4 KiB frames for page tables and anonymous pages.
///
/// The implementation decides where frames come from (bitmap, bump pool, …).
pub trait FrameAlloc {
    /// Allocate one frame, or `None` when memory is exhausted.
    fn alloc_frame(&mut self) -> Option<Frame>;

    /// Return a frame previously handed out by [`alloc_frame`](Self::alloc_frame).
    ///
    /// Returns `false` when the frame was not allocated (double free or
    /// foreign frame); the allocator state is left untouched in that case.
    fn free_frame(&mut self, frame: Frame) -> bool;
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space (identity map or a higher-half direct map).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current page tables.
    /// - The mapping must remain valid for `'a`.
    /// - The bytes at `pa` must be a valid `T` and not aliased by another
    ///   live reference.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Borrow the page table held in `frame`.
    ///
    /// Frames handed to this function are page-table frames owned by the
    /// paging code; the walker never keeps two references to one table alive.
    #[inline]
    fn table_mut<'a>(&self, frame: Frame) -> &'a mut PageTable {
        unsafe { self.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// Fill the frame with zero bytes.
    #[inline]
    fn zero_frame(&self, frame: Frame) {
        self.table_mut(frame).zero();
    }
}
