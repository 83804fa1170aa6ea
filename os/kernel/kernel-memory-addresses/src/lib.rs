//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and frame identifiers used by the
//! frame allocator and the page-table code.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory or MMIO. |
//! | [`VirtualAddress`] | A byte address translated by the page tables. |
//! | [`Frame`] | The *id* of a 4 KiB physical frame (`address >> 12`). |
//!
//! Page sizes are marker types implementing [`PageSize`]: [`Size4K`],
//! [`Size2M`] and [`Size1G`]. They carry the size and shift as associated
//! constants so alignment checks stay free of runtime branching.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0030_1234);
//! let frame = Frame::containing(pa);
//! assert_eq!(frame.index(), 0x301);
//! assert_eq!(frame.base().as_u64(), 0x0030_1000);
//! assert!(!pa.is_aligned::<Size4K>());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]
#![allow(clippy::inline_always)]

mod frame;
mod page_size;
mod physical_address;
mod virtual_address;

pub use crate::frame::Frame;
pub use crate::page_size::{PageSize, Size1G, Size2M, Size4K};
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,   16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + (a - 1)` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4097,    4096), 8192);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
