use crate::{PageSize, PhysicalAddress, Size4K};
use core::fmt;

/// Identifier of a 4 KiB physical frame.
///
/// A frame id is the physical base address shifted right by 12. The frame
/// allocator tracks frames by id, page-table entries store frame bases, and
/// an address space is referred to by the frame id of its root table.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Frame(u64);

impl Frame {
    /// Frame with the given id.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u64) -> Self {
        Self(index)
    }

    /// The frame containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u64() >> Size4K::SHIFT)
    }

    /// The frame id.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0
    }

    /// Physical address of the first byte of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << Size4K::SHIFT)
    }

    /// The frame `n` frames after this one.
    #[inline]
    #[must_use]
    pub const fn offset(self, n: u64) -> Self {
        Self(self.0 + n)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(#{} @ 0x{:X})", self.0, self.base().as_u64())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<Frame> for PhysicalAddress {
    #[inline]
    fn from(value: Frame) -> Self {
        value.base()
    }
}
