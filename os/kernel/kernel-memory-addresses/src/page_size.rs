use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page sizes.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
    /// Short human-readable name (`"4K"`, `"2M"`, `"1G"`).
    const NAME: &'static str;

    /// Mask selecting the in-page offset.
    #[inline]
    #[must_use]
    fn offset_mask() -> u64 {
        Self::SIZE - 1
    }

    /// Number of 4 KiB frames covered by one page of this size.
    #[inline]
    #[must_use]
    fn frames() -> u64 {
        Self::SIZE >> 12
    }
}

/// 4 KiB page (4096 bytes).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
    const NAME: &'static str = "4K";
}

/// 2 MiB page (`2_097_152` bytes).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size2M;
impl sealed::Sealed for Size2M {}
impl PageSize for Size2M {
    const SIZE: u64 = 2 * 1024 * 1024;
    const SHIFT: u32 = 21;
    const NAME: &'static str = "2M";
}

/// 1 GiB page (`1_073_741_824` bytes).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size1G;
impl sealed::Sealed for Size1G {}
impl PageSize for Size1G {
    const SIZE: u64 = 1024 * 1024 * 1024;
    const SHIFT: u32 = 30;
    const NAME: &'static str = "1G";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_shifts_agree() {
        assert_eq!(1u64 << Size4K::SHIFT, Size4K::SIZE);
        assert_eq!(1u64 << Size2M::SHIFT, Size2M::SIZE);
        assert_eq!(1u64 << Size1G::SHIFT, Size1G::SIZE);
        assert_eq!(Size2M::frames(), 512);
        assert_eq!(Size1G::frames(), 512 * 512);
    }
}
