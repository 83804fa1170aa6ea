use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::Frame;

/// CR3 — Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Holds the frame of the active PML4 and cache-control flags for the
/// root walk. Assumes no PCID (CR4.PCIDE = 0).
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2 — Reserved (must be 0).
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3 — PWT: Page-level Write-Through for PML4.
    pub pwt: bool,

    /// Bit 4 — PCD: Page-level Cache Disable for PML4.
    pub pcd: bool,

    /// Bits 5–11 — Reserved (must be 0 when written).
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–51 — PML4 frame id.
    #[bits(40)]
    pml4_frame: u64,

    /// Bits 52–63 — Reserved.
    #[bits(12)]
    pub reserved2: u16,
}

impl Cr3 {
    /// CR3 value selecting the PML4 in `root`, write-back cached.
    #[must_use]
    pub const fn from_root(root: Frame) -> Self {
        Self::new().with_pml4_frame(root.index())
    }

    /// The frame of the PML4 this value selects.
    #[must_use]
    pub const fn root(&self) -> Frame {
        Frame::from_index(self.pml4_frame())
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
