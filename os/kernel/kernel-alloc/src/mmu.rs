//! # MMU Control
//!
//! The two hardware operations the address-space manager needs: load a new
//! root (CR3) and drop a single stale translation (`invlpg`). Kept behind a
//! trait so the manager is testable on the host with a recording mock.

use kernel_vmem::{Frame, VirtualAddress};

/// Root-pointer and TLB control for the current CPU.
pub trait Mmu {
    /// Make `root` the active PML4. Flushes all non-global translations.
    fn load_root(&mut self, root: Frame);

    /// The currently active PML4.
    fn current_root(&self) -> Frame;

    /// Invalidate the TLB entry for the page containing `va`.
    fn invalidate_page(&mut self, va: VirtualAddress);
}

/// The real thing: CR3 and `invlpg`.
#[cfg(target_arch = "x86_64")]
pub struct X86Mmu {
    _private: (),
}

#[cfg(target_arch = "x86_64")]
impl X86Mmu {
    /// # Safety
    /// Must run at CPL0 with paging enabled, and only one instance may
    /// drive the MMU.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_arch = "x86_64")]
impl Mmu for X86Mmu {
    fn load_root(&mut self, root: Frame) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::cr3::Cr3;
        // SAFETY: `new` established ring 0; the root shares the kernel half.
        unsafe { Cr3::from_root(root).store_unsafe() }
    }

    fn current_root(&self) -> Frame {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr3::Cr3;
        // SAFETY: `new` established ring 0.
        unsafe { Cr3::load_unsafe() }.root()
    }

    #[inline]
    fn invalidate_page(&mut self, va: VirtualAddress) {
        // SAFETY: `invlpg` has no memory effects beyond the TLB.
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
        }
    }
}
