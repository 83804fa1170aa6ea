//! # HHDM-based `PhysMapper`
//!
//! The loader maps all physical memory at [`HHDM_BASE`] in the kernel half,
//! so physical address `pa` is reachable at `HHDM_BASE + pa` from every
//! address space. Page-table code goes through this mapper whenever it
//! needs to touch a table or zero a fresh frame.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::HhdmPhysMapper;
//! use kernel_vmem::{PageTable, PhysMapper, PhysicalAddress};
//!
//! let mapper = HhdmPhysMapper;
//! let table: &mut PageTable = unsafe { mapper.phys_to_mut(PhysicalAddress::new(0x1234_0000)) };
//! table.zero();
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_vmem::{PhysMapper, PhysicalAddress};

/// [`PhysMapper`] for kernels with a higher-half direct map.
///
/// # Safety
/// The HHDM must cover every physical address handed to it.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (HHDM_BASE + pa.as_u64()) as *mut T;
        // SAFETY: the caller guarantees `pa` is HHDM-mapped and holds a `T`.
        unsafe { &mut *va }
    }
}
