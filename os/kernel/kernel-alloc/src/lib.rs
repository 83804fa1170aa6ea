//! # Kernel Memory Allocation and Address Space Management
//!
//! Physical frames and the address spaces built from them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Address Space Manager (vmm)              │
//! │    • create / destroy / switch address spaces       │
//! │    • map, map_anonymous, unmap, translate           │
//! │    • one TLB invalidation per edit (mmu)            │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • HHDM: physical `pa` lives at HHDM_BASE + pa    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • one bit per 4 KiB frame, first fit             │
//! │    • built from the boot memory map                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Frame Allocator ([`frame_alloc`])
//!
//! [`BitmapFrameAlloc`](frame_alloc::BitmapFrameAlloc) tracks every frame
//! below the highest address of the memory map. Low memory up to
//! [`RESERVED_LOW_MEMORY_END`](kernel_info::memory::RESERVED_LOW_MEMORY_END)
//! stays reserved whatever the firmware claims. It implements
//! [`kernel_vmem::FrameAlloc`] so the page-table walker can take table
//! frames from it.
//!
//! ## Physical Mapper ([`phys_mapper`])
//!
//! [`HhdmPhysMapper`](phys_mapper::HhdmPhysMapper) reaches physical memory
//! through the higher-half direct map set up by the loader.
//!
//! ## Address Space Manager ([`vmm`])
//!
//! [`Vmm`](vmm::Vmm) hands out address spaces by root frame. Every space
//! shares the kernel half of the boot template; the user half is private and
//! released bottom-up on destroy. Hardware access goes through the
//! [`Mmu`](mmu::Mmu) trait.
//!
//! ## Memory Layout Integration
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │        User Space               │
//!                       │  (private per address space)    │
//! LAST_USERSPACE_ADDRESS├─────────────────────────────────┤
//!                       │      Non-canonical hole         │
//! HHDM_BASE             ├─────────────────────────────────┤
//!                       │   Higher Half Direct Map        │
//! KERNEL_STACKS_BASE    ├─────────────────────────────────┤
//!                       │   Per-process kernel stacks     │
//! KERNEL_BASE           ├─────────────────────────────────┤
//!                       │   Kernel image                  │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod frame_alloc;
pub mod mmu;
pub mod phys_mapper;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vmm;

#[cfg(any(test, feature = "testing"))]
extern crate alloc;
