//! # Kernel Configuration and Boot Interface
//!
//! This crate is the single source of truth for the compile-time layout the
//! process and memory management core relies on. Every other kernel crate
//! reads its constants from here instead of hard-coding addresses.
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`])
//! The physical memory map handed over by the loader, reduced to what the
//! frame allocator needs: a list of [`MemoryRegion`](boot::MemoryRegion)s
//! tagged with a [`MemoryKind`](boot::MemoryKind).
//!
//! ### Memory Layout ([`memory`])
//! Page size, the user/kernel split, the direct map, the kernel stack window
//! and the per-process stack placement.
//!
//! ### Selectors ([`selectors`])
//! The fixed GDT selector layout used when building initial interrupt frames.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//! USER_STACK_TOP        │   ... per-process user stack    │ 0x0000_7fff_ffff_f000
//!                       ├─────────────────────────────────┤
//!                       │   non-canonical hole            │
//! KERNEL_HALF_START     ├─────────────────────────────────┤ 0xffff_8000_0000_0000  (PML4 #256)
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//! KERNEL_STACKS_BASE    ├─────────────────────────────────┤ 0xffff_ff00_0000_0000  (PML4 #510)
//!                       │   per-slot kernel stacks        │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Everything at or above [`KERNEL_HALF_START`](memory::KERNEL_HALF_START) is
//! shared: each address space copies the top-level entries `256..512` from the
//! kernel template and never frees them.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod selectors;
