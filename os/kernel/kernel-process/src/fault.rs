//! # Page Faults
//!
//! Nothing is paged in on demand, so every fault is an error. A fault raised
//! by user code costs the process its life; one raised by the kernel stops
//! the machine.

use bitfield_struct::bitfield;
use kernel_vmem::VirtualAddress;
use log::error;

/// Exit code of a process killed by a page fault (`128 + SIGSEGV`).
pub const PAGE_FAULT_EXIT_CODE: i32 = 139;

/// Page-fault error code layout (x86-64).
///
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "non-present page"
        } else if self.reserved_bit() {
            "reserved bit set in a paging structure"
        } else if self.instruction_fetch() {
            if self.user() {
                "user-mode instruction fetch from a protected page (NX or SMEP)"
            } else {
                "kernel instruction fetch from a protected page"
            }
        } else if self.write() {
            "write to a protected page"
        } else {
            "read from a protected page"
        }
    }
}

/// Log a fault the kernel cannot survive. The caller halts afterwards.
pub fn report_fatal(cr2: VirtualAddress, err: PageFaultError, rip: u64) {
    error!("PAGE FAULT in kernel mode: cr2={cr2} rip={rip:#x} err={:#x}", err.into_bits());
    error!("{}", err.explain());
    error!("{err:#?}");
}
