//! # Context Switch
//!
//! A suspended process is one number: the kernel stack pointer at the moment
//! it stopped. Everything else sits on that stack in the layout of
//! [`SavedFrame`], which is what the interrupt trampolines push and pop and
//! what [`ProcessTable::create`](crate::table::ProcessTable::create) forges
//! for a process that has never run.
//!
//! Both switch paths end in the same `pop r15 … pop rax; iretq` tail:
//!
//! ```text
//!  timer IRQ ──► trampoline pushes GPRs ──► Kernel::on_timer_interrupt(sp) ─┐
//!                                                                           │ resume sp
//!  yield ──► Kernel::prepare_yield() ──► switch_kernel_stack(save_to, sp) ──┤
//!                                                                           ▼
//!                                                 mov rsp, resume; pop …; iretq
//! ```

use crate::pcb::Pid;
use kernel_info::selectors::{USER_CS, USER_SS};
use kernel_registers::rflags::Rflags;
use kernel_vmem::VirtualAddress;

/// The privileged side of a switch that the core does not own.
pub trait Platform {
    /// Acknowledge the timer interrupt at the interrupt controller.
    fn end_of_interrupt(&mut self);

    /// Stack the CPU loads when it traps from ring 3 (`TSS.rsp0`).
    fn set_privileged_stack(&mut self, top: VirtualAddress);
}

/// Register state as laid out on a kernel stack, lowest address first.
///
/// The general-purpose registers are in the order the trampolines pop them;
/// the last five words are the hardware `iretq` frame.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SavedFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl SavedFrame {
    /// Bytes a frame occupies on the stack.
    pub const SIZE: u64 = size_of::<Self>() as u64;

    /// First entry into ring 3 at `entry` with all registers zeroed and
    /// interrupts enabled.
    #[must_use]
    pub fn user_entry(entry: VirtualAddress, user_stack_top: VirtualAddress) -> Self {
        Self {
            rip: entry.as_u64(),
            cs: u64::from(USER_CS),
            rflags: Rflags::initial_user().into_bits(),
            rsp: user_stack_top.as_u64(),
            ss: u64::from(USER_SS),
            ..Self::default()
        }
    }
}

const _: () = assert!(SavedFrame::SIZE == 20 * 8);
const _: () = assert!(SavedFrame::SIZE % 16 == 0);

/// A cooperative switch the caller still has to perform.
///
/// The core has already updated the process table, the privileged stack and
/// the address space. What is left is saving the caller's stack pointer to
/// `save_to` and continuing on `resume_sp`, which only a naked stack-swap
/// primitive can do.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackSwap {
    pub from: Pid,
    pub to: Pid,
    /// Saved-sp field of the outgoing process.
    pub save_to: *mut u64,
    /// Saved sp of the incoming process.
    pub resume_sp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_entry_frame_targets_ring3() {
        let f = SavedFrame::user_entry(
            VirtualAddress::new(0x40_0000),
            VirtualAddress::new(0x7fff_ffff_f000),
        );
        assert_eq!(f.rip, 0x40_0000);
        assert_eq!(f.cs & 3, 3);
        assert_eq!(f.ss & 3, 3);
        assert_eq!(f.rflags, 0x202);
        assert_eq!(f.rsp, 0x7fff_ffff_f000);
        assert_eq!(f.rax, 0);
        assert_eq!(f.r15, 0);
    }
}
