//! # x86-64 Entry Points
//!
//! The interrupt trampolines, the stack-swap primitive and the global
//! [`Kernel`] instance they operate on.
//!
//! Register save and restore happens only here. Every trampoline leaves a
//! [`SavedFrame`](crate::switch::SavedFrame) on the kernel stack and hands
//! its address to the architecture-neutral core, which answers with the
//! address of the frame to resume.

use crate::config::KernelConfig;
use crate::error::ProcessError;
use crate::fault::{self, PageFaultError};
use crate::kernel::Kernel;
use crate::switch::{Platform, StackSwap};
use core::arch::{asm, naked_asm};
use kernel_alloc::frame_alloc::BitmapFrameAlloc;
use kernel_alloc::mmu::{Mmu, X86Mmu};
use kernel_alloc::phys_mapper::HhdmPhysMapper;
use kernel_alloc::vmm::Vmm;
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::RESERVED_LOW_MEMORY_END;
use kernel_sync::{IrqCell, IrqGuard, Reentered};
use kernel_vmem::VirtualAddress;
use log::info;

/// Master PIC command port.
const PIC1_COMMAND: u16 = 0x20;
/// Non-specific end of interrupt.
const PIC_EOI: u8 = 0x20;

pub type X86Kernel =
    Kernel<HhdmPhysMapper, X86Mmu, BitmapFrameAlloc<'static>, X86Platform>;

static KERNEL: IrqCell<Option<X86Kernel>> = IrqCell::new(None);

#[inline]
unsafe fn outb(port: u16, value: u8) {
    unsafe {
        asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
    }
}

fn halt_forever() -> ! {
    loop {
        // SAFETY: nothing is left to run.
        unsafe { asm!("cli", "hlt", options(nomem, nostack)) };
    }
}

/// Why [`boot_init`] failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Reentered(#[from] Reentered),
}

/// Interrupt controller and TSS access.
pub struct X86Platform {
    rsp0: *mut u64,
}

// SAFETY: single CPU; the pointer is only written from interrupt-masked code.
unsafe impl Send for X86Platform {}

impl X86Platform {
    /// # Safety
    /// `rsp0` must point at the `rsp0` field of the loaded TSS and stay valid
    /// for the lifetime of the kernel.
    #[must_use]
    pub const unsafe fn new(rsp0: *mut u64) -> Self {
        Self { rsp0 }
    }
}

impl Platform for X86Platform {
    fn end_of_interrupt(&mut self) {
        // SAFETY: the legacy PIC is the timer's interrupt controller.
        unsafe { outb(PIC1_COMMAND, PIC_EOI) };
    }

    fn set_privileged_stack(&mut self, top: VirtualAddress) {
        // SAFETY: see `new`; the TSS field is packed.
        unsafe { self.rsp0.write_unaligned(top.as_u64()) };
    }
}

/// Bring up the process core. The calling context becomes the idle process
/// once [`start_scheduling`] runs.
///
/// # Safety
/// Ring 0 with paging on, the HHDM in place, `rsp0` as for
/// [`X86Platform::new`]. Runs once.
///
/// # Errors
/// Out of memory while reserving the kernel stack window.
pub unsafe fn boot_init(
    bitmap: &'static mut [u64],
    regions: &[MemoryRegion],
    rsp0: *mut u64,
    config: KernelConfig,
) -> Result<(), BootError> {
    #[cfg(feature = "qemu")]
    {
        static LOGGER: kernel_qemu::QemuLogger =
            kernel_qemu::QemuLogger::new(log::LevelFilter::Trace);
        if let Err(e) = LOGGER.install(config.log_level()) {
            // Some other logger got there first; it keeps the output.
            log::debug!("QEMU logger not installed: {e}");
        }
    }

    let mut frames = BitmapFrameAlloc::new(bitmap);
    frames.init(regions, RESERVED_LOW_MEMORY_END);

    // SAFETY: guaranteed by the caller.
    let (mmu, platform) = unsafe { (X86Mmu::new(), X86Platform::new(rsp0)) };
    let kernel_root = mmu.current_root();
    let vmm = Vmm::new(HhdmPhysMapper, mmu, kernel_root);
    let kernel = Kernel::new(vmm, frames, platform, config)?;

    KERNEL.try_with(|slot| *slot = Some(kernel))?;
    info!("kernel root {kernel_root}");
    Ok(())
}

/// Run `f` on the kernel with interrupts masked. `None` before
/// [`boot_init`] or on re-entry.
pub fn with_kernel<R>(f: impl FnOnce(&mut X86Kernel) -> R) -> Option<R> {
    KERNEL.try_with(|k| k.as_mut().map(f)).ok().flatten()
}

/// Complete a switch prepared by the core.
///
/// Must run with interrupts masked; they are restored by whatever frame the
/// process is resumed from.
fn perform(swap: StackSwap) {
    // SAFETY: the core switched the table, TSS and CR3 to `swap.to`, whose
    // saved sp points at a valid frame on a mapped kernel stack.
    unsafe { switch_kernel_stack(swap.save_to, swap.resume_sp) };
}

/// Leave the boot context for the first process. Returns whenever the idle
/// process is scheduled again.
pub fn start_scheduling() {
    let _irq = IrqGuard::new();
    if let Some(swap) = with_kernel(X86Kernel::start).flatten() {
        perform(swap);
    }
}

/// Give up the CPU.
pub fn yield_now() {
    let _irq = IrqGuard::new();
    if let Some(swap) = with_kernel(X86Kernel::prepare_yield).flatten() {
        perform(swap);
    }
}

/// Sleep the calling process for `ticks` timer ticks.
///
/// # Errors
/// See [`Kernel::sleep_current`].
pub fn sleep(ticks: u64) -> Result<(), ProcessError> {
    let _irq = IrqGuard::new();
    if let Some(swap) = with_kernel(|k| k.sleep_current(ticks)).transpose()?.flatten() {
        perform(swap);
    }
    Ok(())
}

/// Terminate the calling process.
pub fn exit(code: i32) -> ! {
    let _irq = IrqGuard::new();
    if let Some(Ok(swap)) = with_kernel(|k| k.exit_current(code)) {
        perform(swap);
    }
    halt_forever()
}

/// Save the caller's context on its own stack, store the stack pointer to
/// `save_to` and resume the frame at `resume_sp`.
///
/// The caller's context is saved as an interrupt frame returning to the
/// `ret` below, so it can be resumed by the same `iretq` tail as a
/// preempted process.
///
/// # Safety
/// Interrupts masked; `resume_sp` points at a
/// [`SavedFrame`](crate::switch::SavedFrame) on a mapped kernel stack.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_kernel_stack(save_to: *mut u64, resume_sp: u64) {
    naked_asm!(
        "mov rax, rsp",
        "push {kernel_ss}",
        "push rax",
        "pushfq",
        "push {kernel_cs}",
        "lea rax, [rip + 2f]",
        "push rax",
        "push rax","push rbx","push rcx","push rdx","push rsi","push rdi","push rbp",
        "push r8","push r9","push r10","push r11","push r12","push r13","push r14","push r15",

        "mov [rdi], rsp",
        "mov rsp, rsi",

        "pop r15","pop r14","pop r13","pop r12","pop r11","pop r10","pop r9","pop r8",
        "pop rbp","pop rdi","pop rsi","pop rdx","pop rcx","pop rbx","pop rax",
        "iretq",

        "2:",
        "ret",
        kernel_cs = const kernel_info::selectors::KERNEL_CS,
        kernel_ss = const kernel_info::selectors::KERNEL_SS,
    )
}

/// Timer interrupt gate. Interrupts are masked by the gate.
#[unsafe(naked)]
pub extern "C" fn timer_irq_entry() {
    naked_asm!(
        "cld",
        "push rax","push rbx","push rcx","push rdx","push rsi","push rdi","push rbp",
        "push r8","push r9","push r10","push r11","push r12","push r13","push r14","push r15",

        // The CPU aligned rsp to 16 before pushing the 40-byte frame, so
        // with 15 registers on top it is aligned again.
        "mov rdi, rsp",
        "call {handler}",
        "mov rsp, rax",

        "pop r15","pop r14","pop r13","pop r12","pop r11","pop r10","pop r9","pop r8",
        "pop rbp","pop rdi","pop rsi","pop rdx","pop rcx","pop rbx","pop rax",
        "iretq",
        handler = sym timer_irq_handler,
    )
}

extern "C" fn timer_irq_handler(sp: u64) -> u64 {
    match with_kernel(|k| k.on_timer_interrupt(sp)) {
        Some(resume) => resume,
        None => {
            // Not up yet; acknowledge and carry on.
            // SAFETY: as in `X86Platform::end_of_interrupt`.
            unsafe { outb(PIC1_COMMAND, PIC_EOI) };
            sp
        }
    }
}

/// Page-fault gate. The CPU pushed an error code below the interrupt frame.
#[unsafe(naked)]
pub extern "C" fn page_fault_entry() {
    naked_asm!(
        "cld",
        "push rax","push rbx","push rcx","push rdx","push rsi","push rdi","push rbp",
        "push r8","push r9","push r10","push r11","push r12","push r13","push r14","push r15",

        "mov rdi, rsp",
        "mov rsi, cr2",
        "mov rdx, [rsp + 120]",
        "and rsp, -16",
        "call {handler}",
        // Always another process's frame; the faulting one is gone.
        "mov rsp, rax",

        "pop r15","pop r14","pop r13","pop r12","pop r11","pop r10","pop r9","pop r8",
        "pop rbp","pop rdi","pop rsi","pop rdx","pop rcx","pop rbx","pop rax",
        "iretq",
        handler = sym page_fault_handler,
    )
}

extern "C" fn page_fault_handler(sp: u64, cr2: u64, err: u64) -> u64 {
    let err = PageFaultError::from_bits(err);
    let cr2 = VirtualAddress::new(cr2);
    if err.user()
        && let Some(resume) = with_kernel(|k| k.on_user_page_fault(sp, cr2)).flatten()
    {
        return resume;
    }

    // 15 registers and the error code, then rip.
    let rip_at = sp + 16 * 8;
    // SAFETY: the trampoline built the frame at `sp`.
    let rip = unsafe { *(rip_at as *const u64) };
    fault::report_fatal(cr2, err, rip);
    halt_forever()
}
