//! Interrupt flag control.

/// Disables hardware interrupts (`cli`).
///
/// # Safety & Privilege
///
/// Must only be called in contexts where `cli` is permitted.
#[inline]
pub fn cli_stop_interrupts() {
    arch::disable();
}

/// Enables hardware interrupts (`sti`).
///
/// # Safety & Privilege
///
/// Must only be called in contexts where `sti` is permitted. Typically used
/// to restore a previously disabled interrupt state.
#[inline]
pub fn sti_enable_interrupts() {
    arch::enable();
}

/// Whether `RFLAGS.IF` is set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::enabled()
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit. If interrupts were enabled, it
/// executes `cli`. On drop, it executes `sti` **only** if they were
/// previously enabled, so guards nest.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether interrupts will be re-enabled when this guard drops.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    /// Restores interrupts (`sti`) only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    use kernel_registers::LoadRegister;
    use kernel_registers::rflags::Rflags;

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enabled() -> bool {
        Rflags::load().if_interrupt_enable()
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    use core::sync::atomic::{AtomicBool, Ordering};

    /// Simulated `RFLAGS.IF`; a hosted process starts with interrupts "on".
    static IF: AtomicBool = AtomicBool::new(true);

    #[inline]
    pub fn disable() {
        IF.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn enable() {
        IF.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn enabled() -> bool {
        IF.load(Ordering::SeqCst)
    }
}
