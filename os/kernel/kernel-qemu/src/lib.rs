//! # QEMU Debug Console Support
//!
//! Logging for kernels running under QEMU. Output goes byte by byte to the
//! debug console port `0x402`; start QEMU with `-debugcon stdio` (or
//! `-debugcon file:debug.log`) to see it on the host.
//!
//! ```text
//! log::info!(..) ─► QemuLogger ─► write_record ─► QemuSink (fmt::Write) ─► port 0x402
//! ```
//!
//! ## Components
//!
//! * [`QemuLogger`]: a `log::Log` backend, installed once from a `static`.
//! * [`qemu_trace!`]: `format!`-style output that bypasses the `log` facade.
//! * [`write_record`]: the line format, generic over any `fmt::Write` sink.
//!
//! ## Feature `enabled` (default)
//!
//! Without it, the sink discards everything and no port I/O is compiled in,
//! so the logger can stay installed in builds that never run under QEMU.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Trace);
//!
//! LOGGER.install(LevelFilter::Debug).expect("logger installed twice");
//! info!("scheduler online");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{QemuLogger, write_record};

#[cfg(all(feature = "enabled", target_arch = "x86_64"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug port.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to QEMU's debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        unsafe { outb(QEMU_DEBUG_PORT, c) }
    }

    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
            );
        }
    }

    /// `fmt::Write` over the debug port.
    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort; the port cannot fail.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(all(feature = "enabled", target_arch = "x86_64")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// Discards everything.
    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// Print to QEMU's debug console, `format!`-style, without allocating.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
