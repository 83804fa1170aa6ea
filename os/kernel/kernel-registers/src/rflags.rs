use bitfield_struct::bitfield;

/// Architectural RFLAGS model for x86-64.
///
/// Only the bits the kernel reads or forges are named; the rest are kept
/// opaque so a loaded value round-trips unchanged.
#[bitfield(u64, order = Lsb)]
pub struct Rflags {
    /// Carry Flag
    pub cf_carry: bool, // 0

    /// Always 1 in 64-bit mode.
    #[bits(default = true)]
    pub always1: bool, // 1

    /// Status flags PF..OF and TF (bits 2–8).
    #[bits(7)]
    pub status: u8,

    /// Interrupt Enable Flag
    pub if_interrupt_enable: bool, // 9

    /// Direction Flag
    pub df_direction: bool, // 10

    /// Overflow Flag
    pub of_overflow: bool, // 11

    /// I/O Privilege Level (2 bits)
    #[bits(2)]
    pub iopl: u8, // 12–13

    /// Bits 14–63.
    #[bits(50)]
    pub upper: u64,
}

impl Rflags {
    /// Flags a freshly created process starts with: reserved bit 1 and `IF`.
    #[must_use]
    pub const fn initial_user() -> Self {
        Self::new().with_if_interrupt_enable(true)
    }
}

#[cfg(feature = "asm")]
impl crate::LoadRegister for Rflags {
    #[inline]
    fn load() -> Self {
        let r: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags));
        }
        Self::from_bits(r)
    }
}
