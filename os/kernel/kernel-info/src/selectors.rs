//! # Segment Selectors
//!
//! The GDT is built elsewhere; the process core only needs the selector values
//! to forge the initial `iretq` frame of a new process.

/// Ring 0 code segment.
pub const KERNEL_CS: u16 = 0x08;

/// Ring 0 data/stack segment.
pub const KERNEL_SS: u16 = 0x10;

/// Ring 3 data/stack segment (`0x18 | RPL 3`).
pub const USER_SS: u16 = 0x1b;

/// Ring 3 code segment (`0x20 | RPL 3`).
pub const USER_CS: u16 = 0x23;

const _: () = {
    assert!(USER_CS & 3 == 3);
    assert!(USER_SS & 3 == 3);
    assert!(KERNEL_CS & 3 == 0);
};
