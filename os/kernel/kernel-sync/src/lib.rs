//! # Kernel synchronization primitives
//!
//! The process and memory core runs on a single CPU. Mutual exclusion is
//! therefore nothing more than masking interrupts: [`IrqGuard`] does that for
//! a scope and [`IrqCell`] ties a piece of global state to it. There are no
//! locks.
//!
//! On bare metal (`target_os = "none"`) the guard executes `cli`/`sti`. Hosted
//! builds (unit tests) track the interrupt flag in memory instead, so the same
//! code paths run under `cargo test`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod irq_cell;

pub use irq::IrqGuard;
pub use irq_cell::{IrqCell, Reentered};
