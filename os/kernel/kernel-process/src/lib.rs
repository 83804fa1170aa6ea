//! # Processes, Scheduling and Context Switching
//!
//! The process half of the kernel core, built on the frame allocator and
//! address space manager from `kernel-alloc`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Kernel (kernel)                     │
//! │    • syscall surface: spawn, exit, kill, sleep,     │
//! │      yield, block, wait, priority, stats            │
//! │    • timer and page-fault transitions               │
//! └──────────┬───────────────────────────┬──────────────┘
//!            │                           │
//! ┌──────────▼──────────────┐ ┌──────────▼──────────────┐
//! │   Scheduler             │ │   Address spaces,       │
//! │   (scheduler)           │ │   frames (kernel-alloc) │
//! │   • round robin         │ └─────────────────────────┘
//! │   • priority            │
//! └──────────┬──────────────┘
//! ┌──────────▼──────────────────────────────────────────┐
//! │           Process Table (table, pcb)                │
//! │    • fixed slots, slot 0 is idle                    │
//! │    • create / terminate / reap / sleep / wake       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Process Lifecycle
//!
//! ```text
//! UNUSED ──create──► READY ◄──dispatch / preempt──► RUNNING
//!                      ▲  ▲                           │
//!                      │  └────unblock── BLOCKED ◄────┤
//!                      └─────wake─────── SLEEPING ◄───┤
//!                                                     ▼
//! UNUSED ◄──────────reap──────────────────────────── ZOMBIE
//! ```
//!
//! Any live state can go to ZOMBIE through `terminate`.
//!
//! ## Context Switches ([`switch`])
//!
//! A suspended process is its saved kernel stack pointer. The timer path is
//! a pure function from the interrupted stack pointer to the one to resume
//! ([`Kernel::on_timer_interrupt`]); the voluntary path prepares a
//! [`StackSwap`](switch::StackSwap) for the naked swap primitive in
//! [`arch`].
//!
//! ## Host Testing
//!
//! Nothing outside [`arch`] touches hardware. Tests drive the core with the
//! in-memory physical RAM of `kernel-vmem` and the recording MMU of
//! `kernel-alloc`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod arch;
pub mod config;
pub mod error;
pub mod fault;
pub mod kernel;
pub mod pcb;
pub mod scheduler;
pub mod switch;
pub mod table;

pub use crate::config::KernelConfig;
pub use crate::error::ProcessError;
pub use crate::kernel::Kernel;
pub use crate::pcb::{Pcb, Pid, Priority, ProcessState};
pub use crate::scheduler::{Policy, SchedulerStats};
