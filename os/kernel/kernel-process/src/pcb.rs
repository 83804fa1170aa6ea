//! # Process Control Block
//!
//! One [`Pcb`] per table slot. The saved machine context is a single value,
//! the kernel stack pointer at the moment of suspension; the registers live
//! on that stack.

use crate::error::ProcessError;
use core::cmp::Ordering;
use core::fmt;
use kernel_vmem::{Frame, VirtualAddress};
use utils_accessors_derive::Getters;

/// Process identifier. Pid 0 is the kernel idle process.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u32);

impl Pid {
    /// The idle process.
    pub const IDLE: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ProcessState {
    /// Free slot.
    #[default]
    Unused,
    /// Runnable, waiting for the CPU.
    Ready,
    /// On the CPU. Exactly one slot at a time.
    Running,
    /// Waiting for an explicit unblock (or stopped by a signal).
    Blocked,
    /// Waiting for a tick deadline.
    Sleeping,
    /// Exited; keeps its exit code until the parent reaps it.
    Zombie,
}

impl ProcessState {
    /// Whether the slot holds a process that has not exited.
    #[inline]
    #[must_use]
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Unused | Self::Zombie)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unused => "unused",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Sleeping => "sleeping",
            Self::Zombie => "zombie",
        })
    }
}

/// Scheduling priority. The raw value is what user space passes in; lower
/// raw values are more important.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Priority {
    Realtime = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// Ticks a process of this priority runs before it is preempted.
    #[inline]
    #[must_use]
    pub const fn default_quantum(self) -> u32 {
        match self {
            Self::Realtime => 2,
            Self::High => 5,
            Self::Normal => 10,
            Self::Low => 20,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = ProcessError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Realtime),
            1 => Ok(Self::High),
            2 => Ok(Self::Normal),
            3 => Ok(Self::Low),
            _ => Err(ProcessError::InvalidPriority(raw)),
        }
    }
}

/// `Realtime > High > Normal > Low`.
impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        other.as_raw().cmp(&self.as_raw())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Realtime => "realtime",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        })
    }
}

/// Maximum bytes of a process name.
pub const NAME_LEN: usize = 32;

/// Fixed-size, NUL-padded UTF-8 process name.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ProcessName([u8; NAME_LEN]);

impl ProcessName {
    pub const EMPTY: Self = Self([0; NAME_LEN]);

    /// Copy `name`, cutting it at the last character boundary that fits.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = [0; NAME_LEN];
        buf[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self(buf)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(NAME_LEN);
        // Only ever filled from a `&str` cut at a char boundary.
        core::str::from_utf8(&self.0[..len]).unwrap_or("")
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stack as `[base, top)`; it grows down from `top`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StackRegion {
    pub base: u64,
    pub top: u64,
}

impl StackRegion {
    pub const NONE: Self = Self { base: 0, top: 0 };

    #[inline]
    #[must_use]
    pub const fn new(base: VirtualAddress, top: VirtualAddress) -> Self {
        Self {
            base: base.as_u64(),
            top: top.as_u64(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.top <= self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.top.saturating_sub(self.base)
    }

    #[inline]
    #[must_use]
    pub const fn top(&self) -> VirtualAddress {
        VirtualAddress::new(self.top)
    }

    /// Page-aligned addresses of every page in the region, lowest first.
    #[allow(clippy::cast_possible_truncation)]
    pub fn pages(&self) -> impl Iterator<Item = VirtualAddress> + use<> {
        let (base, top) = (self.base, self.top);
        (base..top)
            .step_by(kernel_info::memory::PAGE_SIZE as usize)
            .map(VirtualAddress::new)
    }
}

/// Process control block.
///
/// Read access goes through the generated getters; state changes go
/// through the process table and the scheduler.
#[derive(Clone, Debug, Getters)]
pub struct Pcb {
    #[getters(copy)]
    pid: Pid,
    #[getters(copy)]
    parent: Pid,
    #[getters(copy)]
    name: ProcessName,
    #[getters(copy)]
    state: ProcessState,
    #[getters(copy)]
    priority: Priority,
    /// Ticks left before preemption.
    #[getters(copy)]
    remaining_quantum: u32,
    #[getters(copy)]
    default_quantum: u32,
    /// Kernel stack pointer at the last suspension.
    #[getters(copy)]
    saved_sp: u64,
    #[getters(copy)]
    kernel_stack: StackRegion,
    #[getters(copy)]
    user_stack: StackRegion,
    /// Root frame of the address space.
    #[getters(copy)]
    space: Frame,
    /// Ticks spent on the CPU.
    #[getters(copy)]
    cpu_ticks: u64,
    #[getters(copy)]
    created_at: u64,
    /// Deadline while sleeping.
    #[getters(copy)]
    wake_at: u64,
    #[getters(copy)]
    exit_code: i32,
    /// Parent is blocked in `wait`.
    #[getters(copy)]
    waiting_for_child: bool,
    /// Exited, kernel stack and address space not yet released.
    #[getters(copy)]
    teardown_pending: bool,
}

impl Pcb {
    /// An empty slot.
    pub(crate) const fn unused() -> Self {
        Self {
            pid: Pid::IDLE,
            parent: Pid::IDLE,
            name: ProcessName::EMPTY,
            state: ProcessState::Unused,
            priority: Priority::Normal,
            remaining_quantum: 0,
            default_quantum: 0,
            saved_sp: 0,
            kernel_stack: StackRegion::NONE,
            user_stack: StackRegion::NONE,
            space: Frame::from_index(0),
            cpu_ticks: 0,
            created_at: 0,
            wake_at: 0,
            exit_code: 0,
            waiting_for_child: false,
            teardown_pending: false,
        }
    }

    /// A fresh READY process.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn ready(
        pid: Pid,
        parent: Pid,
        name: &str,
        priority: Priority,
        saved_sp: u64,
        kernel_stack: StackRegion,
        user_stack: StackRegion,
        space: Frame,
        now: u64,
    ) -> Self {
        let quantum = priority.default_quantum();
        Self {
            pid,
            parent,
            name: ProcessName::new(name),
            state: ProcessState::Ready,
            priority,
            remaining_quantum: quantum,
            default_quantum: quantum,
            saved_sp,
            kernel_stack,
            user_stack,
            space,
            created_at: now,
            ..Self::unused()
        }
    }

    pub(crate) const fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub(crate) const fn set_parent(&mut self, parent: Pid) {
        self.parent = parent;
    }

    pub(crate) const fn set_saved_sp(&mut self, sp: u64) {
        self.saved_sp = sp;
    }

    /// Raw pointer to the saved stack pointer, for the stack-swap primitive.
    pub(crate) const fn saved_sp_ptr(&mut self) -> *mut u64 {
        &raw mut self.saved_sp
    }

    pub(crate) const fn set_wake_at(&mut self, tick: u64) {
        self.wake_at = tick;
    }

    pub(crate) const fn set_exit_code(&mut self, code: i32) {
        self.exit_code = code;
    }

    pub(crate) const fn set_waiting_for_child(&mut self, waiting: bool) {
        self.waiting_for_child = waiting;
    }

    pub(crate) const fn set_teardown_pending(&mut self, pending: bool) {
        self.teardown_pending = pending;
    }

    /// Change priority; the quantum follows, capped at the new default.
    pub(crate) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
        self.default_quantum = priority.default_quantum();
        self.remaining_quantum = self.remaining_quantum.min(self.default_quantum);
    }

    /// Charge one tick. Returns `true` when the quantum ran out; it is
    /// refilled in that case.
    pub(crate) const fn charge_tick(&mut self) -> bool {
        self.cpu_ticks += 1;
        self.remaining_quantum = self.remaining_quantum.saturating_sub(1);
        if self.remaining_quantum == 0 {
            self.remaining_quantum = self.default_quantum;
            true
        } else {
            false
        }
    }

    /// Idle process occupying slot 0 from boot.
    pub(crate) fn idle(space: Frame) -> Self {
        Self {
            name: ProcessName::new("idle"),
            state: ProcessState::Running,
            priority: Priority::Low,
            default_quantum: Priority::Low.default_quantum(),
            remaining_quantum: Priority::Low.default_quantum(),
            space,
            ..Self::unused()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_by_priority() {
        assert_eq!(Priority::Realtime.default_quantum(), 2);
        assert_eq!(Priority::High.default_quantum(), 5);
        assert_eq!(Priority::Normal.default_quantum(), 10);
        assert_eq!(Priority::Low.default_quantum(), 20);
    }

    #[test]
    fn realtime_outranks_low() {
        assert!(Priority::Realtime > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::try_from(1), Ok(Priority::High));
        assert_eq!(Priority::try_from(4), Err(ProcessError::InvalidPriority(4)));
    }

    #[test]
    fn names_are_cut_at_char_boundaries() {
        assert_eq!(ProcessName::new("init").as_str(), "init");
        let long = "ä".repeat(20);
        let name = ProcessName::new(&long);
        assert_eq!(name.as_str(), "ä".repeat(16));
    }

    #[test]
    fn quantum_refills_when_used_up() {
        let mut pcb = Pcb::ready(
            Pid::new(1),
            Pid::IDLE,
            "a",
            Priority::Realtime,
            0,
            StackRegion::NONE,
            StackRegion::NONE,
            Frame::from_index(1),
            0,
        );
        assert!(!pcb.charge_tick());
        assert!(pcb.charge_tick());
        assert_eq!(pcb.remaining_quantum(), 2);
        assert_eq!(pcb.cpu_ticks(), 2);

        pcb.set_priority(Priority::Low);
        assert_eq!(pcb.default_quantum(), 20);
        assert_eq!(pcb.remaining_quantum(), 2);
    }

    #[test]
    fn stack_pages_cover_the_region() {
        let s = StackRegion::new(VirtualAddress::new(0x1000), VirtualAddress::new(0x4000));
        let pages: Vec<u64> = s.pages().map(VirtualAddress::as_u64).collect();
        assert_eq!(pages, vec![0x1000, 0x2000, 0x3000]);
        assert_eq!(s.size(), 0x3000);
        assert!(StackRegion::NONE.is_empty());
    }
}
