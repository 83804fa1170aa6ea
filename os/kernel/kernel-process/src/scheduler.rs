//! # Scheduler
//!
//! Picks the slot that runs next and keeps the tick clock. The scheduler
//! holds no process state of its own beyond the current slot; everything
//! else lives in the [`ProcessTable`].
//!
//! Candidates are scanned starting at the slot after the current one and
//! wrapping around, so the current process itself comes last. The idle slot
//! is never a candidate; it only runs when nothing else can.

use crate::pcb::{Pcb, Pid, ProcessState};
use crate::table::{IDLE_SLOT, ProcessTable};
use core::fmt;
use log::trace;

/// How the next process is chosen.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Policy {
    /// First READY slot after the current one.
    #[default]
    RoundRobin,
    /// Highest priority READY slot; round robin among equals.
    Priority,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RoundRobin => "round-robin",
            Self::Priority => "priority",
        })
    }
}

/// A change of the running slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Switch {
    pub from: usize,
    pub to: usize,
}

/// Read-only snapshot for reporters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_ticks: u64,
    pub idle_ticks: u64,
    pub switches: u64,
    pub current_pid: Pid,
    pub ready_count: usize,
    pub policy: Policy,
}

#[derive(Debug)]
pub struct Scheduler {
    policy: Policy,
    current: usize,
    total_ticks: u64,
    idle_ticks: u64,
    switches: u64,
}

impl Scheduler {
    /// Starts on the idle slot with the clock at zero.
    #[must_use]
    pub const fn new(policy: Policy) -> Self {
        Self {
            policy,
            current: IDLE_SLOT,
            total_ticks: 0,
            idle_ticks: 0,
            switches: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn policy(&self) -> Policy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: Policy) {
        if policy != self.policy {
            log::info!("scheduling policy: {} -> {policy}", self.policy);
            self.policy = policy;
        }
    }

    /// Slot of the process on the CPU.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> usize {
        self.current
    }

    /// Ticks since boot. Sleep deadlines are expressed in this clock.
    #[inline]
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.total_ticks
    }

    /// The slot that should run next.
    ///
    /// Falls back to the current slot while it is still RUNNING, then to
    /// the idle slot.
    #[must_use]
    pub fn select_next<const N: usize>(&self, table: &ProcessTable<N>) -> usize {
        let is_ready = |slot: usize| {
            table
                .by_slot(slot)
                .is_some_and(|p| p.state() == ProcessState::Ready)
        };
        let mut candidates = (1..=N)
            .map(|offset| (self.current + offset) % N)
            .filter(|&slot| slot != IDLE_SLOT && is_ready(slot));

        let chosen = match self.policy {
            Policy::RoundRobin => candidates.next(),
            Policy::Priority => candidates.fold(None, |best: Option<usize>, slot| {
                let priority = |s: usize| table.by_slot(s).map(Pcb::priority);
                match best {
                    Some(b) if priority(slot) <= priority(b) => Some(b),
                    _ => Some(slot),
                }
            }),
        };

        chosen.unwrap_or_else(|| {
            let still_running = table
                .by_slot(self.current)
                .is_some_and(|p| p.state() == ProcessState::Running);
            if still_running { self.current } else { IDLE_SLOT }
        })
    }

    /// Hand the CPU to whatever [`select_next`](Self::select_next) picks.
    ///
    /// The outgoing process goes from RUNNING to READY; if it already left
    /// RUNNING (blocked, asleep, exited) its state is kept.
    pub fn reschedule<const N: usize>(&mut self, table: &mut ProcessTable<N>) -> Option<Switch> {
        let next = self.select_next(table);
        if next == self.current {
            table.slot_mut(next).set_state(ProcessState::Running);
            return None;
        }

        let from = self.current;
        let prev = table.slot_mut(from);
        if prev.state() == ProcessState::Running {
            prev.set_state(ProcessState::Ready);
        }
        table.slot_mut(next).set_state(ProcessState::Running);
        self.current = next;
        self.switches += 1;
        trace!("switch slot {from} -> {next}");
        Some(Switch { from, to: next })
    }

    /// First dispatch out of the boot context, which becomes the idle
    /// process.
    pub fn start<const N: usize>(&mut self, table: &mut ProcessTable<N>) -> Option<Switch> {
        self.reschedule(table)
    }

    /// One timer tick: advance the clock, wake sleepers, charge the running
    /// process and reschedule when its quantum is used up or it no longer
    /// runs.
    pub fn tick<const N: usize>(&mut self, table: &mut ProcessTable<N>) -> Option<Switch> {
        self.total_ticks += 1;
        let now = self.total_ticks;
        let woken = table.wake_sleepers(now);
        if woken > 0 {
            trace!("tick {now}: woke {woken}");
        }

        let current = table.slot_mut(self.current);
        let switch = if self.current != IDLE_SLOT && current.state() == ProcessState::Running {
            if current.charge_tick() {
                current.set_state(ProcessState::Ready);
                self.reschedule(table)
            } else {
                None
            }
        } else {
            self.reschedule(table)
        };

        if self.current == IDLE_SLOT {
            self.idle_ticks += 1;
        }
        switch
    }

    /// The running process gives up the rest of its quantum.
    pub fn yield_now<const N: usize>(&mut self, table: &mut ProcessTable<N>) -> Option<Switch> {
        let current = table.slot_mut(self.current);
        if current.state() == ProcessState::Running {
            current.set_state(ProcessState::Ready);
        }
        self.reschedule(table)
    }

    #[must_use]
    pub fn stats<const N: usize>(&self, table: &ProcessTable<N>) -> SchedulerStats {
        SchedulerStats {
            total_ticks: self.total_ticks,
            idle_ticks: self.idle_ticks,
            switches: self.switches,
            current_pid: table
                .by_slot(self.current)
                .map_or(Pid::IDLE, Pcb::pid),
            ready_count: table.ready_count(),
            policy: self.policy,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcb::{Priority, StackRegion};
    use kernel_vmem::Frame;

    const N: usize = 8;

    /// A table with hand-placed READY processes; no memory behind them.
    fn table_with(priorities: &[Priority]) -> ProcessTable<N> {
        let mut table = ProcessTable::<N>::new(Frame::from_index(1));
        for (i, &priority) in priorities.iter().enumerate() {
            let slot = i + 1;
            *table.slot_mut(slot) = Pcb::ready(
                Pid::new(u32::try_from(slot).unwrap()),
                Pid::IDLE,
                "t",
                priority,
                0,
                StackRegion::NONE,
                StackRegion::NONE,
                Frame::from_index(2),
                0,
            );
        }
        table
    }

    fn state(table: &ProcessTable<N>, slot: usize) -> ProcessState {
        table.by_slot(slot).unwrap().state()
    }

    #[test]
    fn round_robin_wraps_and_skips_idle() {
        let mut table = table_with(&[Priority::Normal; 3]);
        let mut sched = Scheduler::new(Policy::RoundRobin);
        assert_eq!(sched.start(&mut table), Some(Switch { from: 0, to: 1 }));
        assert_eq!(sched.yield_now(&mut table), Some(Switch { from: 1, to: 2 }));
        assert_eq!(sched.yield_now(&mut table), Some(Switch { from: 2, to: 3 }));
        assert_eq!(sched.yield_now(&mut table), Some(Switch { from: 3, to: 1 }));
        assert_eq!(state(&table, 0), ProcessState::Ready);
    }

    #[test]
    fn nothing_ready_keeps_running_process() {
        let mut table = table_with(&[Priority::Normal]);
        let mut sched = Scheduler::default();
        sched.start(&mut table);
        assert_eq!(sched.yield_now(&mut table), None);
        assert_eq!(state(&table, 1), ProcessState::Running);
        assert_eq!(sched.stats(&table).switches, 1);
    }

    #[test]
    fn falls_back_to_idle_when_current_blocks() {
        let mut table = table_with(&[Priority::Normal]);
        let mut sched = Scheduler::default();
        sched.start(&mut table);
        table.set_state(Pid::new(1), ProcessState::Blocked).unwrap();
        assert_eq!(sched.reschedule(&mut table), Some(Switch { from: 1, to: 0 }));
        assert_eq!(state(&table, 1), ProcessState::Blocked);
        assert_eq!(state(&table, 0), ProcessState::Running);

        sched.tick(&mut table);
        assert_eq!(sched.stats(&table).idle_ticks, 1);
    }

    #[test]
    fn priority_ties_prefer_the_slot_after_current() {
        let mut table = table_with(&[
            Priority::Normal,
            Priority::High,
            Priority::Low,
            Priority::High,
        ]);
        let mut sched = Scheduler::new(Policy::Priority);
        assert_eq!(sched.start(&mut table), Some(Switch { from: 0, to: 2 }));
        // Slot 4 is the first HIGH after slot 2; slot 2 itself comes last.
        assert_eq!(sched.yield_now(&mut table), Some(Switch { from: 2, to: 4 }));
        assert_eq!(sched.yield_now(&mut table), Some(Switch { from: 4, to: 2 }));
    }

    #[test]
    fn quantum_expiry_rotates() {
        let mut table = table_with(&[Priority::Realtime, Priority::Realtime]);
        let mut sched = Scheduler::default();
        sched.start(&mut table);
        assert_eq!(sched.tick(&mut table), None);
        assert_eq!(sched.tick(&mut table), Some(Switch { from: 1, to: 2 }));
        assert_eq!(table.by_slot(1).unwrap().remaining_quantum(), 2);
        assert_eq!(state(&table, 1), ProcessState::Ready);
    }

    #[test]
    fn lone_process_keeps_cpu_without_switching() {
        let mut table = table_with(&[Priority::Realtime]);
        let mut sched = Scheduler::default();
        sched.start(&mut table);
        for _ in 0..10 {
            assert_eq!(sched.tick(&mut table), None);
        }
        let stats = sched.stats(&table);
        assert_eq!(stats.switches, 1);
        assert_eq!(stats.total_ticks, 10);
        assert_eq!(stats.idle_ticks, 0);
        assert_eq!(stats.current_pid, Pid::new(1));
        assert_eq!(table.by_slot(1).unwrap().cpu_ticks(), 10);
    }

    #[test]
    fn tick_wakes_sleepers_against_its_own_clock() {
        let mut table = table_with(&[Priority::Normal]);
        let mut sched = Scheduler::default();
        table.sleep(Pid::new(1), 3).unwrap();

        sched.tick(&mut table);
        sched.tick(&mut table);
        assert_eq!(state(&table, 1), ProcessState::Sleeping);
        assert_eq!(sched.tick(&mut table), Some(Switch { from: 0, to: 1 }));
        assert_eq!(sched.now(), 3);
        assert_eq!(sched.stats(&table).idle_ticks, 2);
    }
}
