//! # Kernel Core
//!
//! [`Kernel`] owns every piece of mutable state of the process and memory
//! core and is the surface the system-call dispatcher, the signal code and
//! the interrupt trampolines talk to.
//!
//! Operations that take the running process off the CPU return a
//! [`StackSwap`]. By then the table, the privileged stack and the address
//! space are already switched; the caller finishes with the stack-swap
//! primitive. The timer path returns the stack pointer to resume instead.
//!
//! Exited processes are released lazily: their kernel stack may still be the
//! one executing, so the release happens on the next pass through
//! [`collect`](Kernel::collect), which always runs on another process's stack.

use crate::config::KernelConfig;
use crate::error::ProcessError;
use crate::fault::PAGE_FAULT_EXIT_CODE;
use crate::pcb::{Pcb, Pid, Priority, ProcessState};
use crate::scheduler::{Policy, Scheduler, SchedulerStats, Switch};
use crate::switch::{Platform, StackSwap};
use crate::table::{ProcessTable, Spawn};
use kernel_alloc::mmu::Mmu;
use kernel_alloc::vmm::Vmm;
use kernel_info::memory::MAX_PROCESSES;
use kernel_vmem::{FrameAlloc, PhysMapper, VirtualAddress};
use log::{debug, info, trace, warn};

/// The process and memory management core.
pub struct Kernel<M, U, A, P, const N: usize = MAX_PROCESSES>
where
    M: PhysMapper,
    U: Mmu,
    A: FrameAlloc,
    P: Platform,
{
    table: ProcessTable<N>,
    scheduler: Scheduler,
    vmm: Vmm<M, U>,
    frames: A,
    platform: P,
    config: KernelConfig,
}

impl<M, U, A, P, const N: usize> Kernel<M, U, A, P, N>
where
    M: PhysMapper,
    U: Mmu,
    A: FrameAlloc,
    P: Platform,
{
    /// Take over from the boot code, which continues as the idle process.
    ///
    /// Builds the kernel stack window's page tables in the kernel template,
    /// so this must run before the first address space is created.
    ///
    /// # Errors
    /// Out of memory while reserving the window.
    pub fn new(
        mut vmm: Vmm<M, U>,
        mut frames: A,
        platform: P,
        config: KernelConfig,
    ) -> Result<Self, ProcessError> {
        ProcessTable::<N>::reserve_stack_window(&mut vmm, &mut frames)?;
        let table = ProcessTable::with_stack_sizes(
            vmm.kernel_space(),
            config.kernel_stack_size(),
            config.user_stack_size(),
        );
        info!(
            "process core up: {N} slots, {} scheduling",
            config.policy()
        );
        Ok(Self {
            table,
            scheduler: Scheduler::new(config.policy()),
            vmm,
            frames,
            platform,
            config,
        })
    }

    #[inline]
    #[must_use]
    pub const fn table(&self) -> &ProcessTable<N> {
        &self.table
    }

    #[inline]
    #[must_use]
    pub const fn vmm(&self) -> &Vmm<M, U> {
        &self.vmm
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &A {
        &self.frames
    }

    #[inline]
    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Pid of the process on the CPU.
    #[must_use]
    pub fn current_pid(&self) -> Pid {
        self.current().pid()
    }

    fn current(&self) -> &Pcb {
        self.table.slot(self.scheduler.current())
    }

    /// Ticks since boot.
    #[inline]
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Create a process as a child of the running one.
    ///
    /// # Errors
    /// See [`ProcessTable::create`].
    pub fn spawn(
        &mut self,
        name: &str,
        entry: VirtualAddress,
        priority: Priority,
    ) -> Result<Pid, ProcessError> {
        let spawn = Spawn {
            name,
            entry,
            priority,
            parent: self.current_pid(),
        };
        let now = self.now();
        self.table
            .create(&mut self.vmm, &mut self.frames, &spawn, now)
    }

    /// Leave the boot context for the first runnable process.
    pub fn start(&mut self) -> Option<StackSwap> {
        let switch = self.scheduler.start(&mut self.table)?;
        Some(self.dispatch(switch))
    }

    /// Timer interrupt. `sp` points at the [`SavedFrame`](crate::switch::SavedFrame)
    /// of the interrupted process; the return value is the one to resume.
    pub fn on_timer_interrupt(&mut self, sp: u64) -> u64 {
        self.platform.end_of_interrupt();
        let current = self.scheduler.current();
        self.table.slot_mut(current).set_saved_sp(sp);
        self.collect();

        match self.scheduler.tick(&mut self.table) {
            Some(switch) => self.dispatch(switch).resume_sp,
            None => sp,
        }
    }

    /// Give up the CPU voluntarily.
    pub fn prepare_yield(&mut self) -> Option<StackSwap> {
        let switch = self.scheduler.yield_now(&mut self.table)?;
        Some(self.dispatch(switch))
    }

    /// Terminate the running process.
    ///
    /// # Errors
    /// The idle process cannot exit.
    pub fn exit_current(&mut self, code: i32) -> Result<StackSwap, ProcessError> {
        let pid = self.current_pid();
        self.table.terminate(pid, code)?;
        let switch = self.reschedule_away();
        Ok(self.dispatch(switch))
    }

    /// Terminate any process. Killing the running one switches away from it.
    ///
    /// # Errors
    /// Unknown, exited or protected pid.
    pub fn kill(&mut self, pid: Pid, code: i32) -> Result<Option<StackSwap>, ProcessError> {
        if pid == self.current_pid() {
            return self.exit_current(code).map(Some);
        }
        self.table.terminate(pid, code)?;
        self.collect();
        Ok(None)
    }

    /// Put the running process to sleep for `ticks` ticks.
    ///
    /// # Errors
    /// The idle process cannot sleep.
    pub fn sleep_current(&mut self, ticks: u64) -> Result<Option<StackSwap>, ProcessError> {
        let pid = self.current_pid();
        self.table.sleep(pid, self.now().saturating_add(ticks))?;
        Ok(self.leave_cpu())
    }

    /// Put `pid` to sleep until tick `wake_at`.
    ///
    /// # Errors
    /// See [`ProcessTable::sleep`].
    pub fn sleep(&mut self, pid: Pid, wake_at: u64) -> Result<Option<StackSwap>, ProcessError> {
        self.table.sleep(pid, wake_at)?;
        Ok(self.leave_cpu())
    }

    /// BLOCK `pid` until [`unblock`](Self::unblock).
    ///
    /// # Errors
    /// See [`ProcessTable::set_state`].
    pub fn block(&mut self, pid: Pid) -> Result<Option<StackSwap>, ProcessError> {
        self.set_state(pid, ProcessState::Blocked)
    }

    /// Make a BLOCKED or SLEEPING process READY.
    ///
    /// # Errors
    /// See [`ProcessTable::set_state`].
    pub fn unblock(&mut self, pid: Pid) -> Result<(), ProcessError> {
        self.table.set_state(pid, ProcessState::Ready)
    }

    /// Externally driven state change (signals: stop and continue).
    ///
    /// # Errors
    /// See [`ProcessTable::set_state`].
    pub fn set_state(
        &mut self,
        pid: Pid,
        state: ProcessState,
    ) -> Result<Option<StackSwap>, ProcessError> {
        self.table.set_state(pid, state)?;
        Ok(self.leave_cpu())
    }

    #[must_use]
    pub fn state_of(&self, pid: Pid) -> Option<ProcessState> {
        self.table.get(pid).map(Pcb::state)
    }

    /// Collect an exited child of the running process without blocking.
    ///
    /// # Errors
    /// [`ProcessError::NoChildren`] or [`ProcessError::WouldBlock`].
    pub fn wait(&mut self, child: Option<Pid>) -> Result<(Pid, i32), ProcessError> {
        self.collect();
        let parent = self.current_pid();
        self.table.reap(parent, child)
    }

    /// Block the running process until one of its children exits.
    ///
    /// # Errors
    /// [`ProcessError::NoChildren`] when there is nothing to wait for.
    pub fn block_until_child_exits(&mut self) -> Result<Option<StackSwap>, ProcessError> {
        let parent = self.current_pid();
        let has_children = self
            .table
            .iter()
            .any(|(_, p)| !p.pid().is_idle() && p.parent() == parent);
        if !has_children {
            return Err(ProcessError::NoChildren);
        }
        self.collect();
        let exited = self.table.iter().any(|(_, p)| {
            p.parent() == parent && p.state() == ProcessState::Zombie && !p.teardown_pending()
        });
        if exited {
            return Ok(None);
        }
        self.table.set_state(parent, ProcessState::Blocked)?;
        if let Some(pcb) = self.table.get_mut(parent) {
            pcb.set_waiting_for_child(true);
        }
        Ok(self.leave_cpu())
    }

    /// # Errors
    /// Unknown pid.
    pub fn priority(&self, pid: Pid) -> Result<Priority, ProcessError> {
        self.table.priority(pid)
    }

    /// Set the priority of `pid` from the raw value user space passes.
    ///
    /// # Errors
    /// Invalid raw value, unknown pid, or the idle process.
    pub fn set_priority(&mut self, pid: Pid, raw: u8) -> Result<(), ProcessError> {
        let priority = Priority::try_from(raw)?;
        self.table.set_priority(pid, priority)
    }

    pub fn set_policy(&mut self, policy: Policy) {
        self.scheduler.set_policy(policy);
        self.config.set_policy(policy);
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats(&self.table)
    }

    #[must_use]
    pub fn pcb(&self, pid: Pid) -> Option<&Pcb> {
        self.table.get(pid)
    }

    /// Every occupied slot, for `/proc`-style listings.
    pub fn processes(&self) -> impl Iterator<Item = &Pcb> {
        self.table.iter().map(|(_, p)| p)
    }

    /// A page fault raised in ring 3. The process is killed and the CPU
    /// goes to the next one; returns the stack pointer to resume, or `None`
    /// when there is no process to blame.
    pub fn on_user_page_fault(&mut self, sp: u64, cr2: VirtualAddress) -> Option<u64> {
        let pid = self.current_pid();
        warn!("pid {pid}: page fault at {cr2}, killing it");
        let current = self.scheduler.current();
        self.table.slot_mut(current).set_saved_sp(sp);
        self.exit_current(PAGE_FAULT_EXIT_CODE)
            .map(|swap| swap.resume_sp)
            .ok()
    }

    /// Release the resources of every exited process that is not on the
    /// CPU; zombies nobody waits for are recycled right away.
    pub fn collect(&mut self) -> usize {
        let current = self.scheduler.current();
        let mut released = 0;
        for slot in 0..N {
            if slot == current {
                continue;
            }
            let Some(pcb) = self.table.by_slot(slot) else {
                continue;
            };
            if pcb.state() != ProcessState::Zombie {
                continue;
            }
            if pcb.teardown_pending() {
                released += self.table.teardown(&mut self.vmm, &mut self.frames, slot);
            }
            if self.table.by_slot(slot).is_some_and(|p| p.parent().is_idle()) {
                let (pid, code) = self.table.recycle(slot);
                debug!("recycled orphan pid {pid} (exit {code})");
            }
        }
        released
    }

    /// Reschedule after the running process left RUNNING. Some other slot,
    /// the idle one at worst, is always picked.
    fn reschedule_away(&mut self) -> Switch {
        let from = self.scheduler.current();
        self.scheduler
            .reschedule(&mut self.table)
            .unwrap_or(Switch { from, to: from })
    }

    /// Switch away if the running process is no longer RUNNING.
    fn leave_cpu(&mut self) -> Option<StackSwap> {
        if self.current().state() == ProcessState::Running {
            return None;
        }
        let switch = self.scheduler.reschedule(&mut self.table)?;
        Some(self.dispatch(switch))
    }

    /// Point the CPU at the incoming process: privileged stack first, then
    /// the address space.
    fn dispatch(&mut self, switch: Switch) -> StackSwap {
        let next = self.table.slot_mut(switch.to);
        let (to, space, stack, resume_sp) =
            (next.pid(), next.space(), next.kernel_stack(), next.saved_sp());
        if !stack.is_empty() {
            self.platform.set_privileged_stack(stack.top());
        }
        self.vmm.switch_to(space);

        let prev = self.table.slot_mut(switch.from);
        let from = prev.pid();
        trace!("dispatch pid {from} -> pid {to}");
        StackSwap {
            from,
            to,
            save_to: prev.saved_sp_ptr(),
            resume_sp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::frame_alloc::BitmapFrameAlloc;
    use kernel_alloc::testing::RecordingMmu;
    use kernel_info::boot::MemoryRegion;
    use kernel_info::memory::PAGE_SIZE;
    use kernel_vmem::testing::TestPhys;

    #[derive(Default)]
    struct NullPlatform;

    impl Platform for NullPlatform {
        fn end_of_interrupt(&mut self) {}
        fn set_privileged_stack(&mut self, _top: VirtualAddress) {}
    }

    const FRAMES: usize = 256;

    fn kernel(
        words: &mut [u64],
    ) -> Kernel<TestPhys, RecordingMmu, BitmapFrameAlloc<'_>, NullPlatform, 4> {
        let mut frames = BitmapFrameAlloc::new(words);
        frames.init(&[MemoryRegion::available(0, FRAMES as u64 * PAGE_SIZE)], PAGE_SIZE);
        let root = frames.alloc().unwrap();
        let vmm = Vmm::new(TestPhys::with_frames(FRAMES), RecordingMmu::new(root), root);
        Kernel::new(vmm, frames, NullPlatform, KernelConfig::default()).unwrap()
    }

    #[test]
    fn idle_cannot_leave() {
        let mut words = [0u64; FRAMES / 64];
        let mut k = kernel(&mut words);
        assert_eq!(k.current_pid(), Pid::IDLE);
        assert_eq!(
            k.exit_current(0),
            Err(ProcessError::Protected(Pid::IDLE))
        );
        assert_eq!(
            k.sleep_current(3),
            Err(ProcessError::Protected(Pid::IDLE))
        );
        assert_eq!(k.start(), None);
    }

    #[test]
    fn spawned_processes_are_children_of_the_caller() {
        let mut words = [0u64; FRAMES / 64];
        let mut k = kernel(&mut words);
        let a = k.spawn("a", VirtualAddress::new(0x40_0000), Priority::Normal).unwrap();
        k.start().unwrap();
        let b = k.spawn("b", VirtualAddress::new(0x40_0000), Priority::Normal).unwrap();
        assert_eq!(k.pcb(a).unwrap().parent(), Pid::IDLE);
        assert_eq!(k.pcb(b).unwrap().parent(), a);
        assert_eq!(k.processes().count(), 3);
    }

    #[test]
    fn set_priority_validates_raw_values() {
        let mut words = [0u64; FRAMES / 64];
        let mut k = kernel(&mut words);
        let a = k.spawn("a", VirtualAddress::new(0x40_0000), Priority::Normal).unwrap();
        assert_eq!(k.set_priority(a, 9), Err(ProcessError::InvalidPriority(9)));
        k.set_priority(a, 0).unwrap();
        assert_eq!(k.priority(a), Ok(Priority::Realtime));
    }
}
