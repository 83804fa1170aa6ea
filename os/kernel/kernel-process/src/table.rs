//! # Process Table
//!
//! A fixed arena of [`Pcb`] slots. Processes refer to each other by [`Pid`];
//! the scheduler refers to them by slot index. Slot 0 belongs to the idle
//! process for the lifetime of the kernel.
//!
//! ## Stacks
//!
//! Each process gets
//!
//! - a user stack of anonymous pages directly below [`USER_STACK_TOP`] in its
//!   own address space, and
//! - a kernel stack in the shared window at [`KERNEL_STACKS_BASE`], one
//!   guard page plus [`KERNEL_STACK_MAX_SIZE`] per slot. The window lives in
//!   the kernel half, so the stack is reachable from every address space.
//!
//! A new process starts suspended with a [`SavedFrame`] at the top of its
//! kernel stack that drops it into ring 3 at its entry point.

use crate::error::ProcessError;
use crate::pcb::{Pcb, Pid, Priority, ProcessState, StackRegion};
use crate::switch::SavedFrame;
use kernel_alloc::mmu::Mmu;
use kernel_alloc::vmm::{Vmm, VmmError};
use kernel_info::memory::{
    KERNEL_STACK_GUARD_SIZE, KERNEL_STACK_MAX_SIZE, KERNEL_STACK_SIZE, KERNEL_STACK_STRIDE,
    KERNEL_STACKS_BASE, MAX_PROCESSES, PAGE_SIZE, USER_STACK_SIZE, USER_STACK_TOP,
};
use kernel_vmem::{Frame, FrameAlloc, PageEntryBits, PhysMapper, VirtualAddress};
use log::{debug, info, warn};

/// Slot of the idle process.
pub const IDLE_SLOT: usize = 0;

/// What to start.
#[derive(Copy, Clone, Debug)]
pub struct Spawn<'a> {
    pub name: &'a str,
    /// User-mode entry point, already mapped by the caller's loader.
    pub entry: VirtualAddress,
    pub priority: Priority,
    pub parent: Pid,
}

/// Fixed-capacity process arena.
pub struct ProcessTable<const N: usize = MAX_PROCESSES> {
    slots: [Pcb; N],
    next_pid: u32,
    kernel_stack_size: u64,
    user_stack_size: u64,
}

#[inline]
const fn page_round_up(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Lowest address of the kernel stack owned by `slot`.
#[inline]
#[must_use]
pub const fn kernel_stack_base(slot: usize) -> u64 {
    KERNEL_STACKS_BASE + slot as u64 * KERNEL_STACK_STRIDE + KERNEL_STACK_GUARD_SIZE
}

impl<const N: usize> ProcessTable<N> {
    /// A table holding only the idle process, which runs in `kernel_space`.
    #[must_use]
    pub fn new(kernel_space: Frame) -> Self {
        Self::with_stack_sizes(kernel_space, KERNEL_STACK_SIZE, USER_STACK_SIZE)
    }

    /// Like [`new`](Self::new) with explicit stack sizes, rounded up to
    /// whole pages. Kernel stacks are capped by the window stride.
    #[must_use]
    pub fn with_stack_sizes(kernel_space: Frame, kernel_stack: usize, user_stack: usize) -> Self {
        const { assert!(N >= 2, "the table needs the idle slot and one more") };
        let mut slots = [const { Pcb::unused() }; N];
        slots[IDLE_SLOT] = Pcb::idle(kernel_space);
        let kernel_stack = page_round_up(kernel_stack as u64);
        let user_stack = page_round_up(user_stack as u64);
        Self {
            slots,
            next_pid: 1,
            kernel_stack_size: kernel_stack.clamp(PAGE_SIZE, KERNEL_STACK_MAX_SIZE),
            user_stack_size: user_stack.max(PAGE_SIZE),
        }
    }

    /// Build the page tables of the kernel stack window for all `N` slots in
    /// the kernel template. Must run before the first address space is
    /// created; afterwards [`create`](Self::create) only takes leaf frames in
    /// the kernel half, which its rollback gives back.
    ///
    /// # Errors
    /// Out of memory.
    pub fn reserve_stack_window<M, U, A>(
        vmm: &mut Vmm<M, U>,
        frames: &mut A,
    ) -> Result<(), ProcessError>
    where
        M: PhysMapper,
        U: Mmu,
        A: FrameAlloc,
    {
        let window = VirtualAddress::new(KERNEL_STACKS_BASE);
        vmm.reserve_kernel_tables(frames, window, N as u64 * KERNEL_STACK_STRIDE)?;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Slot currently holding `pid`, zombies included.
    #[must_use]
    pub fn slot_of(&self, pid: Pid) -> Option<usize> {
        if pid.is_idle() {
            return Some(IDLE_SLOT);
        }
        self.slots
            .iter()
            .position(|p| p.state() != ProcessState::Unused && p.pid() == pid)
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slot_of(pid).map(|slot| &self.slots[slot])
    }

    pub(crate) fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slot_of(pid).map(|slot| &mut self.slots[slot])
    }

    /// The PCB in `slot`, whatever its state.
    #[inline]
    #[must_use]
    pub fn by_slot(&self, slot: usize) -> Option<&Pcb> {
        self.slots.get(slot)
    }

    #[inline]
    pub(crate) fn slot(&self, slot: usize) -> &Pcb {
        &self.slots[slot]
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut Pcb {
        &mut self.slots[slot]
    }

    /// Every occupied slot as `(slot, pcb)`, zombies included.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Pcb)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state() != ProcessState::Unused)
    }

    /// Every process in `state`.
    ///
    /// The idle process only shows up while it is RUNNING. Off the CPU it is
    /// parked as READY, but it is never a candidate for the scheduler.
    pub fn with_state(&self, state: ProcessState) -> impl Iterator<Item = &Pcb> {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(slot, p)| {
                p.state() == state && (*slot != IDLE_SLOT || state == ProcessState::Running)
            })
            .map(|(_, p)| p)
    }

    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.with_state(ProcessState::Ready).count()
    }

    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.with_state(ProcessState::Unused).count()
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .skip(1)
            .position(|p| p.state() == ProcessState::Unused)
            .map(|i| i + 1)
    }

    fn allocate_pid(&mut self) -> Pid {
        loop {
            let pid = Pid::new(self.next_pid);
            self.next_pid = self.next_pid.checked_add(1).unwrap_or(1);
            if !pid.is_idle() && self.slot_of(pid).is_none() {
                return pid;
            }
        }
    }

    /// Create a READY process.
    ///
    /// Either everything is committed or nothing is: on failure every frame
    /// taken so far is back in `frames` and the table is unchanged.
    ///
    /// # Errors
    /// [`ProcessError::TableFull`] before anything is allocated, or
    /// [`ProcessError::Memory`] when the address space or a stack cannot be
    /// built.
    pub fn create<M, U, A>(
        &mut self,
        vmm: &mut Vmm<M, U>,
        frames: &mut A,
        spawn: &Spawn<'_>,
        now: u64,
    ) -> Result<Pid, ProcessError>
    where
        M: PhysMapper,
        U: Mmu,
        A: FrameAlloc,
    {
        let Some(slot) = self.free_slot() else {
            warn!("cannot create {:?}: process table is full", spawn.name);
            return Err(ProcessError::TableFull);
        };

        let space = vmm.create_space(frames)?;
        let built = self.build_stacks(vmm, frames, slot, space, spawn.entry);
        let (kernel_stack, user_stack, saved_sp) = match built {
            Ok(stacks) => stacks,
            Err(e) => {
                if let Err(e) = vmm.destroy_space(frames, space) {
                    warn!("rollback of address space {space} failed: {e}");
                }
                warn!("cannot create {:?}: {e}", spawn.name);
                return Err(e);
            }
        };

        let pid = self.allocate_pid();
        self.slots[slot] = Pcb::ready(
            pid,
            spawn.parent,
            spawn.name,
            spawn.priority,
            saved_sp,
            kernel_stack,
            user_stack,
            space,
            now,
        );
        info!(
            "created pid {pid} {:?} in slot {slot} ({}, parent {})",
            spawn.name, spawn.priority, spawn.parent
        );
        Ok(pid)
    }

    /// Map both stacks and forge the first frame. Undoes its own kernel
    /// stack mappings on failure; the caller destroys `space`.
    fn build_stacks<M: PhysMapper, U: Mmu, A: FrameAlloc>(
        &self,
        vmm: &mut Vmm<M, U>,
        frames: &mut A,
        slot: usize,
        space: Frame,
        entry: VirtualAddress,
    ) -> Result<(StackRegion, StackRegion, u64), ProcessError> {
        let user_stack = StackRegion::new(
            VirtualAddress::new(USER_STACK_TOP - self.user_stack_size),
            VirtualAddress::new(USER_STACK_TOP),
        );
        for page in user_stack.pages() {
            vmm.map_anonymous(frames, space, page, PageEntryBits::user_rw())?;
        }

        let base = kernel_stack_base(slot);
        let kernel_stack = StackRegion::new(
            VirtualAddress::new(base),
            VirtualAddress::new(base + self.kernel_stack_size),
        );
        let kernel_space = vmm.kernel_space();
        let mut top_frame = None;
        for page in kernel_stack.pages() {
            match vmm.map_anonymous(frames, kernel_space, page, PageEntryBits::kernel_rw()) {
                Ok(frame) => top_frame = Some(frame),
                Err(e) => {
                    release_kernel_stack(vmm, frames, kernel_stack);
                    return Err(e.into());
                }
            }
        }
        let top_frame = top_frame.ok_or(VmmError::OutOfMemory)?;

        let frame = SavedFrame::user_entry(entry, user_stack.top());
        let offset = PAGE_SIZE - SavedFrame::SIZE;
        // SAFETY: the frame was just allocated for this stack and nothing else
        // refers to it yet.
        unsafe {
            *vmm.mapper()
                .phys_to_mut::<SavedFrame>(top_frame.base() + offset) = frame;
        }
        Ok((kernel_stack, user_stack, kernel_stack.top - SavedFrame::SIZE))
    }

    /// Move `pid` to ZOMBIE with `exit_code`. Returns its slot.
    ///
    /// Live children are handed to the idle process; zombie children go to
    /// it too, which recycles them once their resources are gone. A parent
    /// blocked in `wait` is made READY.
    ///
    /// # Errors
    /// The idle process is protected; unknown and already exited pids are
    /// [`ProcessError::NoSuchProcess`].
    pub fn terminate(&mut self, pid: Pid, exit_code: i32) -> Result<usize, ProcessError> {
        if pid.is_idle() {
            return Err(ProcessError::Protected(pid));
        }
        let slot = self
            .slot_of(pid)
            .filter(|&s| self.slots[s].state().is_alive())
            .ok_or(ProcessError::NoSuchProcess(pid))?;

        let pcb = &mut self.slots[slot];
        let parent = pcb.parent();
        pcb.set_state(ProcessState::Zombie);
        pcb.set_exit_code(exit_code);
        pcb.set_teardown_pending(true);
        pcb.set_waiting_for_child(false);

        for child in &mut self.slots {
            let occupied = child.state() != ProcessState::Unused && !child.pid().is_idle();
            if occupied && child.parent() == pid {
                child.set_parent(Pid::IDLE);
            }
        }

        if let Some(p) = self.get_mut(parent)
            && p.waiting_for_child()
            && p.state() == ProcessState::Blocked
        {
            p.set_waiting_for_child(false);
            p.set_state(ProcessState::Ready);
            debug!("woke parent {parent} of pid {pid}");
        }

        info!("pid {pid} exited with {exit_code}");
        Ok(slot)
    }

    /// Release the kernel stack and the address space of the zombie in
    /// `slot`. The slot must not be the one executing.
    ///
    /// Returns the number of frames handed back.
    pub fn teardown<M, U, A>(&mut self, vmm: &mut Vmm<M, U>, frames: &mut A, slot: usize) -> usize
    where
        M: PhysMapper,
        U: Mmu,
        A: FrameAlloc,
    {
        let pcb = &mut self.slots[slot];
        if pcb.state() != ProcessState::Zombie || !pcb.teardown_pending() {
            return 0;
        }
        let (pid, stack, space) = (pcb.pid(), pcb.kernel_stack(), pcb.space());
        pcb.set_teardown_pending(false);

        let mut released = release_kernel_stack(vmm, frames, stack);
        match vmm.destroy_space(frames, space) {
            Ok(n) => released += n,
            Err(e) => warn!("pid {pid}: address space {space} not released: {e}"),
        }
        debug!("pid {pid}: released {released} frames");
        released
    }

    /// Collect the exit code of a zombie child of `parent`, any child when
    /// `child` is `None`. The slot becomes free.
    ///
    /// Children whose resources are not yet released count as not exited.
    ///
    /// # Errors
    /// [`ProcessError::NoChildren`] when there is nothing to wait for,
    /// [`ProcessError::WouldBlock`] when no matching child has exited.
    pub fn reap(&mut self, parent: Pid, child: Option<Pid>) -> Result<(Pid, i32), ProcessError> {
        let is_match = |p: &Pcb| {
            p.state() != ProcessState::Unused
                && !p.pid().is_idle()
                && p.parent() == parent
                && child.is_none_or(|c| c == p.pid())
        };
        if !self.slots.iter().any(is_match) {
            return Err(ProcessError::NoChildren);
        }

        let slot = self
            .slots
            .iter()
            .position(|p| {
                is_match(p) && p.state() == ProcessState::Zombie && !p.teardown_pending()
            })
            .ok_or(ProcessError::WouldBlock)?;
        Ok(self.recycle(slot))
    }

    /// Free a torn-down zombie slot. Returns its pid and exit code.
    pub(crate) fn recycle(&mut self, slot: usize) -> (Pid, i32) {
        let pcb = &mut self.slots[slot];
        let reaped = (pcb.pid(), pcb.exit_code());
        *pcb = Pcb::unused();
        debug!("pid {} reaped from slot {slot}", reaped.0);
        reaped
    }

    /// Change the state of `pid` along one of the externally driven edges:
    ///
    /// | from                       | to        |
    /// |----------------------------|-----------|
    /// | READY, RUNNING, SLEEPING   | BLOCKED   |
    /// | BLOCKED, SLEEPING          | READY     |
    ///
    /// Moving the running process out of RUNNING obliges the caller to
    /// reschedule.
    ///
    /// # Errors
    /// [`ProcessError::InvalidTransition`] for every other edge,
    /// [`ProcessError::Protected`] for the idle process.
    pub fn set_state(&mut self, pid: Pid, state: ProcessState) -> Result<(), ProcessError> {
        if pid.is_idle() {
            return Err(ProcessError::Protected(pid));
        }
        let pcb = self.get_mut(pid).ok_or(ProcessError::NoSuchProcess(pid))?;
        let from = pcb.state();
        let allowed = matches!(
            (from, state),
            (
                ProcessState::Ready | ProcessState::Running | ProcessState::Sleeping,
                ProcessState::Blocked
            ) | (ProcessState::Blocked | ProcessState::Sleeping, ProcessState::Ready)
        );
        if !allowed {
            return Err(ProcessError::InvalidTransition { pid, from, to: state });
        }
        pcb.set_state(state);
        if state == ProcessState::Ready {
            pcb.set_waiting_for_child(false);
        }
        debug!("pid {pid}: {from} -> {state}");
        Ok(())
    }

    /// Put `pid` to sleep until tick `wake_at`.
    ///
    /// # Errors
    /// Only READY and RUNNING processes can sleep.
    pub fn sleep(&mut self, pid: Pid, wake_at: u64) -> Result<(), ProcessError> {
        if pid.is_idle() {
            return Err(ProcessError::Protected(pid));
        }
        let pcb = self.get_mut(pid).ok_or(ProcessError::NoSuchProcess(pid))?;
        let from = pcb.state();
        if !matches!(from, ProcessState::Ready | ProcessState::Running) {
            return Err(ProcessError::InvalidTransition {
                pid,
                from,
                to: ProcessState::Sleeping,
            });
        }
        pcb.set_wake_at(wake_at);
        pcb.set_state(ProcessState::Sleeping);
        debug!("pid {pid} sleeps until tick {wake_at}");
        Ok(())
    }

    /// Make every sleeper whose deadline is at or before `now` READY.
    /// Returns how many woke.
    pub fn wake_sleepers(&mut self, now: u64) -> usize {
        let mut woken = 0;
        for pcb in &mut self.slots {
            if pcb.state() == ProcessState::Sleeping && pcb.wake_at() <= now {
                pcb.set_state(ProcessState::Ready);
                woken += 1;
            }
        }
        woken
    }

    /// # Errors
    /// Unknown pid.
    pub fn priority(&self, pid: Pid) -> Result<Priority, ProcessError> {
        self.get(pid)
            .filter(|p| p.state().is_alive())
            .map(Pcb::priority)
            .ok_or(ProcessError::NoSuchProcess(pid))
    }

    /// # Errors
    /// Unknown pid, or the idle process.
    pub fn set_priority(&mut self, pid: Pid, priority: Priority) -> Result<(), ProcessError> {
        if pid.is_idle() {
            return Err(ProcessError::Protected(pid));
        }
        let pcb = self
            .get_mut(pid)
            .filter(|p| p.state().is_alive())
            .ok_or(ProcessError::NoSuchProcess(pid))?;
        pcb.set_priority(priority);
        debug!("pid {pid}: priority {priority}");
        Ok(())
    }
}

/// Unmap every page of a kernel stack from the shared window, returning the
/// frames that were mapped. Pages that were never mapped are skipped.
fn release_kernel_stack<M: PhysMapper, U: Mmu, A: FrameAlloc>(
    vmm: &mut Vmm<M, U>,
    frames: &mut A,
    stack: StackRegion,
) -> usize {
    let kernel_space = vmm.kernel_space();
    let mut released = 0;
    for page in stack.pages() {
        if vmm.translate(kernel_space, page).is_none() {
            continue;
        }
        match vmm.unmap(frames, kernel_space, page) {
            Ok(_) => released += 1,
            Err(e) => warn!("kernel stack page {page} not released: {e}"),
        }
    }
    released
}
