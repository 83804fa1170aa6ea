mod common;

use common::*;
use kernel_info::memory::PAGE_SIZE;
use kernel_process::fault::PAGE_FAULT_EXIT_CODE;
use kernel_process::switch::SavedFrame;
use kernel_process::{KernelConfig, Pid, Priority, ProcessError, ProcessState};
use kernel_vmem::{PhysMapper, VirtualAddress};

#[test]
fn timer_sends_eoi_before_switching() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Realtime);
    let b = spawn(&mut k, "b", Priority::Realtime);
    k.start();
    let before = k.platform().events.len();

    let a_sp = k.pcb(a).unwrap().saved_sp() - 0x40;
    assert_eq!(k.on_timer_interrupt(a_sp), a_sp);
    assert_eq!(k.pcb(a).unwrap().saved_sp(), a_sp);

    let b_sp = k.pcb(b).unwrap().saved_sp();
    assert_eq!(k.on_timer_interrupt(a_sp), b_sp);

    let events = &k.platform().events[before..];
    assert_eq!(events[0], Event::Eoi);
    assert_eq!(events[1], Event::Eoi);
    assert_eq!(
        events[2],
        Event::PrivilegedStack(k.pcb(b).unwrap().kernel_stack().top())
    );
    assert_eq!(k.vmm().current_space(), k.pcb(b).unwrap().space());
}

#[test]
fn dispatch_points_the_cpu_at_the_new_process() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Normal);
    let swap = k.start().expect("a is ready");
    let pcb = k.pcb(a).unwrap();

    assert_eq!((swap.from, swap.to), (Pid::IDLE, a));
    assert_eq!(swap.resume_sp, pcb.kernel_stack().top - SavedFrame::SIZE);
    assert_eq!(k.platform().last_stack(), Some(pcb.kernel_stack().top()));
    assert_eq!(k.vmm().mmu().loads, vec![pcb.space()]);

    // The forged frame is where the resume sp points, in every space.
    let frame_va = VirtualAddress::new(swap.resume_sp);
    let pa = k.vmm().translate(pcb.space(), frame_va).unwrap();
    let frame: SavedFrame = unsafe { *k.vmm().mapper().phys_to_mut(pa) };
    assert_eq!(frame.rip, ENTRY.as_u64());
    assert_eq!(frame.rsp, pcb.user_stack().top);
}

#[test]
fn failed_creation_commits_nothing() {
    // Enough for the kernel root, the stack window and one process.
    let mut k = boot_with(24, KernelConfig::default());
    spawn(&mut k, "fits", Priority::Normal);
    let free = k.frames().free_count();
    let slots = k.table().free_slots();

    let err = k.spawn("too-much", ENTRY, Priority::Normal).unwrap_err();
    assert!(matches!(err, ProcessError::Memory(_)), "{err:?}");
    assert_eq!(err.errno(), -12);
    assert_eq!(k.frames().free_count(), free);
    assert_eq!(k.table().free_slots(), slots);
    assert_eq!(k.processes().count(), 2);
}

#[test]
fn first_spawn_failure_commits_nothing() {
    // From too little for anything up to just enough for one process.
    for ram in 8..=20 {
        let mut k = boot_with(ram, KernelConfig::default());
        let free = k.frames().free_count();
        match k.spawn("first", ENTRY, Priority::Normal) {
            Ok(pid) => {
                assert!(k.frames().free_count() < free);
                k.kill(pid, 0).unwrap();
            }
            Err(err) => assert!(matches!(err, ProcessError::Memory(_)), "{err:?}"),
        }
        assert_eq!(k.frames().free_count(), free, "{ram} frames of RAM");
        assert_eq!(k.table().free_slots(), SLOTS - 1);
    }
}

#[test]
fn table_full_is_reported() {
    let mut k = boot(KernelConfig::default());
    for i in 1..SLOTS {
        spawn(&mut k, &format!("p{i}"), Priority::Low);
    }
    assert_eq!(
        k.spawn("one-too-many", ENTRY, Priority::Low),
        Err(ProcessError::TableFull)
    );
}

#[test]
fn exit_wakes_the_waiting_parent_and_wait_reaps() {
    let mut k = boot(KernelConfig::default().with_user_stack_size(2 * PAGE_SIZE as usize));
    let parent = spawn(&mut k, "parent", Priority::Normal);
    k.start();
    let free = k.frames().free_count();
    let child = spawn(&mut k, "child", Priority::Normal);

    assert_eq!(k.wait(None), Err(ProcessError::WouldBlock));
    let swap = k.block_until_child_exits().unwrap().expect("child runs");
    assert_eq!(swap.to, child);
    assert_eq!(k.state_of(parent), Some(ProcessState::Blocked));

    let swap = k.exit_current(42).unwrap();
    assert_eq!((swap.from, swap.to), (child, parent));
    assert_eq!(k.state_of(child), Some(ProcessState::Zombie));
    assert!(k.pcb(child).unwrap().teardown_pending());

    assert_eq!(k.wait(Some(child)), Ok((child, 42)));
    assert_eq!(k.state_of(child), None);
    assert_eq!(k.frames().free_count(), free);
    assert_eq!(k.wait(None), Err(ProcessError::NoChildren));
}

#[test]
fn running_zombie_is_released_after_the_switch() {
    let mut k = boot(KernelConfig::default());
    let parent = spawn(&mut k, "parent", Priority::Normal);
    k.start();
    let child = spawn(&mut k, "child", Priority::Normal);
    k.prepare_yield().expect("child runs");
    assert_eq!(k.current_pid(), child);

    // The exiting process is still on its kernel stack here.
    k.exit_current(1).unwrap();
    assert!(k.pcb(child).unwrap().teardown_pending());
    ticks(&mut k, 1);
    assert!(!k.pcb(child).unwrap().teardown_pending());
    assert_eq!(k.state_of(child), Some(ProcessState::Zombie));
    assert_eq!(k.current_pid(), parent);
}

#[test]
fn killing_an_orphan_recycles_it_at_once() {
    let mut k = boot(KernelConfig::default());
    let free = k.frames().free_count();
    let a = spawn(&mut k, "a", Priority::Normal);
    let b = spawn(&mut k, "b", Priority::Normal);
    k.kill(b, -9).unwrap();
    assert_eq!(k.state_of(b), None);

    k.kill(a, -9).unwrap();
    assert_eq!(k.state_of(a), None);
    assert_eq!(k.frames().free_count(), free);
    assert_eq!(k.table().free_slots(), SLOTS - 1);

    assert_eq!(k.kill(a, 0), Err(ProcessError::NoSuchProcess(a)));
    assert_eq!(k.kill(Pid::IDLE, 0), Err(ProcessError::Protected(Pid::IDLE)));
}

#[test]
fn killing_the_running_process_switches_away() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Normal);
    let b = spawn(&mut k, "b", Priority::Normal);
    k.start();
    let swap = k.kill(a, 9).unwrap().expect("switch");
    assert_eq!((swap.from, swap.to), (a, b));
}

#[test]
fn orphans_are_adopted_by_idle() {
    let mut k = boot(KernelConfig::default());
    let parent = spawn(&mut k, "parent", Priority::Normal);
    k.start();
    let child = spawn(&mut k, "child", Priority::Normal);
    k.exit_current(0).unwrap();
    assert_eq!(k.pcb(child).unwrap().parent(), Pid::IDLE);
    ticks(&mut k, 1);
    // The parent was a child of idle itself, so nobody reaps it.
    assert_eq!(k.state_of(parent), None);
}

#[test]
fn user_page_fault_kills_only_the_offender() {
    let mut k = boot(KernelConfig::default());
    let init = spawn(&mut k, "init", Priority::Normal);
    k.start();
    let victim = spawn(&mut k, "victim", Priority::Normal);
    k.prepare_yield().expect("victim runs");

    let sp = k.pcb(victim).unwrap().saved_sp();
    let resume = k
        .on_user_page_fault(sp, VirtualAddress::new(0xdead_0000))
        .expect("init takes over");
    assert_eq!(resume, k.pcb(init).unwrap().saved_sp());
    assert_eq!(k.current_pid(), init);
    assert_eq!(k.wait(Some(victim)), Ok((victim, PAGE_FAULT_EXIT_CODE)));
}

#[test]
fn block_and_unblock_round_trip() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Normal);
    k.start();
    let swap = k.block(a).unwrap().expect("idle takes over");
    assert_eq!(swap.to, Pid::IDLE);
    assert_eq!(
        k.set_state(a, ProcessState::Running),
        Err(ProcessError::InvalidTransition {
            pid: a,
            from: ProcessState::Blocked,
            to: ProcessState::Running,
        })
    );
    k.unblock(a).unwrap();
    ticks(&mut k, 1);
    assert_eq!(k.current_pid(), a);
}
