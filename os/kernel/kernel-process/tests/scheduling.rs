mod common;

use common::*;
use kernel_process::scheduler::Policy;
use kernel_process::{KernelConfig, Pcb, Pid, Priority, ProcessState};

#[test]
fn round_robin_gives_equal_shares_in_creation_order() {
    let mut k = boot(KernelConfig::default());
    let pids = [
        spawn(&mut k, "a", Priority::Normal),
        spawn(&mut k, "b", Priority::Normal),
        spawn(&mut k, "c", Priority::Normal),
    ];
    k.start().expect("first dispatch");

    let mut order = Vec::new();
    for _ in 0..30 {
        order.push(k.current_pid());
        ticks(&mut k, 1);
    }

    for pid in pids {
        assert_eq!(cpu_ticks(&k, pid), 10, "pid {pid}");
    }
    assert!(order[..10].iter().all(|p| *p == pids[0]));
    assert!(order[10..20].iter().all(|p| *p == pids[1]));
    assert!(order[20..].iter().all(|p| *p == pids[2]));

    let stats = k.stats();
    assert_eq!(stats.total_ticks, 30);
    assert_eq!(stats.idle_ticks, 0);
    // Boot -> a, a -> b, b -> c, c -> a.
    assert_eq!(stats.switches, 4);
}

#[test]
fn high_priority_monopolizes_until_it_sleeps() {
    let mut k = boot(KernelConfig::default().with_policy(Policy::Priority));
    let n1 = spawn(&mut k, "n1", Priority::Normal);
    let high = spawn(&mut k, "high", Priority::High);
    let n2 = spawn(&mut k, "n2", Priority::Normal);
    k.start().expect("first dispatch");

    ticks(&mut k, 50);
    assert_eq!(cpu_ticks(&k, high), 50);
    assert_eq!(cpu_ticks(&k, n1), 0);
    assert_eq!(cpu_ticks(&k, n2), 0);

    let swap = k.sleep_current(5).unwrap().expect("switches away");
    assert_eq!(swap.from, high);
    // Equal priorities: the first one after the sleeper's slot.
    assert_eq!(swap.to, n2);
    ticks(&mut k, 4);
    assert_eq!(k.state_of(high), Some(ProcessState::Sleeping));
    assert_eq!(cpu_ticks(&k, n2), 4);

    // Awake, but it waits for the running quantum to end.
    ticks(&mut k, 1);
    assert_eq!(k.state_of(high), Some(ProcessState::Ready));
    assert_eq!(k.current_pid(), n2);
    ticks(&mut k, 5);
    assert_eq!(cpu_ticks(&k, n2), 10);
    assert_eq!(k.current_pid(), high);
    assert_eq!(cpu_ticks(&k, n1), 0);
}

#[test]
fn yield_switches_to_the_ready_process_only() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Normal);
    let b = spawn(&mut k, "b", Priority::Normal);
    let c = spawn(&mut k, "c", Priority::Normal);
    k.start().expect("first dispatch");
    assert_eq!(k.current_pid(), a);
    assert_eq!(k.block(c).unwrap(), None);

    let before = k.stats().switches;
    let swap = k.prepare_yield().expect("b is ready");
    assert_eq!((swap.from, swap.to), (a, b));
    assert_eq!(swap.resume_sp, k.pcb(b).unwrap().saved_sp());
    assert_eq!(k.state_of(a), Some(ProcessState::Ready));
    assert_eq!(k.state_of(b), Some(ProcessState::Running));
    assert_eq!(k.state_of(c), Some(ProcessState::Blocked));
    assert_eq!(k.stats().switches, before + 1);
}

#[test]
fn yield_without_competition_keeps_running() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Normal);
    k.start();
    let switches = k.stats().switches;
    assert_eq!(k.prepare_yield(), None);
    assert_eq!(k.state_of(a), Some(ProcessState::Running));
    assert_eq!(k.stats().switches, switches);
}

#[test]
fn sleeper_is_not_ready_before_its_deadline() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Normal);
    k.start();
    ticks(&mut k, 3);

    let deadline = k.now() + 4;
    k.sleep_current(4).unwrap().expect("idle takes over");
    assert_eq!(k.current_pid(), Pid::IDLE);
    while k.now() + 1 < deadline {
        ticks(&mut k, 1);
        assert_eq!(k.state_of(a), Some(ProcessState::Sleeping), "tick {}", k.now());
    }
    ticks(&mut k, 1);
    assert_eq!(k.now(), deadline);
    assert_eq!(k.state_of(a), Some(ProcessState::Running));
    assert_eq!(k.stats().idle_ticks, 3);
}

#[test]
fn round_robin_never_starves_a_ready_process() {
    let mut k = boot(KernelConfig::default());
    let pids: Vec<Pid> = [Priority::Realtime, Priority::Normal, Priority::Low]
        .into_iter()
        .enumerate()
        .map(|(i, p)| spawn(&mut k, &format!("p{i}"), p))
        .collect();
    k.start();
    // One full rotation is 2 + 10 + 20 ticks.
    ticks(&mut k, 32);
    for pid in &pids {
        assert!(cpu_ticks(&k, *pid) > 0, "pid {pid} starved");
    }
    assert_eq!(k.stats().idle_ticks, 0);
}

#[test]
fn idle_ticks_are_counted_when_nothing_runs() {
    let mut k = boot(KernelConfig::default());
    ticks(&mut k, 5);
    let stats = k.stats();
    assert_eq!(stats.idle_ticks, 5);
    assert_eq!(stats.current_pid, Pid::IDLE);
    assert_eq!(stats.switches, 0);
    assert_eq!(stats.policy, Policy::RoundRobin);
}

#[test]
fn policy_can_change_at_runtime() {
    let mut k = boot(KernelConfig::default());
    let low = spawn(&mut k, "low", Priority::Low);
    let rt = spawn(&mut k, "rt", Priority::Realtime);
    k.start();
    assert_eq!(k.current_pid(), low);

    k.set_policy(Policy::Priority);
    assert_eq!(k.config().policy(), Policy::Priority);
    k.prepare_yield().expect("rt outranks low");
    assert_eq!(k.current_pid(), rt);
    ticks(&mut k, 20);
    assert_eq!(cpu_ticks(&k, rt), 20);
    assert_eq!(k.stats().policy, Policy::Priority);
}

#[test]
fn ready_count_leaves_out_the_parked_idle_process() {
    let mut k = boot(KernelConfig::default());
    let a = spawn(&mut k, "a", Priority::Normal);
    assert_eq!(k.stats().ready_count, 1);

    k.start().expect("a runs");
    assert_eq!(k.stats().ready_count, 0);

    let b = spawn(&mut k, "b", Priority::Normal);
    assert_eq!(k.stats().ready_count, 1);
    let ready: Vec<Pid> = k
        .table()
        .with_state(ProcessState::Ready)
        .map(Pcb::pid)
        .collect();
    assert_eq!(ready, vec![b]);

    k.block(a).unwrap().expect("b takes over");
    k.block(b).unwrap().expect("idle takes over");
    let stats = k.stats();
    assert_eq!(stats.current_pid, Pid::IDLE);
    assert_eq!(stats.ready_count, 0);
}
