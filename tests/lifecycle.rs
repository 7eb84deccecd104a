//! Thread lifecycle: init/shutdown, spawn/join/detach, attributes,
//! dynamic priority and nice changes, cleanup handlers, statistics.

mod common;

use common::Shared;
use sprig::{self as rt, SchedPolicy, SprigError, ThreadAttributes};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};

#[test]
fn init_shutdown_cycle() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    assert!(rt::is_initialized());
    assert_eq!(rt::current_policy().unwrap(), SchedPolicy::RoundRobin);
    rt::shutdown();
    assert!(!rt::is_initialized());
    assert_eq!(rt::current_policy(), Err(SprigError::InvalidArgument));
}

#[test]
fn double_init_is_invalid() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    assert_eq!(
        rt::init(SchedPolicy::Priority),
        Err(SprigError::InvalidArgument)
    );
    rt::shutdown();
}

#[test]
fn spawn_join_returns_value() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let h = rt::thread::spawn(|| 1234).unwrap();
    assert_eq!(rt::thread::join(h).unwrap(), 1234);
    rt::shutdown();
}

#[test]
fn join_self_is_deadlock() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let me = rt::thread::current().unwrap();
    assert_eq!(rt::thread::join(me), Err(SprigError::Deadlock));
    rt::shutdown();
}

#[test]
fn join_detached_is_invalid() {
    static DONE: AtomicBool = AtomicBool::new(false);
    DONE.store(false, SeqCst);

    let _g = common::setup(SchedPolicy::RoundRobin);
    // Deterministic ordering: the detached thread must not run (and be
    // reclaimed) before the join attempt below.
    rt::set_preemption(false).unwrap();
    let mut attr = ThreadAttributes::new();
    attr.set_detach_state(rt::DetachState::Detached);
    let h = rt::thread::spawn_with(&attr, || {
        DONE.store(true, SeqCst);
        0
    })
    .unwrap();
    assert_eq!(rt::thread::join(h), Err(SprigError::InvalidArgument));
    while !DONE.load(SeqCst) {
        rt::thread::yield_now();
    }
    rt::shutdown();
}

#[test]
fn join_stale_handle_is_no_such_thread() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let h = rt::thread::spawn(|| 7).unwrap();
    assert_eq!(rt::thread::join(h).unwrap(), 7);
    assert_eq!(rt::thread::join(h), Err(SprigError::NoSuchThread));
    rt::shutdown();
}

#[test]
fn detach_after_exit_reclaims() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let h = rt::thread::spawn(|| 9).unwrap();
    // Let it finish while still joinable.
    for _ in 0..10 {
        rt::thread::yield_now();
    }
    rt::thread::detach(h).unwrap();
    // The control block is gone: the handle is stale now.
    assert_eq!(rt::thread::detach(h), Err(SprigError::NoSuchThread));
    rt::shutdown();
}

#[test]
fn second_joiner_is_rejected() {
    static RELEASE: AtomicBool = AtomicBool::new(false);
    static JOINER_RESULT: AtomicUsize = AtomicUsize::new(0);
    RELEASE.store(false, SeqCst);
    JOINER_RESULT.store(0, SeqCst);

    let _g = common::setup(SchedPolicy::RoundRobin);
    // The race between the two joiners must resolve in program order.
    rt::set_preemption(false).unwrap();
    let target = rt::thread::spawn(|| {
        while !RELEASE.load(SeqCst) {
            rt::thread::yield_now();
        }
        77
    })
    .unwrap();
    let joiner = rt::thread::spawn(move || {
        JOINER_RESULT.store(rt::thread::join(target).unwrap(), SeqCst);
        0
    })
    .unwrap();

    // Let the joiner block on the target, then try to join it ourselves.
    rt::thread::yield_now();
    rt::thread::yield_now();
    assert_eq!(rt::thread::join(target), Err(SprigError::InvalidArgument));

    RELEASE.store(true, SeqCst);
    rt::thread::join(joiner).unwrap();
    assert_eq!(JOINER_RESULT.load(SeqCst), 77);
    rt::shutdown();
}

#[test]
fn names_and_tids() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let me = rt::thread::current().unwrap();
    assert_eq!(rt::thread::name(me).unwrap(), "main");
    assert_eq!(me.tid(), 1);

    let mut attr = ThreadAttributes::new();
    attr.set_name("worker");
    let h = rt::thread::spawn_with(&attr, || 0).unwrap();
    assert_eq!(rt::thread::name(h).unwrap(), "worker");
    assert!(h.tid() > me.tid());

    rt::thread::set_name(h, "renamed").unwrap();
    assert_eq!(rt::thread::name(h).unwrap(), "renamed");

    // Names are capped at 31 characters.
    rt::thread::set_name(h, &"x".repeat(100)).unwrap();
    assert_eq!(rt::thread::name(h).unwrap().chars().count(), 31);

    assert!(rt::thread::equal(me, rt::thread::current().unwrap()));
    assert!(!rt::thread::equal(me, h));

    rt::thread::join(h).unwrap();
    rt::shutdown();
}

#[test]
fn dynamic_priority_and_nice() {
    let _g = common::setup(SchedPolicy::Priority);
    let h = rt::thread::spawn(|| 0).unwrap();

    rt::thread::set_priority(h, 31).unwrap();
    assert_eq!(rt::thread::priority(h).unwrap(), 31);
    assert_eq!(
        rt::thread::set_priority(h, 32),
        Err(SprigError::InvalidArgument)
    );

    rt::thread::set_nice(h, -20).unwrap();
    assert_eq!(rt::thread::nice(h).unwrap(), -20);
    assert_eq!(
        rt::thread::set_nice(h, 20),
        Err(SprigError::InvalidArgument)
    );
    assert_eq!(
        rt::thread::set_nice(h, -21),
        Err(SprigError::InvalidArgument)
    );

    rt::thread::join(h).unwrap();
    assert_eq!(
        rt::thread::priority(h),
        Err(SprigError::NoSuchThread)
    );
    rt::shutdown();
}

#[test]
fn cleanup_handlers_run_lifo() {
    static ORDER: Shared<Vec<u32>> = Shared::new(Vec::new());
    unsafe { ORDER.get().clear() };

    let _g = common::setup(SchedPolicy::RoundRobin);
    let h = rt::thread::spawn(|| {
        rt::thread::cleanup_push(|| unsafe { ORDER.get().push(1) }).unwrap();
        rt::thread::cleanup_push(|| unsafe { ORDER.get().push(2) }).unwrap();
        rt::thread::cleanup_push(|| unsafe { ORDER.get().push(3) }).unwrap();
        // Popped without executing: never recorded.
        assert!(rt::thread::cleanup_pop(false));
        0
    })
    .unwrap();
    rt::thread::join(h).unwrap();
    assert_eq!(unsafe { ORDER.get().clone() }, vec![2, 1]);
    rt::shutdown();
}

#[test]
fn cleanup_pop_executes_immediately() {
    static RAN: AtomicBool = AtomicBool::new(false);
    RAN.store(false, SeqCst);

    let _g = common::setup(SchedPolicy::RoundRobin);
    let h = rt::thread::spawn(|| {
        rt::thread::cleanup_push(|| RAN.store(true, SeqCst)).unwrap();
        assert!(rt::thread::cleanup_pop(true));
        assert!(RAN.load(SeqCst));
        assert!(!rt::thread::cleanup_pop(true));
        0
    })
    .unwrap();
    rt::thread::join(h).unwrap();
    rt::shutdown();
}

#[test]
fn thread_table_capacity_is_enforced() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let mut attr = ThreadAttributes::new();
    attr.set_stack_size(sprig::config::STACK_MIN).unwrap();

    let mut spawned = Vec::new();
    loop {
        match rt::thread::spawn_with(&attr, || 0) {
            Ok(h) => spawned.push(h),
            Err(e) => {
                assert_eq!(e, SprigError::OutOfMemory);
                break;
            }
        }
    }
    // Main occupies one slot of the table.
    assert_eq!(spawned.len(), sprig::config::MAX_THREADS - 1);
    rt::shutdown();
}

#[test]
fn timeslice_bounds() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    assert_eq!(rt::set_timeslice(999_999), Err(SprigError::InvalidArgument));
    rt::set_timeslice(1_000_000).unwrap();
    assert_eq!(rt::timeslice().unwrap(), 1_000_000);
    rt::set_timeslice(20_000_000).unwrap();
    assert_eq!(rt::timeslice().unwrap(), 20_000_000);
    rt::shutdown();
}

#[test]
fn preemption_toggle_reports_previous() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    assert_eq!(rt::set_preemption(false).unwrap(), true);
    assert_eq!(rt::set_preemption(false).unwrap(), false);
    assert_eq!(rt::set_preemption(true).unwrap(), false);
    rt::shutdown();
}

#[test]
fn sleep_advances_monotonic_time() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let before = sprig::time::monotonic_ns();
    rt::thread::sleep_ms(5);
    assert!(sprig::time::monotonic_ns() - before >= 5_000_000);
    rt::shutdown();
}

#[test]
fn stats_track_lifecycle() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let base = rt::stats().unwrap();
    assert_eq!(base.active_threads, 1);

    let h = rt::thread::spawn(|| {
        rt::thread::yield_now();
        0
    })
    .unwrap();
    rt::thread::join(h).unwrap();

    let after = rt::stats().unwrap();
    assert_eq!(after.total_threads_created, base.total_threads_created + 1);
    assert_eq!(after.active_threads, 1);
    assert!(after.context_switches > base.context_switches);
    assert!(after.scheduler_invocations > base.scheduler_invocations);

    rt::reset_stats().unwrap();
    let reset = rt::stats().unwrap();
    assert_eq!(reset.context_switches, 0);
    assert_eq!(reset.scheduler_invocations, 0);
    rt::shutdown();
}

#[test]
fn debug_dump_mentions_threads() {
    let _g = common::setup(SchedPolicy::Fair);
    let mut attr = ThreadAttributes::new();
    attr.set_name("dumpee");
    let h = rt::thread::spawn_with(&attr, || {
        rt::thread::sleep_ms(1);
        0
    })
    .unwrap();

    let dump = rt::debug_dump().unwrap();
    assert!(dump.contains("fair"));
    assert!(dump.contains("main"));
    assert!(dump.contains("dumpee"));

    rt::thread::join(h).unwrap();
    rt::shutdown();
}

#[test]
fn operations_without_init_fail_cleanly() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    rt::shutdown();

    assert_eq!(rt::thread::spawn(|| 0).err(), Some(SprigError::InvalidArgument));
    assert_eq!(rt::thread::current().err(), Some(SprigError::InvalidArgument));
    assert_eq!(rt::stats().err(), Some(SprigError::InvalidArgument));
    assert_eq!(rt::timeslice().err(), Some(SprigError::InvalidArgument));
    // Yield is defined as a no-op.
    rt::thread::yield_now();
}
