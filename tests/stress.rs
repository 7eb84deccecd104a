//! Stress: rapid lifecycle churn and heavy mutex contention.

mod common;

use sprig::sync::{Mutex, MutexKind};
use sprig::{self as rt, SchedPolicy};
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

#[test]
fn hundred_short_lived_threads() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    for i in 0..100 {
        let h = rt::thread::spawn(move || {
            rt::thread::yield_now();
            i * 2
        })
        .unwrap();
        assert_eq!(rt::thread::join(h).unwrap(), i * 2);
    }
    let stats = rt::stats().unwrap();
    assert_eq!(stats.active_threads, 1);
    assert_eq!(stats.total_threads_created, 101);
    rt::shutdown();
}

#[test]
fn mutex_increment_storm() {
    static M: Mutex = Mutex::new(MutexKind::Normal);
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.store(0, SeqCst);

    let _g = common::setup(SchedPolicy::RoundRobin);
    let workers: Vec<_> = (0..10)
        .map(|_| {
            rt::thread::spawn(|| {
                for i in 0..1000 {
                    M.lock().unwrap();
                    COUNTER.fetch_add(1, SeqCst);
                    M.unlock().unwrap();
                    // Force interleaving without yielding on every pass.
                    if i % 100 == 0 {
                        rt::thread::yield_now();
                    }
                }
                0
            })
            .unwrap()
        })
        .collect();

    for w in workers {
        rt::thread::join(w).unwrap();
    }
    assert_eq!(COUNTER.load(SeqCst), 10_000);
    M.destroy().unwrap();
    rt::shutdown();
}

#[test]
fn join_burst_preserves_return_values() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    let handles: Vec<_> = (0..50)
        .map(|i: usize| {
            rt::thread::spawn(move || {
                rt::thread::yield_now();
                1000 + i
            })
            .unwrap()
        })
        .collect();

    for (i, h) in handles.into_iter().enumerate() {
        assert_eq!(rt::thread::join(h).unwrap(), 1000 + i);
    }
    rt::shutdown();
}

#[test]
fn repeated_init_shutdown_cycles() {
    let _g = common::setup(SchedPolicy::RoundRobin);
    rt::shutdown();
    for _ in 0..20 {
        rt::init(SchedPolicy::Fair).unwrap();
        let h = rt::thread::spawn(|| 1).unwrap();
        assert_eq!(rt::thread::join(h).unwrap(), 1);
        rt::shutdown();
    }
}
