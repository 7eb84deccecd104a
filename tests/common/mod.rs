//! Shared helpers for the integration tests.
//!
//! The runtime is a process-global singleton, so every test in a binary
//! serializes behind one lock and tears the runtime down when it finishes.
//! `setup` also recovers from a previous test that panicked mid-run.

#![allow(dead_code)]

use core::cell::UnsafeCell;
use std::sync::{Mutex, MutexGuard, PoisonError};

static LOCK: Mutex<()> = Mutex::new(());

/// Serialize the calling test and start a fresh runtime with `policy`.
/// Hold the returned guard for the duration of the test.
pub fn setup(policy: sprig::SchedPolicy) -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = env_logger::builder().is_test(true).try_init();
    if sprig::is_initialized() {
        sprig::shutdown();
    }
    sprig::init(policy).expect("runtime init failed");
    guard
}

/// Interior-mutable state shared between user threads.
///
/// Sound because all user threads run on the one host runtime thread; each
/// test guards multi-step access with the runtime's own primitives.
pub struct Shared<T>(UnsafeCell<T>);

unsafe impl<T> Sync for Shared<T> {}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// # Safety
    ///
    /// Callers must not hold two overlapping references; tests access the
    /// cell in short, serialized critical sections.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get(&self) -> &mut T {
        &mut *self.0.get()
    }
}
