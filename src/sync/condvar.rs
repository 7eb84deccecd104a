//! Condition variables.
//!
//! A waiter atomically parks itself on the condition's queue and releases
//! the associated mutex; signal wakes the longest waiter, broadcast wakes
//! everyone. A woken thread re-acquires the mutex through the ordinary
//! claim protocol and may be overtaken by a concurrent locker, and wakeups
//! may be spurious; callers must loop over their predicate.
//!
//! The signal sequence counter is purely observational (diagnostics); it
//! plays no part in correctness.

use crate::error::{Result, SprigError};
use crate::sched::{self, timer};
use crate::sync::mutex::Mutex;
use crate::sync::wait_queue::WaitQueue;
use crate::tcb::ThreadState;
use crate::time;
use core::cell::UnsafeCell;

struct CondvarInner {
    initialized: bool,
    /// Count of signal/broadcast calls; advances even with no waiters.
    signal_seq: u64,
    waiters: Option<Box<WaitQueue>>,
}

/// A condition variable for use with [`Mutex`].
pub struct Condvar {
    inner: UnsafeCell<CondvarInner>,
}

// Shared across user threads, which all run on the single runtime thread;
// every access happens inside a critical section.
unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    /// Create a condition variable. Usable in statics; the wait queue is
    /// allocated on first use.
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(CondvarInner {
                initialized: false,
                signal_seq: 0,
                waiters: None,
            }),
        }
    }

    /// Explicitly initialize.
    ///
    /// # Errors
    ///
    /// [`SprigError::InvalidArgument`] if already initialized.
    pub fn init(&self) -> Result<()> {
        timer::critical_enter();
        let c = self.inner.get();
        let result = unsafe {
            if (*c).initialized {
                Err(SprigError::InvalidArgument)
            } else {
                ensure_init(c);
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// Release `mutex` and block until signaled; re-acquires `mutex`
    /// before returning. Wakeups may be spurious.
    ///
    /// # Errors
    ///
    /// [`SprigError::Permission`] if the caller does not own `mutex`;
    /// [`SprigError::InvalidArgument`] if the runtime is not initialized.
    pub fn wait(&self, mutex: &Mutex) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe {
            let rt = sched::runtime();
            let c = self.inner.get();
            ensure_init(c);
            let me = rt.current;
            let m = mutex.raw();

            if !(*m).initialized || !(*m).locked || (*m).owner != me {
                Err(SprigError::Permission)
            } else {
                // Park on the condition and hand the mutex over in one
                // critical section, so no signal can slip between.
                let wq = (*c).waiters.as_mut().unwrap().as_mut() as *mut WaitQueue;
                (*me).state = ThreadState::Blocked;
                (*wq).add(me);
                mutex.release_ownership(rt);
                sched::schedule(rt);

                // Woken (or spuriously resumed): take the mutex back.
                mutex.reacquire(rt);
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// As [`Condvar::wait`], bounded by an absolute monotonic deadline in
    /// nanoseconds (see [`crate::time::deadline_after_ms`]).
    ///
    /// Deadlines are checked at resume points: on entry (a past deadline
    /// fails promptly without releasing the mutex's protection window) and
    /// after each wakeup. The mutex is held again whenever this returns.
    ///
    /// # Errors
    ///
    /// [`SprigError::TimedOut`] once the deadline has passed; permission
    /// and initialization errors as for [`Condvar::wait`].
    pub fn timedwait(&self, mutex: &Mutex, deadline_ns: u64) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe {
            let rt = sched::runtime();
            let c = self.inner.get();
            ensure_init(c);
            let me = rt.current;
            let m = mutex.raw();

            if !(*m).initialized || !(*m).locked || (*m).owner != me {
                Err(SprigError::Permission)
            } else if time::monotonic_ns() >= deadline_ns {
                Err(SprigError::TimedOut)
            } else {
                let wq = (*c).waiters.as_mut().unwrap().as_mut() as *mut WaitQueue;
                (*me).state = ThreadState::Blocked;
                (*wq).add(me);
                mutex.release_ownership(rt);
                sched::schedule(rt);

                // If the wakeup raced the deadline, the timeout wins; the
                // spurious-wakeup contract lets the caller treat a
                // swallowed signal like any other spurious event.
                let timed_out = time::monotonic_ns() >= deadline_ns;
                if (*wq).contains(me) {
                    (*wq).remove_specific(me);
                }
                mutex.reacquire(rt);
                if timed_out {
                    Err(SprigError::TimedOut)
                } else {
                    Ok(())
                }
            }
        };
        timer::critical_leave();
        result
    }

    /// Wake the longest-waiting thread, if any.
    pub fn signal(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        unsafe {
            let rt = sched::runtime();
            let c = self.inner.get();
            ensure_init(c);
            (*c).signal_seq += 1;
            if let Some(w) = (*c).waiters.as_mut() {
                w.wake_one(rt);
            }
        }
        timer::critical_leave();
        Ok(())
    }

    /// Wake every waiting thread in FIFO order.
    pub fn broadcast(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        unsafe {
            let rt = sched::runtime();
            let c = self.inner.get();
            ensure_init(c);
            (*c).signal_seq += 1;
            if let Some(w) = (*c).waiters.as_mut() {
                w.wake_all(rt);
            }
        }
        timer::critical_leave();
        Ok(())
    }

    /// Number of signal/broadcast calls so far. Observational only.
    pub fn sequence(&self) -> u64 {
        timer::critical_enter();
        let seq = unsafe { (*self.inner.get()).signal_seq };
        timer::critical_leave();
        seq
    }

    /// Destroy the condition variable.
    ///
    /// # Errors
    ///
    /// [`SprigError::Busy`] with waiters queued;
    /// [`SprigError::InvalidArgument`] if not initialized (including a
    /// second destroy).
    pub fn destroy(&self) -> Result<()> {
        timer::critical_enter();
        let c = self.inner.get();
        let result = unsafe {
            if !(*c).initialized {
                Err(SprigError::InvalidArgument)
            } else if (*c).waiters.as_ref().is_some_and(|w| !w.is_empty()) {
                Err(SprigError::Busy)
            } else {
                (*c).waiters = None;
                (*c).initialized = false;
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn ensure_init(c: *mut CondvarInner) {
    if !(*c).initialized {
        (*c).waiters = Some(Box::new(WaitQueue::new()));
        (*c).initialized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::mutex::MutexKind;

    #[test]
    fn double_init_is_invalid() {
        let c = Condvar::new();
        assert!(c.init().is_ok());
        assert_eq!(c.init(), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn destroy_lifecycle() {
        let c = Condvar::new();
        c.init().unwrap();
        assert!(c.destroy().is_ok());
        assert_eq!(c.destroy(), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn wait_requires_runtime() {
        let c = Condvar::new();
        let m = Mutex::new(MutexKind::Normal);
        assert_eq!(c.wait(&m), Err(SprigError::InvalidArgument));
    }
}
