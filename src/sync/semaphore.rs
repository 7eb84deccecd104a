//! Counting semaphores.
//!
//! The value never drops below zero: a waiter that finds it zero parks on
//! the wait queue until a post wakes it, then re-checks, since another
//! thread may have consumed the posted unit first. On a timed wait the wakeup is
//! authoritative: a waiter woken by a post claims the unit even if the
//! deadline has meanwhile passed, and only reports a timeout when there is
//! nothing to claim.

use crate::error::{Result, SprigError};
use crate::sched::{self, timer};
use crate::sync::wait_queue::WaitQueue;
use crate::time;
use core::cell::UnsafeCell;

struct SemInner {
    initialized: bool,
    value: u32,
    waiters: Option<Box<WaitQueue>>,
}

/// A counting semaphore for user threads.
pub struct Semaphore {
    inner: UnsafeCell<SemInner>,
}

// Shared across user threads, which all run on the single runtime thread;
// every access happens inside a critical section.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Create a semaphore with the given initial value. Usable in statics;
    /// the wait queue is allocated on first use.
    pub const fn new(value: u32) -> Self {
        Self {
            inner: UnsafeCell::new(SemInner {
                initialized: false,
                value,
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
        let s = self.inner.get();
        let result = unsafe {
            if (*s).initialized {
                Err(SprigError::InvalidArgument)
            } else {
                ensure_init(s);
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// Decrement the value, blocking while it is zero.
    ///
    /// # Errors
    ///
    /// [`SprigError::InvalidArgument`] if the runtime is not initialized.
    pub fn wait(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        unsafe {
            let rt = sched::runtime();
            let s = self.inner.get();
            ensure_init(s);
            loop {
                if (*s).value > 0 {
                    (*s).value -= 1;
                    break;
                }
                let wq = (*s).waiters.as_mut().unwrap().as_mut() as *mut WaitQueue;
                sched::block(rt, wq);
                // Re-check: the posted unit may already be gone.
            }
        }
        timer::critical_leave();
        Ok(())
    }

    /// Decrement the value without blocking.
    ///
    /// # Errors
    ///
    /// [`SprigError::WouldBlock`] if the value is zero;
    /// [`SprigError::InvalidArgument`] if the runtime is not initialized.
    pub fn try_wait(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let s = self.inner.get();
        let result = unsafe {
            ensure_init(s);
            if (*s).value > 0 {
                (*s).value -= 1;
                Ok(())
            } else {
                Err(SprigError::WouldBlock)
            }
        };
        timer::critical_leave();
        result
    }

    /// As [`Semaphore::wait`], bounded by an absolute monotonic deadline
    /// in nanoseconds.
    ///
    /// Deadlines are checked at resume points. A waiter woken by a post
    /// always claims the unit, even if the deadline passed while it was
    /// being woken; the timeout is reported only when nothing is
    /// claimable.
    ///
    /// # Errors
    ///
    /// [`SprigError::TimedOut`] once the deadline has passed;
    /// [`SprigError::InvalidArgument`] if the runtime is not initialized.
    pub fn timedwait(&self, deadline_ns: u64) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe {
            let rt = sched::runtime();
            let s = self.inner.get();
            ensure_init(s);
            loop {
                // The wakeup is authoritative: check the value before the
                // deadline.
                if (*s).value > 0 {
                    (*s).value -= 1;
                    break Ok(());
                }
                if time::monotonic_ns() >= deadline_ns {
                    break Err(SprigError::TimedOut);
                }
                let wq = (*s).waiters.as_mut().unwrap().as_mut() as *mut WaitQueue;
                sched::block(rt, wq);
                debug_assert!((*rt.current).blocked_queue.is_null());
            }
        };
        timer::critical_leave();
        result
    }

    /// Increment the value and wake the longest waiter, if any.
    ///
    /// # Errors
    ///
    /// [`SprigError::InvalidArgument`] if the runtime is not initialized.
    pub fn post(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        unsafe {
            let rt = sched::runtime();
            let s = self.inner.get();
            ensure_init(s);
            (*s).value = (*s).value.saturating_add(1);
            if let Some(w) = (*s).waiters.as_mut() {
                w.wake_one(rt);
            }
        }
        timer::critical_leave();
        Ok(())
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> u32 {
        timer::critical_enter();
        let v = unsafe { (*self.inner.get()).value };
        timer::critical_leave();
        v
    }

    /// Destroy the semaphore.
    ///
    /// # Errors
    ///
    /// [`SprigError::Busy`] with waiters queued;
    /// [`SprigError::InvalidArgument`] if not initialized (including a
    /// second destroy).
    pub fn destroy(&self) -> Result<()> {
        timer::critical_enter();
        let s = self.inner.get();
        let result = unsafe {
            if !(*s).initialized {
                Err(SprigError::InvalidArgument)
            } else if (*s).waiters.as_ref().is_some_and(|w| !w.is_empty()) {
                Err(SprigError::Busy)
            } else {
                (*s).waiters = None;
                (*s).initialized = false;
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }
}

unsafe fn ensure_init(s: *mut SemInner) {
    if !(*s).initialized {
        (*s).waiters = Some(Box::new(WaitQueue::new()));
        (*s).initialized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_destroy_lifecycle() {
        let s = Semaphore::new(3);
        assert!(s.init().is_ok());
        assert_eq!(s.init(), Err(SprigError::InvalidArgument));
        assert!(s.destroy().is_ok());
        assert_eq!(s.destroy(), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn value_snapshot() {
        let s = Semaphore::new(7);
        assert_eq!(s.value(), 7);
    }

    #[test]
    fn waits_require_runtime() {
        let s = Semaphore::new(1);
        assert_eq!(s.wait(), Err(SprigError::InvalidArgument));
        assert_eq!(s.try_wait(), Err(SprigError::InvalidArgument));
        assert_eq!(s.post(), Err(SprigError::InvalidArgument));
    }
}
