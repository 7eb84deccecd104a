//! Blocking mutex with normal, recursive, and error-checking modes.
//!
//! Waiters park on a FIFO wait queue and are woken one at a time on
//! unlock. Ownership is tracked by TCB pointer; a recursive mutex counts
//! re-entries, an error-checking one reports self-deadlock and
//! foreign unlock instead of misbehaving silently.
//!
//! `Mutex::new` is `const`, so mutexes can be statics. The wait queue is
//! then allocated lazily inside the first locking operation's critical
//! section; this mirrors a static-initializer mutex healing itself on
//! first use, and is safe only because a single host thread runs all user
//! threads.

use crate::error::{Result, SprigError};
use crate::sched::{self, timer, Runtime};
use crate::sync::wait_queue::WaitQueue;
use crate::tcb::Tcb;
use core::cell::UnsafeCell;
use core::ptr;

/// Locking discipline of a [`Mutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutexKind {
    /// No ownership checks; re-locking by the owner deadlocks.
    #[default]
    Normal,
    /// The owner may re-lock; the mutex releases at the matching unlock.
    Recursive,
    /// Self-lock and foreign unlock are reported as errors.
    Errorcheck,
}

pub(crate) struct MutexInner {
    pub(crate) initialized: bool,
    pub(crate) kind: MutexKind,
    pub(crate) locked: bool,
    pub(crate) owner: *mut Tcb,
    pub(crate) recursion: u32,
    pub(crate) waiters: Option<Box<WaitQueue>>,
}

/// A blocking mutual-exclusion lock for user threads.
pub struct Mutex {
    inner: UnsafeCell<MutexInner>,
}

// Shared across user threads, which all run on the single runtime thread;
// every access happens inside a critical section.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Create a mutex of the given kind. Usable in statics; the wait queue
    /// is allocated on first use.
    pub const fn new(kind: MutexKind) -> Self {
        Self {
            inner: UnsafeCell::new(MutexInner {
                initialized: false,
                kind,
                locked: false,
                owner: ptr::null_mut(),
                recursion: 0,
                waiters: None,
            }),
        }
    }

    /// Explicitly initialize the mutex.
    ///
    /// # Errors
    ///
    /// [`SprigError::InvalidArgument`] if already initialized.
    pub fn init(&self) -> Result<()> {
        timer::critical_enter();
        let m = self.inner.get();
        let result = unsafe {
            if (*m).initialized {
                Err(SprigError::InvalidArgument)
            } else {
                ensure_init(m);
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// Acquire the mutex, blocking until it is free.
    ///
    /// # Errors
    ///
    /// [`SprigError::Deadlock`] when an error-checking mutex is re-locked
    /// by its owner; [`SprigError::InvalidArgument`] if the runtime is not
    /// initialized. A normal mutex re-locked by its owner blocks forever.
    pub fn lock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe { self.lock_locked() };
        timer::critical_leave();
        result
    }

    unsafe fn lock_locked(&self) -> Result<()> {
        let rt = sched::runtime();
        let m = self.inner.get();
        ensure_init(m);
        let me = rt.current;

        if (*m).locked && (*m).owner == me {
            match (*m).kind {
                MutexKind::Recursive => {
                    (*m).recursion += 1;
                    return Ok(());
                }
                MutexKind::Errorcheck => return Err(SprigError::Deadlock),
                // A normal mutex gives no self-lock protection: fall
                // through and park behind ourselves forever.
                MutexKind::Normal => {}
            }
        }

        while (*m).locked {
            sched::block(rt, waiters_ptr(m));
            // Woken by an unlock; another locker may have claimed the
            // mutex in between, so re-check.
        }
        (*m).locked = true;
        (*m).owner = me;
        (*m).recursion = 1;
        Ok(())
    }

    /// Acquire the mutex without blocking.
    ///
    /// # Errors
    ///
    /// [`SprigError::Busy`] if held by another thread (or by the caller,
    /// for non-recursive kinds); [`SprigError::InvalidArgument`] if the
    /// runtime is not initialized.
    pub fn try_lock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe {
            let rt = sched::runtime();
            let m = self.inner.get();
            ensure_init(m);
            let me = rt.current;

            if (*m).locked && (*m).owner == me && (*m).kind == MutexKind::Recursive {
                (*m).recursion += 1;
                Ok(())
            } else if (*m).locked {
                Err(SprigError::Busy)
            } else {
                (*m).locked = true;
                (*m).owner = me;
                (*m).recursion = 1;
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// Release the mutex, waking the longest-waiting locker if any.
    ///
    /// # Errors
    ///
    /// [`SprigError::Permission`] when an error-checking mutex is unlocked
    /// by a non-owner; [`SprigError::InvalidArgument`] if the mutex was
    /// never initialized or the runtime is down.
    pub fn unlock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe {
            let rt = sched::runtime();
            let m = self.inner.get();
            if !(*m).initialized {
                Err(SprigError::InvalidArgument)
            } else {
                let me = rt.current;
                if (*m).kind == MutexKind::Errorcheck && (*m).owner != me {
                    Err(SprigError::Permission)
                } else {
                    let mut release = true;
                    if (*m).kind == MutexKind::Recursive && (*m).owner == me {
                        (*m).recursion -= 1;
                        release = (*m).recursion == 0;
                    }
                    if release {
                        (*m).locked = false;
                        (*m).owner = ptr::null_mut();
                        (*m).recursion = 0;
                        if let Some(w) = (*m).waiters.as_mut() {
                            w.wake_one(rt);
                        }
                    }
                    Ok(())
                }
            }
        };
        timer::critical_leave();
        result
    }

    /// Destroy the mutex.
    ///
    /// # Errors
    ///
    /// [`SprigError::Busy`] if locked or waited on;
    /// [`SprigError::InvalidArgument`] if not initialized (including a
    /// second destroy).
    pub fn destroy(&self) -> Result<()> {
        timer::critical_enter();
        let m = self.inner.get();
        let result = unsafe {
            if !(*m).initialized {
                Err(SprigError::InvalidArgument)
            } else if (*m).locked {
                Err(SprigError::Busy)
            } else if (*m).waiters.as_ref().is_some_and(|w| !w.is_empty()) {
                Err(SprigError::Busy)
            } else {
                (*m).waiters = None;
                (*m).initialized = false;
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// The mutex's locking discipline.
    pub fn kind(&self) -> MutexKind {
        unsafe { (*self.inner.get()).kind }
    }

    // ---- condition-variable integration -------------------------------

    /// Raw access for the condition variable's atomic release/reacquire.
    pub(crate) fn raw(&self) -> *mut MutexInner {
        self.inner.get()
    }

    /// Drop ownership entirely and hand the mutex to one waiter, if any.
    ///
    /// # Safety
    ///
    /// Caller must hold the critical section and own the mutex.
    pub(crate) unsafe fn release_ownership(&self, rt: &mut Runtime) {
        let m = self.inner.get();
        (*m).locked = false;
        (*m).owner = ptr::null_mut();
        (*m).recursion = 0;
        if let Some(w) = (*m).waiters.as_mut() {
            w.wake_one(rt);
        }
    }

    /// Re-acquire through the ordinary claim protocol (the caller may be
    /// overtaken by a concurrent locker).
    ///
    /// # Safety
    ///
    /// Caller must hold the critical section.
    pub(crate) unsafe fn reacquire(&self, rt: &mut Runtime) {
        let m = self.inner.get();
        while (*m).locked {
            sched::block(rt, waiters_ptr(m));
        }
        (*m).locked = true;
        (*m).owner = rt.current;
        (*m).recursion = 1;
    }
}

/// Allocate the wait queue if this mutex was never explicitly initialized.
unsafe fn ensure_init(m: *mut MutexInner) {
    if !(*m).initialized {
        (*m).waiters = Some(Box::new(WaitQueue::new()));
        (*m).initialized = true;
    }
}

unsafe fn waiters_ptr(m: *mut MutexInner) -> *mut WaitQueue {
    (*m).waiters
        .as_mut()
        .expect("mutex wait queue missing after init")
        .as_mut() as *mut WaitQueue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_init_is_invalid() {
        let m = Mutex::new(MutexKind::Normal);
        assert!(m.init().is_ok());
        assert_eq!(m.init(), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn double_destroy_is_invalid() {
        let m = Mutex::new(MutexKind::Normal);
        m.init().unwrap();
        assert!(m.destroy().is_ok());
        assert_eq!(m.destroy(), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn destroy_without_init_is_invalid() {
        let m = Mutex::new(MutexKind::Normal);
        assert_eq!(m.destroy(), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn kind_is_preserved() {
        assert_eq!(Mutex::new(MutexKind::Recursive).kind(), MutexKind::Recursive);
        assert_eq!(Mutex::new(MutexKind::Normal).kind(), MutexKind::Normal);
    }

    #[test]
    fn lock_requires_runtime() {
        let m = Mutex::new(MutexKind::Normal);
        // Unit tests run without an initialized runtime.
        assert_eq!(m.lock(), Err(SprigError::InvalidArgument));
        assert_eq!(m.try_lock(), Err(SprigError::InvalidArgument));
        assert_eq!(m.unlock(), Err(SprigError::InvalidArgument));
    }
}
