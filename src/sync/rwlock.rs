//! Read-write locks, writer-preferring.
//!
//! Any number of readers may hold the lock together; a writer holds it
//! alone. Arriving writers raise a pending count that stops new readers
//! from entering, so a stream of readers cannot starve a writer. The
//! trade-off is accepted reader starvation under continuous writer
//! arrival.
//!
//! Readers and writers park on separate queues. A releasing writer hands
//! the lock to the next writer if one waits, otherwise wakes every reader;
//! the last leaving reader wakes one writer.

use crate::error::{Result, SprigError};
use crate::sched::{self, timer};
use crate::sync::wait_queue::WaitQueue;
use crate::tcb::Tcb;
use core::cell::UnsafeCell;
use core::ptr;

struct RwInner {
    initialized: bool,
    readers: u32,
    writer: bool,
    writer_owner: *mut Tcb,
    /// Writers blocked or about to block; positive keeps new readers out.
    pending_writers: u32,
    read_waiters: Option<Box<WaitQueue>>,
    write_waiters: Option<Box<WaitQueue>>,
}

/// A writer-preferring read-write lock for user threads.
pub struct RwLock {
    inner: UnsafeCell<RwInner>,
}

// Shared across user threads, which all run on the single runtime thread;
// every access happens inside a critical section.
unsafe impl Send for RwLock {}
unsafe impl Sync for RwLock {}

impl RwLock {
    /// Create a read-write lock. Usable in statics; wait queues are
    /// allocated on first use.
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(RwInner {
                initialized: false,
                readers: 0,
                writer: false,
                writer_owner: ptr::null_mut(),
                pending_writers: 0,
                read_waiters: None,
                write_waiters: None,
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
        let l = self.inner.get();
        let result = unsafe {
            if (*l).initialized {
                Err(SprigError::InvalidArgument)
            } else {
                ensure_init(l);
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// Acquire in read mode, blocking while a writer holds the lock or
    /// writers are waiting.
    pub fn read_lock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        unsafe {
            let rt = sched::runtime();
            let l = self.inner.get();
            ensure_init(l);
            while (*l).writer || (*l).pending_writers > 0 {
                let wq = (*l).read_waiters.as_mut().unwrap().as_mut() as *mut WaitQueue;
                sched::block(rt, wq);
            }
            (*l).readers += 1;
        }
        timer::critical_leave();
        Ok(())
    }

    /// Acquire in read mode without blocking.
    ///
    /// # Errors
    ///
    /// [`SprigError::Busy`] while a writer holds the lock or is pending.
    pub fn try_read_lock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let l = self.inner.get();
        let result = unsafe {
            ensure_init(l);
            if (*l).writer || (*l).pending_writers > 0 {
                Err(SprigError::Busy)
            } else {
                (*l).readers += 1;
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// Acquire in write mode, blocking while readers or another writer
    /// hold the lock. Registers as pending on entry so new readers queue
    /// behind it.
    pub fn write_lock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        unsafe {
            let rt = sched::runtime();
            let l = self.inner.get();
            ensure_init(l);
            (*l).pending_writers += 1;
            while (*l).readers > 0 || (*l).writer {
                let wq = (*l).write_waiters.as_mut().unwrap().as_mut() as *mut WaitQueue;
                sched::block(rt, wq);
            }
            (*l).pending_writers -= 1;
            (*l).writer = true;
            (*l).writer_owner = rt.current;
        }
        timer::critical_leave();
        Ok(())
    }

    /// Acquire in write mode without blocking.
    ///
    /// # Errors
    ///
    /// [`SprigError::Busy`] while any holder exists.
    pub fn try_write_lock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe {
            let rt = sched::runtime();
            let l = self.inner.get();
            ensure_init(l);
            if (*l).readers > 0 || (*l).writer {
                Err(SprigError::Busy)
            } else {
                (*l).writer = true;
                (*l).writer_owner = rt.current;
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }

    /// Release the caller's hold, in whichever mode it is held.
    ///
    /// # Errors
    ///
    /// [`SprigError::Permission`] if the caller holds neither mode (for
    /// the write mode, ownership is checked; for the read mode, a
    /// non-zero reader count is trusted);
    /// [`SprigError::InvalidArgument`] if never initialized.
    pub fn unlock(&self) -> Result<()> {
        if !sched::is_initialized() {
            return Err(SprigError::InvalidArgument);
        }
        timer::critical_enter();
        let result = unsafe {
            let rt = sched::runtime();
            let l = self.inner.get();
            if !(*l).initialized {
                Err(SprigError::InvalidArgument)
            } else if (*l).writer {
                if (*l).writer_owner != rt.current {
                    Err(SprigError::Permission)
                } else {
                    (*l).writer = false;
                    (*l).writer_owner = ptr::null_mut();
                    // Writer preference: next writer first, otherwise the
                    // whole reader cohort.
                    let write_waiters = (*l).write_waiters.as_mut().unwrap();
                    if !write_waiters.is_empty() {
                        write_waiters.wake_one(rt);
                    } else if let Some(read_waiters) = (*l).read_waiters.as_mut() {
                        read_waiters.wake_all(rt);
                    }
                    Ok(())
                }
            } else if (*l).readers > 0 {
                (*l).readers -= 1;
                if (*l).readers == 0 {
                    if let Some(write_waiters) = (*l).write_waiters.as_mut() {
                        write_waiters.wake_one(rt);
                    }
                }
                Ok(())
            } else {
                Err(SprigError::Permission)
            }
        };
        timer::critical_leave();
        result
    }

    /// Destroy the lock.
    ///
    /// # Errors
    ///
    /// [`SprigError::Busy`] while held or waited on;
    /// [`SprigError::InvalidArgument`] if not initialized (including a
    /// second destroy).
    pub fn destroy(&self) -> Result<()> {
        timer::critical_enter();
        let l = self.inner.get();
        let result = unsafe {
            let queued = (*l).read_waiters.as_ref().is_some_and(|w| !w.is_empty())
                || (*l).write_waiters.as_ref().is_some_and(|w| !w.is_empty());
            if !(*l).initialized {
                Err(SprigError::InvalidArgument)
            } else if (*l).readers > 0 || (*l).writer || queued {
                Err(SprigError::Busy)
            } else {
                (*l).read_waiters = None;
                (*l).write_waiters = None;
                (*l).initialized = false;
                Ok(())
            }
        };
        timer::critical_leave();
        result
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn ensure_init(l: *mut RwInner) {
    if !(*l).initialized {
        (*l).read_waiters = Some(Box::new(WaitQueue::new()));
        (*l).write_waiters = Some(Box::new(WaitQueue::new()));
        (*l).initialized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_destroy_lifecycle() {
        let l = RwLock::new();
        assert!(l.init().is_ok());
        assert_eq!(l.init(), Err(SprigError::InvalidArgument));
        assert!(l.destroy().is_ok());
        assert_eq!(l.destroy(), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn locks_require_runtime() {
        let l = RwLock::new();
        assert_eq!(l.read_lock(), Err(SprigError::InvalidArgument));
        assert_eq!(l.write_lock(), Err(SprigError::InvalidArgument));
        assert_eq!(l.unlock(), Err(SprigError::InvalidArgument));
    }
}
