//! Wait queues for blocking synchronization.
//!
//! A wait queue is a FIFO of threads blocked on one resource. Waking is
//! always in arrival order; no ordering is guaranteed across different
//! queues. While a thread is parked here its `blocked_queue` field points
//! back at the queue, which is what makes targeted removal (timeouts) and
//! membership checks cheap; the field is nulled on every removal path.
//!
//! Queues hold non-owning pointers. A thread must be unlinked before its
//! control block is destroyed.

use crate::sched::{self, Runtime};
use crate::tcb::Tcb;
use core::ptr;
use std::collections::VecDeque;

pub(crate) struct WaitQueue {
    queue: VecDeque<*mut Tcb>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append an already-blocked thread at the tail.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB that is not currently on any queue.
    pub unsafe fn add(&mut self, t: *mut Tcb) {
        debug_assert!(!t.is_null());
        debug_assert!((*t).blocked_queue.is_null());
        (*t).blocked_queue = self as *mut WaitQueue;
        self.queue.push_back(t);
    }

    /// Detach and return the head, or null if empty.
    ///
    /// # Safety
    ///
    /// Queue entries must be live TCBs.
    pub unsafe fn remove_head(&mut self) -> *mut Tcb {
        match self.queue.pop_front() {
            Some(t) => {
                (*t).blocked_queue = ptr::null_mut();
                t
            }
            None => ptr::null_mut(),
        }
    }

    /// Unlink `t` regardless of position. Returns `t`, or null if it is not
    /// on this queue.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB.
    pub unsafe fn remove_specific(&mut self, t: *mut Tcb) -> *mut Tcb {
        if t.is_null() || (*t).blocked_queue != self as *mut WaitQueue {
            return ptr::null_mut();
        }
        if let Some(pos) = self.queue.iter().position(|&p| p == t) {
            let _ = self.queue.remove(pos);
            (*t).blocked_queue = ptr::null_mut();
            t
        } else {
            ptr::null_mut()
        }
    }

    /// Whether `t` is currently parked on this queue.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB.
    #[inline]
    pub unsafe fn contains(&self, t: *mut Tcb) -> bool {
        !t.is_null() && (*t).blocked_queue == self as *const WaitQueue as *mut WaitQueue
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Wake the head waiter, if any. Returns whether a thread was woken.
    ///
    /// # Safety
    ///
    /// Must run inside a critical section with the runtime live.
    pub unsafe fn wake_one(&mut self, rt: &mut Runtime) -> bool {
        let t = self.remove_head();
        if t.is_null() {
            false
        } else {
            sched::unblock(rt, t);
            true
        }
    }

    /// Wake every waiter in FIFO order.
    ///
    /// # Safety
    ///
    /// As for [`WaitQueue::wake_one`].
    pub unsafe fn wake_all(&mut self, rt: &mut Runtime) {
        while self.wake_one(rt) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::Tcb;

    fn tcb(tid: usize) -> Box<Tcb> {
        Box::new(Tcb::new(tid, "t", 16, 0, false))
    }

    #[test]
    fn fifo_order() {
        let mut wq = WaitQueue::new();
        let mut a = tcb(1);
        let mut b = tcb(2);
        let mut c = tcb(3);
        unsafe {
            wq.add(a.as_mut());
            wq.add(b.as_mut());
            wq.add(c.as_mut());
            assert_eq!(wq.len(), 3);
            assert_eq!(wq.remove_head(), a.as_mut() as *mut Tcb);
            assert_eq!(wq.remove_head(), b.as_mut() as *mut Tcb);
            assert_eq!(wq.remove_head(), c.as_mut() as *mut Tcb);
            assert!(wq.remove_head().is_null());
        }
    }

    #[test]
    fn backref_tracks_membership() {
        let mut wq = WaitQueue::new();
        let mut a = tcb(1);
        unsafe {
            assert!(!wq.contains(a.as_mut()));
            wq.add(a.as_mut());
            assert!(wq.contains(a.as_mut()));
            let removed = wq.remove_head();
            assert_eq!(removed, a.as_mut() as *mut Tcb);
            assert!(a.blocked_queue.is_null());
        }
    }

    #[test]
    fn remove_specific_unlinks_middle() {
        let mut wq = WaitQueue::new();
        let mut a = tcb(1);
        let mut b = tcb(2);
        let mut c = tcb(3);
        unsafe {
            wq.add(a.as_mut());
            wq.add(b.as_mut());
            wq.add(c.as_mut());
            assert_eq!(wq.remove_specific(b.as_mut()), b.as_mut() as *mut Tcb);
            assert!(b.blocked_queue.is_null());
            assert_eq!(wq.len(), 2);
            // Order of the remaining entries is preserved.
            assert_eq!(wq.remove_head(), a.as_mut() as *mut Tcb);
            assert_eq!(wq.remove_head(), c.as_mut() as *mut Tcb);
        }
    }

    #[test]
    fn remove_specific_rejects_foreign_thread() {
        let mut wq = WaitQueue::new();
        let mut other = WaitQueue::new();
        let mut a = tcb(1);
        unsafe {
            other.add(a.as_mut());
            assert!(wq.remove_specific(a.as_mut()).is_null());
            assert!(other.contains(a.as_mut()));
        }
    }
}
