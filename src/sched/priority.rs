//! Fixed-priority scheduling.
//!
//! 32 FIFO queues, one per priority level, plus a 32-bit occupancy bitmap
//! for O(1) highest-level lookup: bit `i` is set iff queue `i` is
//! non-empty. Level 31 is the highest priority. Within a level threads run
//! in arrival order with time slicing; a higher level becoming non-empty
//! preempts the running thread at the next tick.

use super::policy::Policy;
use crate::config::{PRIORITY_LEVELS, PRIORITY_MAX};
use crate::tcb::Tcb;
use core::ptr;
use std::collections::VecDeque;

pub(crate) struct PriorityQueues {
    queues: [VecDeque<*mut Tcb>; PRIORITY_LEVELS],
    bitmap: u32,
    count: usize,
    timeslice_ns: u64,
}

impl PriorityQueues {
    pub fn new(timeslice_ns: u64) -> Self {
        Self {
            // Seed each level so preemption enqueues from the timer signal
            // path do not grow the buffer in the common case.
            queues: core::array::from_fn(|_| VecDeque::with_capacity(64)),
            bitmap: 0,
            count: 0,
            timeslice_ns,
        }
    }

    #[inline]
    fn clamp_level(priority: u8) -> usize {
        priority.min(PRIORITY_MAX) as usize
    }

    /// Highest non-empty level, or `None` if all queues are empty.
    #[inline]
    fn highest_level(&self) -> Option<usize> {
        if self.bitmap == 0 {
            None
        } else {
            Some(31 - self.bitmap.leading_zeros() as usize)
        }
    }

    fn push_level(&mut self, level: usize, t: *mut Tcb) {
        self.queues[level].push_back(t);
        self.bitmap |= 1 << level;
    }

    fn unlink(&mut self, level: usize, t: *mut Tcb) -> bool {
        if let Some(pos) = self.queues[level].iter().position(|&p| p == t) {
            let _ = self.queues[level].remove(pos);
            if self.queues[level].is_empty() {
                self.bitmap &= !(1 << level);
            }
            true
        } else {
            false
        }
    }

    /// Locate `t` in whichever level currently holds it. Threads can sit in
    /// a stale level after a priority change, so fall back to a full scan.
    fn find_level(&self, t: *mut Tcb, hint: usize) -> Option<usize> {
        if self.queues[hint].iter().any(|&p| p == t) {
            return Some(hint);
        }
        (0..PRIORITY_LEVELS).find(|&l| l != hint && self.queues[l].iter().any(|&p| p == t))
    }
}

impl Policy for PriorityQueues {
    unsafe fn enqueue(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        let level = Self::clamp_level((*t).priority);
        (*t).timeslice_remaining = self.timeslice_ns;
        self.push_level(level, t);
        self.count += 1;
    }

    unsafe fn dequeue(&mut self) -> *mut Tcb {
        let Some(level) = self.highest_level() else {
            return ptr::null_mut();
        };
        let t = self.queues[level].pop_front().unwrap_or(ptr::null_mut());
        if self.queues[level].is_empty() {
            self.bitmap &= !(1 << level);
        }
        if !t.is_null() {
            self.count -= 1;
        }
        t
    }

    unsafe fn remove(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        let hint = Self::clamp_level((*t).priority);
        if let Some(level) = self.find_level(t, hint) {
            self.unlink(level, t);
            self.count -= 1;
        }
    }

    unsafe fn on_yield(&mut self, _t: *mut Tcb) {
        // The yielding thread rejoins the tail of its level on re-enqueue.
    }

    unsafe fn on_tick(&mut self, t: *mut Tcb, elapsed_ns: u64) {
        if t.is_null() {
            return;
        }
        (*t).timeslice_remaining = (*t).timeslice_remaining.saturating_sub(elapsed_ns);
    }

    unsafe fn should_preempt(&mut self, current: *mut Tcb) -> bool {
        if current.is_null() {
            return false;
        }
        let level = Self::clamp_level((*current).priority);
        // A strictly higher level is occupied.
        if level < PRIORITY_LEVELS - 1 && (self.bitmap >> (level + 1)) != 0 {
            return true;
        }
        // Quantum exhausted and a peer is waiting at our level.
        (*current).timeslice_remaining == 0 && !self.queues[level].is_empty()
    }

    unsafe fn update_priority(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        // If queued, relocate to the tail of the new level. A running
        // thread is repositioned on its next enqueue.
        let new_level = Self::clamp_level((*t).priority);
        if let Some(level) = self.find_level(t, new_level) {
            self.unlink(level, t);
            self.push_level(new_level, t);
        }
    }

    fn set_timeslice(&mut self, ns: u64) {
        self.timeslice_ns = ns;
    }

    fn len(&self) -> usize {
        self.count
    }

    fn name(&self) -> &'static str {
        "priority"
    }
}
