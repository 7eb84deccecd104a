//! Round-robin scheduling.
//!
//! A single FIFO queue with time slicing. Enqueue appends at the tail and
//! refills the thread's quantum; dequeue takes the head. Priority and nice
//! are ignored entirely.

use super::policy::Policy;
use crate::config::MAX_THREADS;
use crate::tcb::Tcb;
use core::ptr;
use std::collections::VecDeque;

pub(crate) struct RoundRobin {
    queue: VecDeque<*mut Tcb>,
    timeslice_ns: u64,
}

impl RoundRobin {
    pub fn new(timeslice_ns: u64) -> Self {
        Self {
            // Full capacity up front: preemption enqueues run from the
            // timer signal path and must not grow the buffer there.
            queue: VecDeque::with_capacity(MAX_THREADS),
            timeslice_ns,
        }
    }
}

impl Policy for RoundRobin {
    unsafe fn enqueue(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        (*t).timeslice_remaining = self.timeslice_ns;
        self.queue.push_back(t);
    }

    unsafe fn dequeue(&mut self) -> *mut Tcb {
        self.queue.pop_front().unwrap_or(ptr::null_mut())
    }

    unsafe fn remove(&mut self, t: *mut Tcb) {
        if let Some(pos) = self.queue.iter().position(|&p| p == t) {
            let _ = self.queue.remove(pos);
        }
    }

    unsafe fn on_yield(&mut self, _t: *mut Tcb) {
        // Nothing to account; the yielding thread goes to the tail on
        // re-enqueue.
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
        (*current).timeslice_remaining == 0 && !self.queue.is_empty()
    }

    unsafe fn update_priority(&mut self, _t: *mut Tcb) {
        // Round-robin ignores priority.
    }

    fn set_timeslice(&mut self, ns: u64) {
        self.timeslice_ns = ns;
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb(tid: usize) -> Box<Tcb> {
        Box::new(Tcb::new(tid, "t", 16, 0, false))
    }

    #[test]
    fn dequeues_in_fifo_order() {
        let mut rr = RoundRobin::new(10_000_000);
        let mut a = tcb(1);
        let mut b = tcb(2);
        unsafe {
            rr.enqueue(a.as_mut());
            rr.enqueue(b.as_mut());
            assert_eq!(rr.dequeue(), a.as_mut() as *mut Tcb);
            assert_eq!(rr.dequeue(), b.as_mut() as *mut Tcb);
            assert!(rr.dequeue().is_null());
        }
    }

    #[test]
    fn enqueue_refills_timeslice() {
        let mut rr = RoundRobin::new(5_000_000);
        let mut a = tcb(1);
        a.timeslice_remaining = 0;
        unsafe {
            rr.enqueue(a.as_mut());
        }
        assert_eq!(a.timeslice_remaining, 5_000_000);
    }

    #[test]
    fn tick_saturates_at_zero() {
        let mut rr = RoundRobin::new(1_000_000);
        let mut a = tcb(1);
        unsafe {
            rr.enqueue(a.as_mut());
            rr.dequeue();
            rr.on_tick(a.as_mut(), 600_000);
            assert_eq!(a.timeslice_remaining, 400_000);
            rr.on_tick(a.as_mut(), 600_000);
            assert_eq!(a.timeslice_remaining, 0);
        }
    }

    #[test]
    fn preempts_only_when_exhausted_and_contended() {
        let mut rr = RoundRobin::new(1_000_000);
        let mut a = tcb(1);
        let mut b = tcb(2);
        unsafe {
            rr.enqueue(a.as_mut());
            rr.enqueue(b.as_mut());
            let running = rr.dequeue();
            // Quantum not yet exhausted.
            assert!(!rr.should_preempt(running));
            rr.on_tick(running, 2_000_000);
            assert!(rr.should_preempt(running));
            // Exhausted but nobody else ready: keep running.
            rr.remove(b.as_mut());
            assert!(!rr.should_preempt(running));
        }
    }

    #[test]
    fn remove_extracts_from_middle() {
        let mut rr = RoundRobin::new(1_000_000);
        let mut a = tcb(1);
        let mut b = tcb(2);
        let mut c = tcb(3);
        unsafe {
            rr.enqueue(a.as_mut());
            rr.enqueue(b.as_mut());
            rr.enqueue(c.as_mut());
            rr.remove(b.as_mut());
            assert_eq!(rr.len(), 2);
            assert_eq!(rr.dequeue(), a.as_mut() as *mut Tcb);
            assert_eq!(rr.dequeue(), c.as_mut() as *mut Tcb);
        }
    }
}
