//! Virtual-runtime fair scheduling.
//!
//! Ready threads sit in an ordered tree keyed on virtual runtime; the
//! thread that has received the least weighted CPU time runs next. Virtual
//! runtime advances at `NICE_0_WEIGHT / weight` times real time, so a
//! heavier (lower-nice) thread accumulates it more slowly and receives a
//! proportionally larger share.
//!
//! The tree is a `BTreeMap` keyed by [`FairKey`]: vruntime first, then a
//! monotone insertion sequence number, which both totally orders equal
//! vruntimes and makes ties resolve to the right of existing entries. The
//! minimum key is cached so the common "who runs next" question is answered
//! without a tree descent. Each enqueued thread records its key in
//! `Tcb::fair_key`, which is what makes targeted removal O(log n).
//!
//! `min_vruntime` only moves forward, and is advanced to the cached
//! leftmost vruntime on every tick and dequeue (falling back to the running
//! thread's vruntime when the tree is empty). Newly ready threads are
//! lifted to at least `min_vruntime` so a thread that slept for a long time
//! cannot monopolize the CPU on wakeup.

use super::policy::Policy;
use crate::config::{
    nice_to_weight, FAIR_MIN_GRANULARITY_NS, FAIR_TARGET_LATENCY_NS, NICE_0_WEIGHT,
};
use crate::tcb::Tcb;
use crate::time;
use core::ptr;
use std::collections::BTreeMap;

/// Position of a thread in the fair run tree.
///
/// Ordering is by `vruntime`, then by insertion sequence, so threads with
/// identical vruntime run in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FairKey {
    pub vruntime: u64,
    pub seq: u64,
}

pub(crate) struct FairQueue {
    tree: BTreeMap<FairKey, *mut Tcb>,
    /// Cached minimum key; equals `tree.first_key_value()` at all quiescent
    /// points.
    leftmost: Option<FairKey>,
    min_vruntime: u64,
    next_seq: u64,
}

impl FairQueue {
    pub fn new() -> Self {
        Self {
            tree: BTreeMap::new(),
            leftmost: None,
            min_vruntime: 0,
            next_seq: 0,
        }
    }

    #[inline]
    fn refresh_leftmost(&mut self) {
        self.leftmost = self.tree.first_key_value().map(|(k, _)| *k);
    }

    /// Weighted vruntime delta for `elapsed_ns` of real time.
    #[inline]
    fn vruntime_delta(elapsed_ns: u64, weight: u32) -> u64 {
        elapsed_ns.saturating_mul(NICE_0_WEIGHT as u64) / weight.max(1) as u64
    }

    /// Timeslice proportional to the thread's share of total weight,
    /// floored at the minimum granularity. Total weight is approximated as
    /// `count * NICE_0_WEIGHT`.
    fn timeslice_for(&self, weight: u32) -> u64 {
        let total_weight = (self.tree.len() as u64) * NICE_0_WEIGHT as u64;
        let total_weight = if total_weight == 0 {
            weight as u64
        } else {
            total_weight
        };
        let slice = FAIR_TARGET_LATENCY_NS.saturating_mul(weight as u64) / total_weight;
        slice.max(FAIR_MIN_GRANULARITY_NS)
    }
}

impl Policy for FairQueue {
    unsafe fn enqueue(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        // A freshly created thread (vruntime 0) or one that fell behind
        // while blocked starts at the current minimum rather than its own
        // stale value.
        if (*t).vruntime == 0 || (*t).vruntime < self.min_vruntime {
            (*t).vruntime = self.min_vruntime;
        }
        let key = FairKey {
            vruntime: (*t).vruntime,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.tree.insert(key, t);
        (*t).fair_key = Some(key);
        match self.leftmost {
            Some(min) if min <= key => {}
            _ => self.leftmost = Some(key),
        }
        (*t).timeslice_remaining = self.timeslice_for((*t).weight);
    }

    unsafe fn dequeue(&mut self) -> *mut Tcb {
        let Some(key) = self.leftmost else {
            return ptr::null_mut();
        };
        let t = self.tree.remove(&key).unwrap_or(ptr::null_mut());
        self.refresh_leftmost();
        if !t.is_null() {
            (*t).fair_key = None;
        }
        // The dequeued thread held the minimum vruntime of all runnable
        // threads; min_vruntime only ever moves forward.
        self.min_vruntime = self.min_vruntime.max(key.vruntime);
        t
    }

    unsafe fn remove(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        if let Some(key) = (*t).fair_key.take() {
            self.tree.remove(&key);
            if self.leftmost == Some(key) {
                self.refresh_leftmost();
            }
        }
    }

    unsafe fn on_yield(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        // Charge the time consumed since the last switch, so a yielding
        // thread cannot dodge vruntime accounting.
        if (*t).start_time > 0 {
            let delta = time::monotonic_ns().saturating_sub((*t).start_time);
            (*t).vruntime += Self::vruntime_delta(delta, (*t).weight);
        }
    }

    unsafe fn on_tick(&mut self, t: *mut Tcb, elapsed_ns: u64) {
        if t.is_null() {
            return;
        }
        (*t).vruntime += Self::vruntime_delta(elapsed_ns, (*t).weight);
        let floor = match self.leftmost {
            Some(min) => min.vruntime,
            None => (*t).vruntime,
        };
        self.min_vruntime = self.min_vruntime.max(floor);
        (*t).timeslice_remaining = (*t).timeslice_remaining.saturating_sub(elapsed_ns);
    }

    unsafe fn should_preempt(&mut self, current: *mut Tcb) -> bool {
        if current.is_null() {
            return false;
        }
        if (*current).timeslice_remaining == 0 && !self.tree.is_empty() {
            return true;
        }
        // Preempt early if the leftmost waiter has fallen behind by more
        // than the granularity.
        if let Some(min) = self.leftmost {
            if (*current).vruntime > min.vruntime + FAIR_MIN_GRANULARITY_NS {
                return true;
            }
        }
        false
    }

    unsafe fn update_priority(&mut self, t: *mut Tcb) {
        if t.is_null() {
            return;
        }
        // Reweighting does not change vruntime, so tree position is
        // already correct.
        (*t).weight = nice_to_weight((*t).nice);
    }

    fn len(&self) -> usize {
        self.tree.len()
    }

    fn name(&self) -> &'static str {
        "fair"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb(tid: usize, nice: i8) -> Box<Tcb> {
        Box::new(Tcb::new(tid, "t", 16, nice, false))
    }

    #[test]
    fn lowest_vruntime_runs_first() {
        let mut fq = FairQueue::new();
        let mut a = tcb(1, 0);
        let mut b = tcb(2, 0);
        a.vruntime = 5_000_000;
        b.vruntime = 1_000_000;
        unsafe {
            fq.enqueue(a.as_mut());
            fq.enqueue(b.as_mut());
            assert_eq!(fq.dequeue(), b.as_mut() as *mut Tcb);
            assert_eq!(fq.dequeue(), a.as_mut() as *mut Tcb);
        }
    }

    #[test]
    fn equal_vruntime_resolves_in_arrival_order() {
        let mut fq = FairQueue::new();
        let mut a = tcb(1, 0);
        let mut b = tcb(2, 0);
        a.vruntime = 3_000_000;
        b.vruntime = 3_000_000;
        unsafe {
            fq.enqueue(a.as_mut());
            fq.enqueue(b.as_mut());
            assert_eq!(fq.dequeue(), a.as_mut() as *mut Tcb);
            assert_eq!(fq.dequeue(), b.as_mut() as *mut Tcb);
        }
    }

    #[test]
    fn leftmost_cache_matches_tree_minimum() {
        let mut fq = FairQueue::new();
        let mut threads: Vec<Box<Tcb>> = (0..10).map(|i| tcb(i, 0)).collect();
        unsafe {
            for (i, t) in threads.iter_mut().enumerate() {
                t.vruntime = ((10 - i) as u64) * 1_000_000;
                fq.enqueue(t.as_mut());
                let min = fq.tree.first_key_value().map(|(k, _)| *k);
                assert_eq!(fq.leftmost, min);
            }
            while fq.len() > 0 {
                fq.dequeue();
                let min = fq.tree.first_key_value().map(|(k, _)| *k);
                assert_eq!(fq.leftmost, min);
            }
        }
    }

    #[test]
    fn fresh_thread_starts_at_min_vruntime() {
        let mut fq = FairQueue::new();
        fq.min_vruntime = 7_000_000;
        let mut a = tcb(1, 0);
        unsafe {
            fq.enqueue(a.as_mut());
        }
        assert_eq!(a.vruntime, 7_000_000);
    }

    #[test]
    fn min_vruntime_never_regresses() {
        let mut fq = FairQueue::new();
        let mut a = tcb(1, 0);
        a.vruntime = 10_000_000;
        unsafe {
            fq.enqueue(a.as_mut());
            fq.dequeue();
            assert_eq!(fq.min_vruntime, 10_000_000);
            // Ticking a thread with lower vruntime must not pull it back.
            let mut b = tcb(2, 0);
            b.vruntime = 1_000_000;
            fq.on_tick(b.as_mut(), 1_000_000);
            assert_eq!(fq.min_vruntime, 10_000_000);
        }
    }

    #[test]
    fn heavier_thread_accumulates_vruntime_slower() {
        let mut fq = FairQueue::new();
        let mut heavy = tcb(1, -10);
        let mut light = tcb(2, 10);
        unsafe {
            fq.on_tick(heavy.as_mut(), 10_000_000);
            fq.on_tick(light.as_mut(), 10_000_000);
        }
        assert!(heavy.vruntime < light.vruntime);
    }

    #[test]
    fn lagging_leftmost_triggers_preemption() {
        let mut fq = FairQueue::new();
        let mut waiting = tcb(1, 0);
        let mut running = tcb(2, 0);
        waiting.vruntime = 1_000_000;
        running.vruntime = 1_500_000;
        running.timeslice_remaining = 10_000_000;
        unsafe {
            fq.enqueue(waiting.as_mut());
            // Within the granularity: no preemption yet.
            assert!(!fq.should_preempt(running.as_mut()));
            running.vruntime = 3_000_000;
            assert!(fq.should_preempt(running.as_mut()));
        }
    }

    #[test]
    fn remove_clears_membership_and_cache() {
        let mut fq = FairQueue::new();
        let mut a = tcb(1, 0);
        let mut b = tcb(2, 0);
        a.vruntime = 1_000_000;
        b.vruntime = 2_000_000;
        unsafe {
            fq.enqueue(a.as_mut());
            fq.enqueue(b.as_mut());
            fq.remove(a.as_mut());
            assert!(a.fair_key.is_none());
            assert_eq!(fq.leftmost, b.fair_key);
            assert_eq!(fq.dequeue(), b.as_mut() as *mut Tcb);
        }
    }

    #[test]
    fn timeslice_respects_minimum_granularity() {
        let mut fq = FairQueue::new();
        let mut threads: Vec<Box<Tcb>> = (0..100).map(|i| tcb(i, 19)).collect();
        unsafe {
            for t in threads.iter_mut() {
                fq.enqueue(t.as_mut());
            }
        }
        for t in threads.iter() {
            assert!(t.timeslice_remaining >= FAIR_MIN_GRANULARITY_NS);
        }
    }
}
