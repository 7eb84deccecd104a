//! Thread control block (TCB).
//!
//! One `Tcb` exists per user thread. The thread table owns every TCB
//! (boxed, addressed by raw pointer); run queues, wait queues, and the
//! joiner/waiting-on rendezvous hold non-owning pointers into the table.
//! A TCB must be unlinked from every queue before it is destroyed.
//!
//! ## Lifecycle
//!
//! ```text
//! Ready ──> Running ──> Terminated
//!   ^          │
//!   │          v
//!   └────── Blocked
//! ```
//!
//! A TCB is created `Ready` and enqueued in the policy's run structure. It
//! becomes `Running` when dequeued and switched to, returns to `Ready` on
//! yield, preemption, or unblock, and becomes `Blocked` while parked on a
//! wait queue (or in a join rendezvous, which blocks without a queue). On
//! exit it is `Terminated`; a detached TCB is reclaimed immediately after
//! the final switch away from it, a joinable one persists until joined.

use crate::arch::Context;
use crate::config::{nice_to_weight, NAME_MAX};
use crate::sched::fair::FairKey;
use crate::stack::StackRegion;
use crate::sync::wait_queue::WaitQueue;
use core::ptr;

/// Thread entry function: runs on the thread's own stack, its return value
/// becomes the thread's exit value.
pub(crate) type EntryFn = Box<dyn FnOnce() -> usize>;

/// Cleanup handler registered with `cleanup_push`, run in LIFO order on
/// exit.
pub(crate) type CleanupFn = Box<dyn FnOnce()>;

/// Lifecycle states of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadState {
    /// Runnable, parked in the policy's run structure.
    Ready,
    /// Currently executing. At most one non-idle TCB is `Running`.
    Running,
    /// Waiting on a wait queue or a join rendezvous.
    Blocked,
    /// Finished execution; holds its return value until joined or reclaimed.
    Terminated,
}

/// Per-thread control block.
pub(crate) struct Tcb {
    /// Unique id; 0 is reserved for the idle thread.
    pub tid: usize,
    /// Short printable label, at most [`NAME_MAX`] characters.
    pub name: String,
    pub state: ThreadState,
    /// Saved register set and stack pointer.
    pub context: Context,
    /// Owned stack region; `None` for the main thread (host stack).
    pub stack: Option<StackRegion>,
    /// Start function, consumed by the entry trampoline.
    pub entry: Option<EntryFn>,
    /// Exit value, harvested by join.
    pub retval: usize,

    /// Fixed priority in [0, 31]; 31 is highest. Only the priority policy
    /// reads it.
    pub priority: u8,
    /// Nice value in [-20, +19]; lower means more CPU share. Only the fair
    /// policy reads it (through `weight`).
    pub nice: i8,
    /// Fair-scheduler weight derived from `nice`.
    pub weight: u32,
    /// Virtual runtime: CPU time scaled inversely by weight.
    pub vruntime: u64,
    /// Monotonic timestamp of the last switch to this thread.
    pub start_time: u64,
    /// Accumulated CPU time in nanoseconds.
    pub total_runtime: u64,
    /// Remaining quantum in nanoseconds; refilled on enqueue.
    pub timeslice_remaining: u64,

    pub detached: bool,
    pub exited: bool,
    /// Set while this thread holds the critical section; the preemption
    /// handler defers instead of ticking when it finds this set.
    pub in_critical_section: bool,

    /// Thread blocked in join on us, if any.
    pub joiner: *mut Tcb,
    /// Thread we are blocked joining, if any.
    pub waiting_on: *mut Tcb,
    /// Wait queue we are parked on; null whenever off-queue.
    pub blocked_queue: *mut WaitQueue,
    /// Membership record in the fair policy's run tree; `None` when not
    /// enqueued there.
    pub fair_key: Option<FairKey>,

    /// Cleanup handlers, run LIFO on exit.
    pub cleanup: Vec<CleanupFn>,
}

impl Tcb {
    pub fn new(tid: usize, name: &str, priority: u8, nice: i8, detached: bool) -> Self {
        let mut tcb = Self {
            tid,
            name: String::new(),
            state: ThreadState::Ready,
            context: Context::empty(),
            stack: None,
            entry: None,
            retval: 0,
            priority,
            nice,
            weight: nice_to_weight(nice),
            vruntime: 0,
            start_time: 0,
            total_runtime: 0,
            timeslice_remaining: 0,
            detached,
            exited: false,
            in_critical_section: false,
            joiner: ptr::null_mut(),
            waiting_on: ptr::null_mut(),
            blocked_queue: ptr::null_mut(),
            fair_key: None,
            cleanup: Vec::new(),
        };
        tcb.set_name(name);
        tcb
    }

    /// Set the thread name, truncating to [`NAME_MAX`] characters.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.chars().take(NAME_MAX).collect();
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.state == ThreadState::Blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tcb_defaults() {
        let t = Tcb::new(7, "worker", 16, 0, false);
        assert_eq!(t.tid, 7);
        assert_eq!(t.name, "worker");
        assert_eq!(t.state, ThreadState::Ready);
        assert_eq!(t.weight, 1024);
        assert!(t.joiner.is_null());
        assert!(t.blocked_queue.is_null());
        assert!(t.fair_key.is_none());
        assert!(!t.exited);
    }

    #[test]
    fn nice_sets_weight() {
        let t = Tcb::new(1, "", 16, -5, false);
        assert_eq!(t.weight, nice_to_weight(-5));
    }

    #[test]
    fn name_is_truncated() {
        let long = "x".repeat(100);
        let t = Tcb::new(1, &long, 16, 0, false);
        assert_eq!(t.name.chars().count(), NAME_MAX);
    }

    #[test]
    fn state_transitions() {
        let mut t = Tcb::new(1, "t", 16, 0, false);
        assert_eq!(t.state, ThreadState::Ready);
        t.state = ThreadState::Running;
        assert!(!t.is_blocked());
        t.state = ThreadState::Blocked;
        assert!(t.is_blocked());
        t.state = ThreadState::Terminated;
        assert!(!t.is_blocked());
    }
}
