//! Scheduling policy interface.
//!
//! The scheduler core is policy-agnostic: every decision about which thread
//! runs next, when the running thread should be preempted, and how a
//! priority change affects queue position is delegated through [`Policy`].
//! The three implementations are a closed set selected at [`crate::init`]
//! time and dispatched through a boxed trait object.

use crate::tcb::Tcb;

/// Scheduling policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Single FIFO queue with time slicing; ignores priority and nice.
    RoundRobin,
    /// 32 fixed priority levels with an occupancy bitmap; FIFO per level.
    Priority,
    /// Virtual-runtime fair queue; CPU share proportional to nice weight.
    Fair,
}

impl SchedPolicy {
    /// Human-readable policy name.
    pub fn name(&self) -> &'static str {
        match self {
            SchedPolicy::RoundRobin => "round-robin",
            SchedPolicy::Priority => "priority",
            SchedPolicy::Fair => "fair",
        }
    }
}

/// Operations every scheduling policy provides to the scheduler core.
///
/// All methods run inside a critical section. TCB pointers passed in are
/// owned by the thread table and stay valid for the duration of the call;
/// a policy stores them only while the thread is enqueued, and the core
/// guarantees `remove` is called before a stored thread is destroyed.
pub(crate) trait Policy {
    /// Add a ready thread to the run structure and refill its timeslice.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB not currently in any run structure.
    unsafe fn enqueue(&mut self, t: *mut Tcb);

    /// Remove and return the next thread to run, or null if none is ready.
    ///
    /// # Safety
    ///
    /// Stored pointers must still be live.
    unsafe fn dequeue(&mut self) -> *mut Tcb;

    /// Extract a specific thread from the run structure; no-op if absent.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB.
    unsafe fn remove(&mut self, t: *mut Tcb);

    /// Hook invoked when `t` yields voluntarily, before it is re-enqueued.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB.
    unsafe fn on_yield(&mut self, t: *mut Tcb);

    /// Account `elapsed_ns` of runtime to `t` on a timer tick.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB.
    unsafe fn on_tick(&mut self, t: *mut Tcb, elapsed_ns: u64);

    /// Whether the running thread should be preempted right now.
    ///
    /// # Safety
    ///
    /// `current` must be a live TCB.
    unsafe fn should_preempt(&mut self, current: *mut Tcb) -> bool;

    /// React to a priority or nice change on `t`.
    ///
    /// # Safety
    ///
    /// `t` must be a live TCB.
    unsafe fn update_priority(&mut self, t: *mut Tcb);

    /// Adopt a new default timeslice for future enqueues.
    fn set_timeslice(&mut self, _ns: u64) {}

    /// Number of threads currently in the run structure.
    fn len(&self) -> usize;

    /// Policy name, for diagnostics.
    fn name(&self) -> &'static str;
}

/// Build the run structure for `kind`.
pub(crate) fn make_policy(kind: SchedPolicy, timeslice_ns: u64) -> Box<dyn Policy> {
    match kind {
        SchedPolicy::RoundRobin => Box::new(super::round_robin::RoundRobin::new(timeslice_ns)),
        SchedPolicy::Priority => Box::new(super::priority::PriorityQueues::new(timeslice_ns)),
        SchedPolicy::Fair => Box::new(super::fair::FairQueue::new()),
    }
}
