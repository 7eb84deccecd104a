//! Scheduler core.
//!
//! Process-wide runtime state and the policy-agnostic scheduling routines:
//! enqueue, yield, block, unblock, schedule, and tick. Which thread runs
//! next is always the policy's decision ([`policy::Policy`]); this module
//! owns the thread table, the current/idle thread references, the counters,
//! and the context-switch bookkeeping.
//!
//! ## Concurrency discipline
//!
//! All user threads run on the single host thread that called [`init`].
//! Every routine here executes inside a critical section (preemption signal
//! masked, nesting counter held; see [`timer`]), so every context switch
//! happens at nesting depth exactly one. Every resumed continuation, be it
//! a voluntary resume, a preempted thread finishing its handler frame, or
//! a fresh thread entering through the trampoline, performs exactly one
//! matching leave. The only asynchronous entry point is the timer signal
//! handler, which either defers (sets the pending flag) or calls [`tick`]
//! under a nesting bump of its own.

pub(crate) mod fair;
pub(crate) mod policy;
pub(crate) mod priority;
pub(crate) mod round_robin;
pub(crate) mod timer;

pub use policy::SchedPolicy;

use crate::config::{
    IDLE_STACK_SIZE, MAX_THREADS, PRIORITY_DEFAULT, TIMESLICE_DEFAULT_NS, TIMESLICE_MIN_NS,
};
use crate::error::{Result, SprigError};
use crate::stack::StackRegion;
use crate::tcb::{Tcb, ThreadState};
use crate::time;
use crate::{arch, thread};
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering::SeqCst};
use policy::Policy;

/// Process-wide scheduler state. Exactly one instance exists between
/// [`init`] and [`shutdown`].
pub(crate) struct Runtime {
    pub policy_kind: SchedPolicy,
    pub policy: Box<dyn Policy>,
    /// The thread currently executing; the idle thread when no user thread
    /// is runnable.
    pub current: *mut Tcb,
    /// Fallback thread that repeatedly asks the scheduler for work. Lives
    /// outside the thread table and is never destroyed before shutdown.
    pub idle: *mut Tcb,
    /// Thread table; owns every user TCB. Slot order is meaningless.
    pub threads: [*mut Tcb; MAX_THREADS],
    pub thread_count: usize,
    pub next_tid: usize,
    pub timeslice_ns: u64,
    pub preemption_enabled: bool,
    /// A detached thread that exited; reclaimed by whichever thread runs
    /// next, since a thread cannot free the stack it is executing on.
    pub zombie: *mut Tcb,

    // Statistics. Snapshots taken without the critical section are
    // best-effort.
    pub context_switches: u64,
    pub scheduler_invocations: u64,
    pub scheduler_ticks: u64,
    pub total_threads_created: u64,
}

static mut RUNTIME: Option<Runtime> = None;

/// Whether [`init`] has completed. Checked first by the signal handler.
pub(crate) static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Set while [`schedule`] is choosing and switching; the signal handler
/// stands down when it observes this.
pub(crate) static IN_SCHEDULER: AtomicBool = AtomicBool::new(false);

/// Access the global runtime.
///
/// # Safety
///
/// The runtime must be initialized, and the caller must be on the host
/// thread with the critical-section discipline in force (no other code can
/// observe the state concurrently).
pub(crate) unsafe fn runtime() -> &'static mut Runtime {
    (*ptr::addr_of_mut!(RUNTIME))
        .as_mut()
        .expect("scheduler state accessed before init")
}

/// Whether the runtime is initialized.
pub fn is_initialized() -> bool {
    INITIALIZED.load(SeqCst)
}

/// The scheduling policy selected at init.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] if the runtime is not initialized.
pub fn current_policy() -> Result<SchedPolicy> {
    if !is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let kind = unsafe { runtime().policy_kind };
    timer::critical_leave();
    Ok(kind)
}

/// Initialize the runtime with the given scheduling policy.
///
/// The calling host thread becomes the runtime thread: it is registered as
/// the first user thread ("main") and is the only thread the preemption
/// signal acts on. The preemption timer starts immediately with the default
/// timeslice.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] if already initialized;
/// [`SprigError::OutOfMemory`] if the idle stack or signal handler cannot
/// be set up.
pub fn init(kind: SchedPolicy) -> Result<()> {
    if INITIALIZED.load(SeqCst) {
        return Err(SprigError::InvalidArgument);
    }

    let policy = policy::make_policy(kind, TIMESLICE_DEFAULT_NS);

    // The idle thread runs a schedule loop on its own small stack and is
    // switched to whenever no user thread is ready.
    let mut idle = Box::new(Tcb::new(0, "idle", PRIORITY_DEFAULT, 0, false));
    let idle_stack = StackRegion::allocate(IDLE_STACK_SIZE)?;
    unsafe {
        idle.context.prepare(idle_stack.top(), thread_entry_addr());
    }
    idle.stack = Some(idle_stack);
    idle.entry = Some(Box::new(|| idle_loop()));
    let idle = Box::into_raw(idle);

    // The caller becomes the "main" user thread. It runs on the host stack;
    // its context is filled in by the first switch away from it.
    let mut main = Box::new(Tcb::new(1, "main", PRIORITY_DEFAULT, 0, false));
    main.state = ThreadState::Running;
    let main = Box::into_raw(main);

    let mut rt = Runtime {
        policy_kind: kind,
        policy,
        current: main,
        idle,
        threads: [ptr::null_mut(); MAX_THREADS],
        thread_count: 0,
        next_tid: 2,
        timeslice_ns: TIMESLICE_DEFAULT_NS,
        preemption_enabled: true,
        zombie: ptr::null_mut(),
        context_switches: 0,
        scheduler_invocations: 0,
        scheduler_ticks: 0,
        total_threads_created: 1,
    };
    rt.threads[0] = main;
    rt.thread_count = 1;

    unsafe {
        *ptr::addr_of_mut!(RUNTIME) = Some(rt);
    }
    IN_SCHEDULER.store(false, SeqCst);
    timer::reset_state();

    if let Err(e) = timer::install_handler() {
        unsafe {
            *ptr::addr_of_mut!(RUNTIME) = None;
            drop(Box::from_raw(main));
            drop(Box::from_raw(idle));
        }
        return Err(e);
    }

    INITIALIZED.store(true, SeqCst);
    timer::start(TIMESLICE_DEFAULT_NS);
    log::info!("runtime initialized with {} scheduler", kind.name());
    Ok(())
}

/// Tear down the runtime, reclaiming every thread unconditionally.
///
/// Must be called from the runtime thread. Any still-live threads (blocked
/// or ready) are destroyed without running; their stacks and entry closures
/// are dropped. A no-op when not initialized.
pub fn shutdown() {
    // Flip the flag first so the signal handler stands down before state is
    // torn out from under it.
    if !INITIALIZED.swap(false, SeqCst) {
        return;
    }
    timer::stop();
    timer::restore_handler();

    unsafe {
        if let Some(mut rt) = (*ptr::addr_of_mut!(RUNTIME)).take() {
            for slot in rt.threads.iter_mut() {
                if !slot.is_null() {
                    free_tcb(*slot);
                    *slot = ptr::null_mut();
                }
            }
            if !rt.zombie.is_null() {
                free_tcb(rt.zombie);
            }
            free_tcb(rt.idle);
        }
    }
    timer::reset_state();
    IN_SCHEDULER.store(false, SeqCst);
    log::info!("runtime shutdown complete");
}

/// Set the preemption timeslice. Takes effect for subsequent enqueues and
/// restarts the interval timer if it is running.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] if uninitialized or `ns` is below 1 ms.
pub fn set_timeslice(ns: u64) -> Result<()> {
    if !is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    if ns < TIMESLICE_MIN_NS {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    unsafe {
        let rt = runtime();
        rt.timeslice_ns = ns;
        rt.policy.set_timeslice(ns);
    }
    timer::set_interval(ns);
    timer::critical_leave();
    Ok(())
}

/// Current preemption timeslice in nanoseconds.
pub fn timeslice() -> Result<u64> {
    if !is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let ns = unsafe { runtime().timeslice_ns };
    timer::critical_leave();
    Ok(ns)
}

/// Enable or disable timer preemption. Returns the previous setting.
///
/// Cooperative switching (yield and blocking calls) is unaffected.
pub fn set_preemption(enabled: bool) -> Result<bool> {
    if !is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let (old, interval) = unsafe {
        let rt = runtime();
        let old = rt.preemption_enabled;
        rt.preemption_enabled = enabled;
        (old, rt.timeslice_ns)
    };
    if enabled {
        timer::start(interval);
    } else {
        timer::stop();
    }
    timer::critical_leave();
    Ok(old)
}

// ==========================================================================
// Thread table
// ==========================================================================

/// Insert a TCB into the thread table.
///
/// # Safety
///
/// `t` must be a freshly leaked box not already in the table.
pub(crate) unsafe fn table_insert(rt: &mut Runtime, t: *mut Tcb) -> Result<()> {
    for slot in rt.threads.iter_mut() {
        if slot.is_null() {
            *slot = t;
            rt.thread_count += 1;
            return Ok(());
        }
    }
    Err(SprigError::OutOfMemory)
}

/// Remove a TCB from the thread table without destroying it.
///
/// # Safety
///
/// `t` must be a live TCB.
pub(crate) unsafe fn table_remove(rt: &mut Runtime, t: *mut Tcb) {
    for slot in rt.threads.iter_mut() {
        if *slot == t {
            *slot = ptr::null_mut();
            rt.thread_count -= 1;
            return;
        }
    }
}

/// Look up a live thread by id. Returns null if no table entry matches.
pub(crate) unsafe fn find_by_tid(rt: &Runtime, tid: usize) -> *mut Tcb {
    for &slot in rt.threads.iter() {
        if !slot.is_null() && (*slot).tid == tid {
            return slot;
        }
    }
    ptr::null_mut()
}

/// Destroy a TCB, releasing its stack and any unconsumed entry closure.
///
/// # Safety
///
/// `t` must have been produced by `Box::into_raw` and must not be linked
/// into any queue or table slot.
pub(crate) unsafe fn free_tcb(t: *mut Tcb) {
    drop(Box::from_raw(t));
}

// ==========================================================================
// Core scheduling routines
// ==========================================================================

/// Pick the next thread and switch to it.
///
/// Falls back to the idle thread when the policy has nothing ready, and
/// returns immediately if the choice is the thread already running. The
/// outgoing thread keeps its `Blocked`/`Terminated` state; a still-running
/// outgoing thread is marked `Ready` (its requeueing is the caller's
/// responsibility).
///
/// # Safety
///
/// Must run on the runtime thread inside a critical section.
pub(crate) unsafe fn schedule(rt: &mut Runtime) {
    rt.scheduler_invocations += 1;
    IN_SCHEDULER.store(true, SeqCst);

    let current = rt.current;
    let mut next = rt.policy.dequeue();
    if next.is_null() {
        next = rt.idle;
    }

    if next == current {
        IN_SCHEDULER.store(false, SeqCst);
        return;
    }

    if !current.is_null() && (*current).state == ThreadState::Running {
        (*current).state = ThreadState::Ready;
    }
    (*next).state = ThreadState::Running;
    rt.current = next;

    IN_SCHEDULER.store(false, SeqCst);
    switch_context(rt, current, next);
}

/// Voluntarily give up the CPU. A no-op for the idle thread.
///
/// # Safety
///
/// As for [`schedule`].
pub(crate) unsafe fn yield_current(rt: &mut Runtime) {
    let current = rt.current;
    if current.is_null() || current == rt.idle {
        return;
    }
    rt.policy.on_yield(current);
    if (*current).state == ThreadState::Running {
        (*current).state = ThreadState::Ready;
        rt.policy.enqueue(current);
    }
    schedule(rt);
}

/// Park the current thread on `wq` and run something else. Returns when
/// the thread is woken.
///
/// # Safety
///
/// As for [`schedule`]; `wq` must outlive the blocked interval.
pub(crate) unsafe fn block(rt: &mut Runtime, wq: *mut crate::sync::wait_queue::WaitQueue) {
    let current = rt.current;
    if current.is_null() {
        return;
    }
    (*current).state = ThreadState::Blocked;
    (*wq).add(current);
    schedule(rt);
}

/// Make a blocked thread runnable again.
///
/// # Safety
///
/// As for [`schedule`]; `t` must be a live TCB not in any run structure.
pub(crate) unsafe fn unblock(rt: &mut Runtime, t: *mut Tcb) {
    if t.is_null() {
        return;
    }
    (*t).state = ThreadState::Ready;
    rt.policy.enqueue(t);
}

/// Timer tick: account elapsed runtime to the current thread and preempt
/// it if the policy says so. A no-op while idle is running.
///
/// # Safety
///
/// As for [`schedule`]. Reachable from the signal handler; must not
/// allocate or log.
pub(crate) unsafe fn tick(rt: &mut Runtime) {
    rt.scheduler_ticks += 1;

    let current = rt.current;
    if current.is_null() || current == rt.idle {
        return;
    }

    let elapsed = time::monotonic_ns().saturating_sub((*current).start_time);
    rt.policy.on_tick(current, elapsed);

    if rt.preemption_enabled && rt.policy.should_preempt(current) {
        (*current).state = ThreadState::Ready;
        rt.policy.enqueue(current);
        schedule(rt);
    }
}

/// Save the outgoing context, update accounting, and resume the incoming
/// one. With a null `from` (first-ever switch) the incoming context is
/// restored without saving.
unsafe fn switch_context(rt: &mut Runtime, from: *mut Tcb, to: *mut Tcb) {
    let now = time::monotonic_ns();
    rt.context_switches += 1;
    (*to).start_time = now;

    if from.is_null() {
        arch::restore(&(*to).context);
    }

    if (*from).start_time > 0 {
        (*from).total_runtime += now.saturating_sub((*from).start_time);
    }
    arch::switch(&mut (*from).context, &(*to).context);

    // Execution continues here when `from` is scheduled again (possibly
    // much later, possibly from a different caller's critical section).
    after_switch();
}

/// Housekeeping on the resume side of every switch: reclaim a detached
/// thread that exited, now that nothing executes on its stack.
///
/// # Safety
///
/// Must run inside a critical section, immediately after gaining the CPU.
pub(crate) unsafe fn after_switch() {
    let rt = runtime();
    if !rt.zombie.is_null() {
        let zombie = rt.zombie;
        rt.zombie = ptr::null_mut();
        free_tcb(zombie);
    }
}

// ==========================================================================
// Thread entry
// ==========================================================================

/// Address of the entry trampoline, for stack preparation.
pub(crate) fn thread_entry_addr() -> usize {
    sprig_thread_entry as extern "C" fn() as usize
}

/// First code every spawned thread executes.
///
/// Arrives here via a context switch performed inside a critical section,
/// so it finishes that section's bookkeeping (reclaim, leave) before
/// running user code. The user closure's return value (or a sentinel, if it
/// panicked) is handed to exit; the trampoline frame is never returned
/// from.
extern "C" fn sprig_thread_entry() {
    let entry = unsafe {
        after_switch();
        let current = runtime().current;
        debug_assert!(!current.is_null());
        (*current).entry.take()
    };
    timer::critical_leave();

    let retval = match entry {
        Some(f) => std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
            .unwrap_or(usize::MAX),
        None => 0,
    };
    thread::exit(retval);
}

/// Body of the idle thread: keep asking the scheduler for work.
fn idle_loop() -> usize {
    loop {
        timer::critical_enter();
        unsafe {
            schedule(runtime());
        }
        timer::critical_leave();
        core::hint::spin_loop();
    }
}
