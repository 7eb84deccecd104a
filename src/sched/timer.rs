//! Timer-driven preemption and critical sections.
//!
//! The host delivers SIGALRM at the configured timeslice interval via
//! `setitimer(ITIMER_REAL)`. The handler either invokes the scheduler tick
//! or defers:
//!
//! 1. Runtime not initialized, or signal delivered to a foreign OS thread:
//!    ignore. (Process-directed signals can land on any thread of a test
//!    harness; only the thread that called init multiplexes user threads.)
//! 2. Critical-section nesting held: record a pending preempt and return.
//! 3. Scheduler already running: ignore.
//! 4. Current thread flagged in a critical section: record pending.
//! 5. Otherwise: bump the nesting counter and tick.
//!
//! ## Critical sections
//!
//! Every mutation of scheduler, queue, or primitive state happens between
//! [`critical_enter`] and [`critical_leave`]: a process-wide nesting
//! counter paired with masking of SIGALRM on the runtime thread. The
//! outermost leave serves a pending preempt synchronously (still at depth
//! one, so the switch-at-depth-one invariant holds) and then unmasks.
//!
//! The handler itself only reads flags, flips atomics, and calls
//! [`sched::tick`]; it takes no locks and allocates nothing.

use crate::error::{Result, SprigError};
use crate::sched::{self, IN_SCHEDULER, INITIALIZED};
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::SeqCst};

/// Critical-section nesting depth. Every context switch happens at depth
/// exactly one.
static CRIT_NESTING: AtomicU32 = AtomicU32::new(0);

/// A timer firing was deferred and should be served at the outermost leave.
static PREEMPT_PENDING: AtomicBool = AtomicBool::new(false);

/// Whether the interval timer is currently armed.
static TIMER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// pthread id of the runtime thread; deliveries elsewhere are dropped.
static HOST_THREAD: AtomicUsize = AtomicUsize::new(0);

/// Previous SIGALRM disposition, restored on shutdown.
static mut OLD_SIGACTION: Option<libc::sigaction> = None;

/// SIGALRM handler. Reentrancy-safe by construction: it only observes
/// flags and either defers or ticks; the kernel masks SIGALRM for the
/// duration of the handler.
extern "C" fn preempt_signal_handler(_signum: libc::c_int) {
    if !INITIALIZED.load(SeqCst) {
        return;
    }
    if HOST_THREAD.load(SeqCst) != unsafe { libc::pthread_self() as usize } {
        return;
    }
    if CRIT_NESTING.load(SeqCst) > 0 {
        PREEMPT_PENDING.store(true, SeqCst);
        return;
    }
    if IN_SCHEDULER.load(SeqCst) {
        return;
    }
    unsafe {
        let rt = sched::runtime();
        let current = rt.current;
        if !current.is_null() && (*current).in_critical_section {
            PREEMPT_PENDING.store(true, SeqCst);
            return;
        }
        // Tick at depth one so a preemption switch obeys the same
        // invariant as a voluntary one. A preempted thread resumes right
        // here and finishes the handler frame.
        CRIT_NESTING.fetch_add(1, SeqCst);
        sched::tick(rt);
        CRIT_NESTING.fetch_sub(1, SeqCst);
    }
}

/// Enter a critical section: mask SIGALRM on this thread and bump the
/// nesting counter. Nestable.
pub(crate) fn critical_enter() {
    unsafe {
        set_alarm_mask(libc::SIG_BLOCK);
    }
    let prev = CRIT_NESTING.fetch_add(1, SeqCst);
    if prev == 0 && INITIALIZED.load(SeqCst) {
        unsafe {
            let rt = sched::runtime();
            if !rt.current.is_null() {
                (*rt.current).in_critical_section = true;
            }
        }
    }
}

/// Leave a critical section. The outermost leave serves any pending
/// preempt (before unmasking, still at depth one) and then unmasks
/// SIGALRM.
pub(crate) fn critical_leave() {
    let depth = CRIT_NESTING.load(SeqCst);
    debug_assert!(depth > 0, "critical_leave without matching enter");
    if depth == 0 {
        return;
    }
    if depth == 1 && INITIALIZED.load(SeqCst) {
        unsafe {
            let rt = sched::runtime();
            if !rt.current.is_null() {
                (*rt.current).in_critical_section = false;
            }
            if PREEMPT_PENDING.swap(false, SeqCst) && !IN_SCHEDULER.load(SeqCst) {
                sched::tick(rt);
            }
        }
    }
    if CRIT_NESTING.fetch_sub(1, SeqCst) == 1 {
        unsafe {
            set_alarm_mask(libc::SIG_UNBLOCK);
        }
    }
}

/// Whether preemption is currently unsuppressed.
#[allow(dead_code)]
pub(crate) fn critical_depth() -> u32 {
    CRIT_NESTING.load(SeqCst)
}

/// Install the SIGALRM handler and remember the runtime thread.
///
/// # Errors
///
/// [`SprigError::OutOfMemory`] if `sigaction` fails.
pub(crate) fn install_handler() -> Result<()> {
    unsafe {
        HOST_THREAD.store(libc::pthread_self() as usize, SeqCst);

        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = preempt_signal_handler as extern "C" fn(libc::c_int) as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigfillset(&mut sa.sa_mask);

        let mut old: libc::sigaction = mem::zeroed();
        if libc::sigaction(libc::SIGALRM, &sa, &mut old) != 0 {
            return Err(SprigError::OutOfMemory);
        }
        *ptr::addr_of_mut!(OLD_SIGACTION) = Some(old);
    }
    Ok(())
}

/// Restore the SIGALRM disposition saved by [`install_handler`].
pub(crate) fn restore_handler() {
    unsafe {
        if let Some(old) = (*ptr::addr_of_mut!(OLD_SIGACTION)).take() {
            libc::sigaction(libc::SIGALRM, &old, ptr::null_mut());
        }
    }
}

/// Arm the periodic timer with the given interval. No-op if already armed.
pub(crate) fn start(interval_ns: u64) {
    if TIMER_ACTIVE.swap(true, SeqCst) {
        return;
    }
    set_itimer(interval_ns);
}

/// Disarm the periodic timer. No-op if not armed.
pub(crate) fn stop() {
    if !TIMER_ACTIVE.swap(false, SeqCst) {
        return;
    }
    set_itimer(0);
}

/// Change the interval: atomically stop and restart if the timer is
/// running, otherwise just record nothing (the next start picks up the
/// caller's interval).
pub(crate) fn set_interval(interval_ns: u64) {
    if TIMER_ACTIVE.load(SeqCst) {
        stop();
        start(interval_ns);
    }
}

/// Clear handler-visible state across init/shutdown cycles.
pub(crate) fn reset_state() {
    CRIT_NESTING.store(0, SeqCst);
    PREEMPT_PENDING.store(false, SeqCst);
    TIMER_ACTIVE.store(false, SeqCst);
}

fn set_itimer(interval_ns: u64) {
    let tv = libc::timeval {
        tv_sec: (interval_ns / 1_000_000_000) as libc::time_t,
        tv_usec: ((interval_ns % 1_000_000_000) / 1_000) as libc::suseconds_t,
    };
    let itv = libc::itimerval {
        it_interval: tv,
        it_value: tv,
    };
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &itv, ptr::null_mut()) };
    if rc != 0 {
        log::warn!("setitimer failed; preemption timer not armed");
    }
}

/// Block or unblock SIGALRM on the calling thread.
///
/// # Safety
///
/// `how` must be `SIG_BLOCK` or `SIG_UNBLOCK`.
unsafe fn set_alarm_mask(how: libc::c_int) {
    let mut set: libc::sigset_t = mem::zeroed();
    libc::sigemptyset(&mut set);
    libc::sigaddset(&mut set, libc::SIGALRM);
    libc::pthread_sigmask(how, &set, ptr::null_mut());
}
