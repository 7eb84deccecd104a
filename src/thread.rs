//! Thread lifecycle: spawn, join, detach, yield, exit, sleep, and
//! per-thread attributes.
//!
//! Threads are addressed by small copyable [`ThreadHandle`]s carrying the
//! thread id; the scheduler's table owns the control blocks. A handle to a
//! thread that has since been reclaimed is merely stale: operations on it
//! report [`SprigError::NoSuchThread`] instead of touching freed memory.
//!
//! Spawned entry functions are plain `FnOnce() -> usize` closures. They do
//! not need to be `Send`: every user thread runs on the one host thread
//! that called [`crate::init`].

use crate::config::{
    CLEANUP_MAX, MAX_THREADS, NICE_MAX, NICE_MIN, PRIORITY_DEFAULT, PRIORITY_MAX, STACK_DEFAULT,
    STACK_MAX, STACK_MIN,
};
use crate::error::{Result, SprigError};
use crate::sched::{self, timer};
use crate::stack::StackRegion;
use crate::tcb::{Tcb, ThreadState};
use crate::time;
use core::ptr;

/// Non-owning reference to a thread, valid until the thread is joined or
/// (for detached threads) exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle {
    tid: usize,
}

impl ThreadHandle {
    /// Numeric thread id. Ids are unique for the lifetime of the runtime;
    /// 0 is reserved for the idle thread.
    #[inline]
    pub fn tid(&self) -> usize {
        self.tid
    }
}

/// Whether a thread can be joined or cleans up after itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetachState {
    /// The thread must be joined; its return value is retained until then.
    #[default]
    Joinable,
    /// The thread is reclaimed on exit and its return value discarded.
    Detached,
}

/// Creation-time thread attributes.
///
/// Setters validate eagerly, so an `Attributes` value is always internally
/// consistent and [`spawn_with`] does not re-validate.
#[derive(Debug, Clone)]
pub struct ThreadAttributes {
    stack_size: usize,
    priority: u8,
    nice: i8,
    detach_state: DetachState,
    name: Option<String>,
}

impl Default for ThreadAttributes {
    fn default() -> Self {
        Self {
            stack_size: STACK_DEFAULT,
            priority: PRIORITY_DEFAULT,
            nice: 0,
            detach_state: DetachState::Joinable,
            name: None,
        }
    }
}

impl ThreadAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stack size in bytes.
    ///
    /// # Errors
    ///
    /// [`SprigError::InvalidArgument`] outside [16 KiB, 8 MiB].
    pub fn set_stack_size(&mut self, size: usize) -> Result<()> {
        if !(STACK_MIN..=STACK_MAX).contains(&size) {
            return Err(SprigError::InvalidArgument);
        }
        self.stack_size = size;
        Ok(())
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Set the fixed priority (0-31, 31 highest).
    ///
    /// # Errors
    ///
    /// [`SprigError::InvalidArgument`] above 31.
    pub fn set_priority(&mut self, priority: u8) -> Result<()> {
        if priority > PRIORITY_MAX {
            return Err(SprigError::InvalidArgument);
        }
        self.priority = priority;
        Ok(())
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Set the nice value (-20 to +19, lower is a larger CPU share).
    ///
    /// # Errors
    ///
    /// [`SprigError::InvalidArgument`] outside the range.
    pub fn set_nice(&mut self, nice: i8) -> Result<()> {
        if !(NICE_MIN..=NICE_MAX).contains(&nice) {
            return Err(SprigError::InvalidArgument);
        }
        self.nice = nice;
        Ok(())
    }

    #[inline]
    pub fn nice(&self) -> i8 {
        self.nice
    }

    pub fn set_detach_state(&mut self, state: DetachState) {
        self.detach_state = state;
    }

    #[inline]
    pub fn detach_state(&self) -> DetachState {
        self.detach_state
    }

    /// Set the thread name; truncated to the name limit.
    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Spawn a thread with default attributes.
///
/// See [`spawn_with`].
pub fn spawn<F>(f: F) -> Result<ThreadHandle>
where
    F: FnOnce() -> usize + 'static,
{
    spawn_with(&ThreadAttributes::default(), f)
}

/// Spawn a thread with the given attributes.
///
/// The new thread is created ready and enqueued; it first runs at the
/// scheduler's discretion. Its return value is harvested by [`join`]
/// unless it was created detached.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] if the runtime is not initialized;
/// [`SprigError::OutOfMemory`] if the thread table is full or the stack
/// cannot be allocated.
pub fn spawn_with<F>(attr: &ThreadAttributes, f: F) -> Result<ThreadHandle>
where
    F: FnOnce() -> usize + 'static,
{
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }

    timer::critical_enter();
    let result = unsafe { spawn_locked(attr, Box::new(f)) };
    timer::critical_leave();
    result
}

unsafe fn spawn_locked(
    attr: &ThreadAttributes,
    entry: Box<dyn FnOnce() -> usize>,
) -> Result<ThreadHandle> {
    let rt = sched::runtime();
    if rt.thread_count >= MAX_THREADS {
        return Err(SprigError::OutOfMemory);
    }

    let stack = StackRegion::allocate(attr.stack_size)?;
    let tid = rt.next_tid;
    rt.next_tid += 1;

    let mut tcb = Box::new(Tcb::new(
        tid,
        attr.name.as_deref().unwrap_or(""),
        attr.priority,
        attr.nice,
        attr.detach_state == DetachState::Detached,
    ));
    tcb.context.prepare(stack.top(), sched::thread_entry_addr());
    tcb.stack = Some(stack);
    tcb.entry = Some(entry);
    tcb.state = ThreadState::Ready;

    let tcb = Box::into_raw(tcb);
    if let Err(e) = sched::table_insert(rt, tcb) {
        sched::free_tcb(tcb);
        return Err(e);
    }
    rt.policy.enqueue(tcb);
    rt.total_threads_created += 1;

    log::debug!("created thread {tid} (stack {} bytes)", attr.stack_size);
    Ok(ThreadHandle { tid })
}

/// Wait for a thread to exit and harvest its return value. The target's
/// control block is reclaimed on success.
///
/// # Errors
///
/// - [`SprigError::NoSuchThread`] for a stale or unknown handle.
/// - [`SprigError::Deadlock`] when joining self.
/// - [`SprigError::InvalidArgument`] for a detached target or one that
///   already has a different joiner.
pub fn join(handle: ThreadHandle) -> Result<usize> {
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }

    timer::critical_enter();
    let result = unsafe {
        let rt = sched::runtime();
        let target = sched::find_by_tid(rt, handle.tid);
        let me = rt.current;

        if target.is_null() {
            Err(SprigError::NoSuchThread)
        } else if target == me {
            Err(SprigError::Deadlock)
        } else if (*target).detached {
            Err(SprigError::InvalidArgument)
        } else if !(*target).joiner.is_null() && (*target).joiner != me {
            Err(SprigError::InvalidArgument)
        } else {
            // Block until the target exits. A resumed joiner re-checks the
            // flag: wakeups may be spurious with respect to this target.
            while !(*target).exited {
                (*target).joiner = me;
                (*me).waiting_on = target;
                (*me).state = ThreadState::Blocked;
                sched::schedule(rt);
            }
            (*me).waiting_on = ptr::null_mut();

            let retval = (*target).retval;
            sched::table_remove(rt, target);
            sched::free_tcb(target);
            Ok(retval)
        }
    };
    timer::critical_leave();
    result
}

/// Mark a thread detached: its return value is discarded and its control
/// block reclaimed on exit (immediately, if it already exited).
///
/// # Errors
///
/// [`SprigError::NoSuchThread`] for a stale handle;
/// [`SprigError::InvalidArgument`] if already detached or a joiner is
/// attached.
pub fn detach(handle: ThreadHandle) -> Result<()> {
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }

    timer::critical_enter();
    let result = unsafe {
        let rt = sched::runtime();
        let target = sched::find_by_tid(rt, handle.tid);
        if target.is_null() {
            Err(SprigError::NoSuchThread)
        } else if (*target).detached || !(*target).joiner.is_null() {
            Err(SprigError::InvalidArgument)
        } else {
            (*target).detached = true;
            if (*target).exited {
                sched::table_remove(rt, target);
                sched::free_tcb(target);
            }
            Ok(())
        }
    };
    timer::critical_leave();
    result
}

/// Voluntarily give up the CPU. A no-op if the runtime is not initialized.
pub fn yield_now() {
    if !sched::is_initialized() {
        return;
    }
    timer::critical_enter();
    unsafe {
        sched::yield_current(sched::runtime());
    }
    timer::critical_leave();
}

/// Terminate the calling thread with the given return value.
///
/// Remaining cleanup handlers run in reverse registration order. The
/// joiner, if any, is woken; a detached thread is reclaimed after the
/// final switch away from its stack. Never returns.
///
/// Called outside an initialized runtime this exits the process, as there
/// is no thread to terminate.
pub fn exit(retval: usize) -> ! {
    if !sched::is_initialized() {
        std::process::exit(0);
    }

    timer::critical_enter();
    unsafe {
        let rt = sched::runtime();
        let me = rt.current;
        if me.is_null() {
            timer::critical_leave();
            std::process::exit(0);
        }

        while let Some(handler) = (*me).cleanup.pop() {
            handler();
        }

        (*me).retval = retval;
        (*me).exited = true;
        (*me).state = ThreadState::Terminated;
        rt.policy.remove(me);

        if !(*me).joiner.is_null() {
            let joiner = (*me).joiner;
            (*joiner).waiting_on = ptr::null_mut();
            sched::unblock(rt, joiner);
        }

        if (*me).detached {
            sched::table_remove(rt, me);
            // Cannot free the stack we are executing on; the next thread
            // reclaims us right after the switch.
            rt.zombie = me;
        }

        sched::schedule(rt);
    }
    unreachable!("exit: scheduler returned to a terminated thread");
}

/// Handle of the calling thread.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] if the runtime is not initialized.
pub fn current() -> Result<ThreadHandle> {
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let tid = unsafe { (*sched::runtime().current).tid };
    timer::critical_leave();
    Ok(ThreadHandle { tid })
}

/// Whether two handles name the same thread.
#[inline]
pub fn equal(a: ThreadHandle, b: ThreadHandle) -> bool {
    a == b
}

/// Sleep for at least `ms` milliseconds of monotonic time.
///
/// The sleeping thread stays runnable and yields in a loop until the
/// deadline passes, so other threads run; with a single sleeper and an
/// empty run queue the idle thread absorbs the spinning.
pub fn sleep_ms(ms: u64) {
    if !sched::is_initialized() || ms == 0 {
        return;
    }
    let deadline = time::monotonic_ns() + ms * 1_000_000;
    while time::monotonic_ns() < deadline {
        yield_now();
    }
}

/// Set a thread's name (truncated to the name limit).
pub fn set_name(handle: ThreadHandle, name: &str) -> Result<()> {
    with_thread(handle, |t| {
        t.set_name(name);
        Ok(())
    })
}

/// A thread's current name.
pub fn name(handle: ThreadHandle) -> Result<String> {
    with_thread(handle, |t| Ok(t.name.clone()))
}

/// Change a thread's fixed priority and reposition it if queued.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] above 31;
/// [`SprigError::NoSuchThread`] for a stale handle.
pub fn set_priority(handle: ThreadHandle, priority: u8) -> Result<()> {
    if priority > PRIORITY_MAX {
        return Err(SprigError::InvalidArgument);
    }
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let result = unsafe {
        let rt = sched::runtime();
        let target = sched::find_by_tid(rt, handle.tid);
        if target.is_null() {
            Err(SprigError::NoSuchThread)
        } else {
            (*target).priority = priority;
            rt.policy.update_priority(target);
            Ok(())
        }
    };
    timer::critical_leave();
    result
}

/// A thread's fixed priority.
pub fn priority(handle: ThreadHandle) -> Result<u8> {
    with_thread(handle, |t| Ok(t.priority))
}

/// Change a thread's nice value, recomputing its fair-scheduling weight.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] outside [-20, +19];
/// [`SprigError::NoSuchThread`] for a stale handle.
pub fn set_nice(handle: ThreadHandle, nice: i8) -> Result<()> {
    if !(NICE_MIN..=NICE_MAX).contains(&nice) {
        return Err(SprigError::InvalidArgument);
    }
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let result = unsafe {
        let rt = sched::runtime();
        let target = sched::find_by_tid(rt, handle.tid);
        if target.is_null() {
            Err(SprigError::NoSuchThread)
        } else {
            (*target).nice = nice;
            rt.policy.update_priority(target);
            Ok(())
        }
    };
    timer::critical_leave();
    result
}

/// A thread's nice value.
pub fn nice(handle: ThreadHandle) -> Result<i8> {
    with_thread(handle, |t| Ok(t.nice))
}

/// Register a cleanup handler on the calling thread; handlers run in
/// reverse registration order when the thread exits.
///
/// # Errors
///
/// [`SprigError::OutOfMemory`] if the per-thread handler capacity is
/// exhausted; [`SprigError::InvalidArgument`] if uninitialized.
pub fn cleanup_push<F>(f: F) -> Result<()>
where
    F: FnOnce() + 'static,
{
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let result = unsafe {
        let me = sched::runtime().current;
        if (*me).cleanup.len() >= CLEANUP_MAX {
            Err(SprigError::OutOfMemory)
        } else {
            (*me).cleanup.push(Box::new(f));
            Ok(())
        }
    };
    timer::critical_leave();
    result
}

/// Pop the most recently pushed cleanup handler, running it if `execute`
/// is true. Returns whether a handler was popped.
pub fn cleanup_pop(execute: bool) -> bool {
    if !sched::is_initialized() {
        return false;
    }
    timer::critical_enter();
    let handler = unsafe { (*sched::runtime().current).cleanup.pop() };
    timer::critical_leave();
    match handler {
        Some(f) => {
            if execute {
                f();
            }
            true
        }
        None => false,
    }
}

/// Run `op` on a live thread's control block under the critical section.
fn with_thread<T>(handle: ThreadHandle, op: impl FnOnce(&mut Tcb) -> Result<T>) -> Result<T> {
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let result = unsafe {
        let rt = sched::runtime();
        let target = sched::find_by_tid(rt, handle.tid);
        if target.is_null() {
            Err(SprigError::NoSuchThread)
        } else {
            op(&mut *target)
        }
    };
    timer::critical_leave();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_round_trips() {
        let mut attr = ThreadAttributes::new();
        attr.set_stack_size(128 * 1024).unwrap();
        assert_eq!(attr.stack_size(), 128 * 1024);
        attr.set_priority(31).unwrap();
        assert_eq!(attr.priority(), 31);
        attr.set_nice(-20).unwrap();
        assert_eq!(attr.nice(), -20);
        attr.set_detach_state(DetachState::Detached);
        assert_eq!(attr.detach_state(), DetachState::Detached);
        attr.set_name("worker");
        assert_eq!(attr.name(), Some("worker"));
    }

    #[test]
    fn stack_size_boundaries() {
        let mut attr = ThreadAttributes::new();
        assert!(attr.set_stack_size(STACK_MIN).is_ok());
        assert!(attr.set_stack_size(STACK_MAX).is_ok());
        assert_eq!(
            attr.set_stack_size(STACK_MIN - 1),
            Err(SprigError::InvalidArgument)
        );
        assert_eq!(
            attr.set_stack_size(STACK_MAX + 1),
            Err(SprigError::InvalidArgument)
        );
    }

    #[test]
    fn priority_boundaries() {
        let mut attr = ThreadAttributes::new();
        assert!(attr.set_priority(0).is_ok());
        assert!(attr.set_priority(31).is_ok());
        assert_eq!(attr.set_priority(32), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn nice_boundaries() {
        let mut attr = ThreadAttributes::new();
        assert!(attr.set_nice(-20).is_ok());
        assert!(attr.set_nice(19).is_ok());
        assert_eq!(attr.set_nice(-21), Err(SprigError::InvalidArgument));
        assert_eq!(attr.set_nice(20), Err(SprigError::InvalidArgument));
    }

    #[test]
    fn defaults_match_configuration() {
        let attr = ThreadAttributes::default();
        assert_eq!(attr.stack_size(), STACK_DEFAULT);
        assert_eq!(attr.priority(), PRIORITY_DEFAULT);
        assert_eq!(attr.nice(), 0);
        assert_eq!(attr.detach_state(), DetachState::Joinable);
        assert_eq!(attr.name(), None);
    }

    #[test]
    fn handles_compare_by_tid() {
        let a = ThreadHandle { tid: 3 };
        let b = ThreadHandle { tid: 3 };
        let c = ThreadHandle { tid: 4 };
        assert!(equal(a, b));
        assert!(!equal(a, c));
        assert_eq!(a.tid(), 3);
    }
}
