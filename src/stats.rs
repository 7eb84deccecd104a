//! Runtime statistics and the debug dump.
//!
//! Counters are maintained by the scheduler core; snapshots here are taken
//! under the critical section so the numbers in one snapshot are mutually
//! consistent. Readers that skip the critical section (none in this crate)
//! would see best-effort values.

use crate::error::{Result, SprigError};
use crate::sched::{self, timer};
use crate::tcb::ThreadState;
use std::fmt::Write;

/// A consistent snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Threads ever created, including main.
    pub total_threads_created: u64,
    /// Threads currently in the thread table.
    pub active_threads: usize,
    /// Threads in the ready state.
    pub ready_threads: usize,
    /// Threads blocked on a queue or a join.
    pub blocked_threads: usize,
    /// Completed context switches.
    pub context_switches: u64,
    /// Calls into the schedule routine (including ones that kept the same
    /// thread running).
    pub scheduler_invocations: u64,
    /// Timer ticks processed.
    pub scheduler_ticks: u64,
}

/// Snapshot the current statistics.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] if the runtime is not initialized.
pub fn stats() -> Result<RuntimeStats> {
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let snapshot = unsafe {
        let rt = sched::runtime();
        let mut ready = 0;
        let mut blocked = 0;
        for &t in rt.threads.iter() {
            if t.is_null() {
                continue;
            }
            match (*t).state {
                ThreadState::Ready => ready += 1,
                ThreadState::Blocked => blocked += 1,
                _ => {}
            }
        }
        RuntimeStats {
            total_threads_created: rt.total_threads_created,
            active_threads: rt.thread_count,
            ready_threads: ready,
            blocked_threads: blocked,
            context_switches: rt.context_switches,
            scheduler_invocations: rt.scheduler_invocations,
            scheduler_ticks: rt.scheduler_ticks,
        }
    };
    timer::critical_leave();
    Ok(snapshot)
}

/// Zero the cumulative counters. Thread counts are unaffected.
pub fn reset_stats() -> Result<()> {
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    unsafe {
        let rt = sched::runtime();
        rt.context_switches = 0;
        rt.scheduler_invocations = 0;
        rt.scheduler_ticks = 0;
    }
    timer::critical_leave();
    Ok(())
}

/// Render the scheduler state and thread list for diagnostics.
///
/// # Errors
///
/// [`SprigError::InvalidArgument`] if the runtime is not initialized.
pub fn debug_dump() -> Result<String> {
    if !sched::is_initialized() {
        return Err(SprigError::InvalidArgument);
    }
    timer::critical_enter();
    let dump = unsafe {
        let rt = sched::runtime();
        let mut out = String::new();
        let _ = writeln!(out, "=== sprig runtime ===");
        let _ = writeln!(out, "scheduler: {}", rt.policy_kind.name());
        let _ = writeln!(out, "timeslice: {} ns", rt.timeslice_ns);
        let _ = writeln!(out, "preemption: {}", rt.preemption_enabled);
        let _ = writeln!(out, "threads created: {}", rt.total_threads_created);
        let _ = writeln!(out, "active threads: {}", rt.thread_count);
        let _ = writeln!(out, "context switches: {}", rt.context_switches);
        let _ = writeln!(out, "scheduler invocations: {}", rt.scheduler_invocations);
        let _ = writeln!(out, "ticks: {}", rt.scheduler_ticks);
        let _ = writeln!(out, "threads:");
        for &t in rt.threads.iter() {
            if t.is_null() {
                continue;
            }
            let state = match (*t).state {
                ThreadState::Ready => "ready",
                ThreadState::Running => "running",
                ThreadState::Blocked => "blocked",
                ThreadState::Terminated => "terminated",
            };
            let _ = writeln!(
                out,
                "  [{}] '{}' state={} priority={} nice={} vruntime={} runtime={}ns",
                (*t).tid,
                (*t).name,
                state,
                (*t).priority,
                (*t).nice,
                (*t).vruntime,
                (*t).total_runtime,
            );
        }
        out
    };
    timer::critical_leave();
    Ok(dump)
}
