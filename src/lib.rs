//! Sprig - a userspace M:1 threading runtime.
//!
//! Many lightweight user threads are multiplexed onto the single host
//! thread that calls [`init`], with user-space context switching for
//! cooperative handoff and a SIGALRM-driven interval timer for
//! preemption. Three interchangeable scheduling policies sit behind one
//! dispatch surface, and four blocking synchronization primitives are
//! built on the scheduler's wait queues.
//!
//! # Architecture
//!
//! - `arch`: save/restore of the callee-saved register set; stack
//!   preparation for fresh threads (x86_64 and aarch64).
//! - `stack`: guarded stack regions (a `PROT_NONE` page below each stack).
//! - `sched`: the scheduler core, the policy trait and its three
//!   implementations (round-robin, fixed priority, virtual-runtime fair),
//!   and the preemption timer with its critical-section discipline.
//! - `thread`: lifecycle (spawn, join, detach, yield, exit, sleep),
//!   attributes, and dynamic priority/nice changes.
//! - `sync`: mutex, condition variable, counting semaphore, and
//!   read-write lock.
//! - `stats`: scheduler counters and a debug dump.
//!
//! # Example
//!
//! ```no_run
//! use sprig::{self as rt, SchedPolicy};
//!
//! rt::init(SchedPolicy::RoundRobin).unwrap();
//! let h = rt::thread::spawn(|| {
//!     rt::thread::yield_now();
//!     42
//! })
//! .unwrap();
//! assert_eq!(rt::thread::join(h).unwrap(), 42);
//! rt::shutdown();
//! ```
//!
//! # Threading model
//!
//! Exactly one user thread executes at any instant, on the host thread
//! that called [`init`]. Spawned closures therefore do not need to be
//! `Send`, and the synchronization primitives are `Sync` only so they can
//! be shared between user threads through statics; none of this crate
//! synchronizes host OS threads. Blocking host I/O blocks every user
//! thread.

mod arch;
pub mod config;
mod error;
mod sched;
mod stack;
pub mod stats;
pub mod sync;
mod tcb;
pub mod thread;
pub mod time;

pub use error::{Result, SprigError};
pub use sched::{
    current_policy, init, is_initialized, set_preemption, set_timeslice, shutdown, timeslice,
    SchedPolicy,
};
pub use stats::{debug_dump, reset_stats, stats, RuntimeStats};
pub use thread::{DetachState, ThreadAttributes, ThreadHandle};
