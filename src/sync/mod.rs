//! Blocking synchronization primitives.
//!
//! All four primitives are built on the same two pieces: a [`wait_queue`]
//! holding blocked threads in FIFO order, and the scheduler's block/unblock
//! routines. State is mutated only inside critical sections, so no
//! primitive ever spins; a thread that cannot proceed parks itself and the
//! scheduler runs something else.
//!
//! Primitives are `Sync` so they can live in statics shared between
//! threads, which is sound here because every user thread runs on the one
//! host runtime thread. They are not meant to synchronize host OS threads.

pub(crate) mod wait_queue;

mod condvar;
mod mutex;
mod rwlock;
mod semaphore;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexKind};
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
