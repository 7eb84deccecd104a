//! Error types for all runtime operations.
//!
//! Every fallible operation returns [`Result`]. Predictable misuse (bad
//! arguments, busy resources, timeouts) is reported through these variants;
//! the runtime never aborts the process for it. Internal invariant
//! violations that cannot be reported (a missing current thread where one
//! is required by control flow) panic with a diagnostic instead.

use thiserror::Error;

/// Errors returned by threading and synchronization operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SprigError {
    /// A handle was stale, a parameter was out of range, an object was
    /// uninitialized or already destroyed, or the runtime was not set up.
    #[error("invalid argument")]
    InvalidArgument,

    /// Allocation of a thread control block, stack, or wait queue failed,
    /// or the thread table is full.
    #[error("out of memory")]
    OutOfMemory,

    /// A try-lock hit a held resource, or destroy hit a held or non-empty
    /// resource.
    #[error("resource busy")]
    Busy,

    /// The operation would deadlock the caller (join on self, error-checking
    /// mutex re-locked by its owner).
    #[error("deadlock would occur")]
    Deadlock,

    /// The caller does not hold the resource in the required mode.
    #[error("operation not permitted")]
    Permission,

    /// A timed wait exceeded its absolute deadline.
    #[error("timed out")]
    TimedOut,

    /// A semaphore try-wait found a zero value.
    #[error("resource temporarily unavailable")]
    WouldBlock,

    /// No live thread matches the given handle.
    #[error("no such thread")]
    NoSuchThread,
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, SprigError>;
