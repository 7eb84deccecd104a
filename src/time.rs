//! Monotonic time source.
//!
//! All scheduling decisions and timeouts are expressed in nanoseconds read
//! from `CLOCK_MONOTONIC`; wall-clock time is never consulted.

use core::mem;

/// Current monotonic time in nanoseconds.
pub fn monotonic_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    // CLOCK_MONOTONIC is mandatory on every supported host.
    assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed");
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Absolute deadline `ms` milliseconds from now, for the timed-wait APIs.
pub fn deadline_after_ms(ms: u64) -> u64 {
    monotonic_ns().saturating_add(ms.saturating_mul(1_000_000))
}
