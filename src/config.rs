//! Runtime-wide constants and tuning parameters.
//!
//! Everything here is a hard limit or a default; nothing is recomputed at
//! runtime. Scheduling-related values (timeslice, latency targets, the
//! nice-to-weight table) follow the conventions of the fair scheduler they
//! were lifted from: each nice step changes a thread's weight by roughly
//! 25%, with nice 0 pinned at 1024.

/// Maximum number of concurrently existing threads (including main).
pub const MAX_THREADS: usize = 1024;

/// Minimum allowed stack size for a spawned thread (16 KiB).
pub const STACK_MIN: usize = 16 * 1024;

/// Default stack size for a spawned thread (64 KiB).
pub const STACK_DEFAULT: usize = 64 * 1024;

/// Maximum allowed stack size for a spawned thread (8 MiB).
pub const STACK_MAX: usize = 8 * 1024 * 1024;

/// Size of the inaccessible guard region below each thread stack.
pub const GUARD_SIZE: usize = 4096;

/// Maximum length of a thread name, in characters.
pub const NAME_MAX: usize = 31;

/// Number of fixed priority levels.
pub const PRIORITY_LEVELS: usize = 32;

/// Lowest priority.
pub const PRIORITY_MIN: u8 = 0;

/// Highest priority.
pub const PRIORITY_MAX: u8 = 31;

/// Default priority for new threads (middle of the range).
pub const PRIORITY_DEFAULT: u8 = 16;

/// Lowest (most favorable) nice value.
pub const NICE_MIN: i8 = -20;

/// Highest (least favorable) nice value.
pub const NICE_MAX: i8 = 19;

/// Default preemption timeslice (10 ms).
pub const TIMESLICE_DEFAULT_NS: u64 = 10_000_000;

/// Minimum configurable timeslice (1 ms).
pub const TIMESLICE_MIN_NS: u64 = 1_000_000;

/// Fair scheduler: period over which every runnable thread should run once.
pub const FAIR_TARGET_LATENCY_NS: u64 = 20_000_000;

/// Fair scheduler: smallest timeslice ever handed out.
pub const FAIR_MIN_GRANULARITY_NS: u64 = 1_000_000;

/// Fair scheduler: weight of a nice-0 thread.
pub const NICE_0_WEIGHT: u32 = 1024;

/// Maximum number of cleanup handlers per thread.
pub const CLEANUP_MAX: usize = 8;

/// Stack size of the built-in idle thread.
pub const IDLE_STACK_SIZE: usize = STACK_MIN;

/// Nice-to-weight table, indexed by `nice + 20`.
///
/// Nice -20 maps to 88761, nice 0 to 1024, nice +19 to 15; each step is a
/// factor of about 1.25. A thread's virtual runtime advances at
/// `NICE_0_WEIGHT / weight` times real time, so heavier threads accumulate
/// virtual time more slowly and get a proportionally larger CPU share.
const WEIGHT_TABLE: [u32; 40] = [
    // -20..-16
    88761, 71755, 56483, 46273, 36291,
    // -15..-11
    29154, 23254, 18705, 14949, 11916,
    // -10..-6
    9548, 7620, 6100, 4904, 3906,
    // -5..-1
    3121, 2501, 1991, 1586, 1277,
    // 0..4
    1024, 820, 655, 526, 423,
    // 5..9
    335, 272, 215, 172, 137,
    // 10..14
    110, 87, 70, 56, 45,
    // 15..19
    36, 29, 23, 18, 15,
];

/// Convert a nice value to a fair-scheduler weight.
///
/// Out-of-range values are clamped to [-20, +19].
#[inline]
pub fn nice_to_weight(nice: i8) -> u32 {
    let nice = nice.clamp(NICE_MIN, NICE_MAX);
    WEIGHT_TABLE[(nice as i32 + 20) as usize]
}
