//! Architecture-specific context switching.
//!
//! A [`Context`] is the saved execution point of a suspended thread: a stack
//! pointer, below which the switch primitive has pushed the callee-saved
//! register set. Switching threads means pushing the live callee-saved
//! registers onto the current stack, storing the stack pointer into the
//! outgoing context, loading the incoming context's stack pointer, popping
//! its registers, and returning. The return lands either after the incoming
//! thread's own last switch or, for a fresh thread, in the entry trampoline
//! its stack was prepared with.
//!
//! This is the one place the runtime steps outside ordinary memory safety:
//! it manipulates the program counter and stack directly. The scheduler
//! core is the single caller, and every call happens inside a critical
//! section with both control blocks owned by the thread table.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub(crate) use x86_64::{restore, switch, Context};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub(crate) use aarch64::{restore, switch, Context};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("sprig supports x86_64 and aarch64 hosts only");
