//! x86_64 (System V) context switching.
//!
//! The switch frame holds the six callee-saved general-purpose registers.
//! Frame layout, ascending from the saved stack pointer:
//!
//! ```text
//! sp + 0x00  r15
//! sp + 0x08  r14
//! sp + 0x10  r13
//! sp + 0x18  r12
//! sp + 0x20  rbx
//! sp + 0x28  rbp
//! sp + 0x30  return address
//! ```

use core::arch::global_asm;
use core::ptr;

/// Saved execution point: the stack pointer left by `sprig_context_switch`.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct Context {
    sp: usize,
}

impl Context {
    /// A context that has never been saved to. Only valid as the `from` side
    /// of a first switch.
    pub const fn empty() -> Self {
        Self { sp: 0 }
    }

    /// Prepare a fresh context so the first switch into it enters `entry`
    /// on the given stack.
    ///
    /// The System V ABI wants `rsp % 16 == 8` at function entry (as if a
    /// `call` had just pushed the return address), so the frame leaves one
    /// slot above the entry address; it doubles as the trampoline's fake
    /// return address and is never popped.
    ///
    /// # Safety
    ///
    /// `stack_top` must be the top of a live stack with at least 64 usable
    /// bytes below it; `entry` must be the address of an `extern "C"`
    /// function taking no arguments.
    pub unsafe fn prepare(&mut self, stack_top: *mut u8, entry: usize) {
        let top = (stack_top as usize) & !15;
        let frame = (top - 64) as *mut usize;
        ptr::write_bytes(frame, 0, 8);
        *frame.add(6) = entry;
        self.sp = frame as usize;
    }
}

/// Save the live register set into `from` and resume `to`.
///
/// Returns only when `from` is switched back to.
///
/// # Safety
///
/// Both contexts must belong to live thread control blocks, `to` must have
/// been prepared or previously saved, and the caller must hold the critical
/// section.
#[inline]
pub(crate) unsafe fn switch(from: &mut Context, to: &Context) {
    sprig_context_switch(&mut from.sp, &to.sp);
}

/// Resume `to` without saving the current execution point.
///
/// # Safety
///
/// As for [`switch`]; the calling stack frame is abandoned forever.
#[inline]
pub(crate) unsafe fn restore(to: &Context) -> ! {
    sprig_context_restore(&to.sp)
}

extern "C" {
    fn sprig_context_switch(from_sp: *mut usize, to_sp: *const usize);
    fn sprig_context_restore(to_sp: *const usize) -> !;
}

global_asm!(
    "
    .text
    .globl sprig_context_switch
sprig_context_switch:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15

    mov [rdi], rsp
    mov rsp, [rsi]

    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret

    .globl sprig_context_restore
sprig_context_restore:
    mov rsp, [rdi]
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret
    "
);
