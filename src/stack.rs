//! Guarded stack provisioning.
//!
//! Each spawned thread gets an anonymous mapping with an inaccessible guard
//! page at its low address, so a stack overflow faults instead of silently
//! corrupting the neighboring allocation. If the mapping cannot be
//! established the allocator falls back to a plain heap allocation without
//! a guard. The main thread runs on the host stack and never goes through
//! this module.

use core::ptr;
use std::alloc::{self, Layout};

use crate::config::GUARD_SIZE;
use crate::error::{Result, SprigError};

/// An owned stack region. Dropping it unmaps (or deallocates) the memory.
///
/// Layout with a guard:
///
/// ```text
/// guard (PROT_NONE)   usable stack, grows down
/// [----GUARD_SIZE----][---------size---------]
/// ^ mapping start     ^ base                  ^ top
/// ```
pub(crate) struct StackRegion {
    base: *mut u8,
    size: usize,
    /// Start of the full mapping when guarded; null for the heap fallback.
    guard: *mut u8,
}

// Stacks are handed between the creating thread and the scheduler; all
// access is serialized by the single-runner discipline.
unsafe impl Send for StackRegion {}

impl StackRegion {
    /// Allocate a stack of `size` usable bytes plus a guard page.
    ///
    /// # Errors
    ///
    /// Returns [`SprigError::OutOfMemory`] if both the guarded mapping and
    /// the plain fallback allocation fail.
    pub fn allocate(size: usize) -> Result<Self> {
        let total = size + GUARD_SIZE;
        unsafe {
            let region = libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if region == libc::MAP_FAILED {
                return Self::allocate_plain(size);
            }
            if libc::mprotect(region, GUARD_SIZE, libc::PROT_NONE) != 0 {
                libc::munmap(region, total);
                return Err(SprigError::OutOfMemory);
            }
            Ok(Self {
                base: (region as *mut u8).add(GUARD_SIZE),
                size,
                guard: region as *mut u8,
            })
        }
    }

    /// Heap fallback without a guard page.
    fn allocate_plain(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, 16).map_err(|_| SprigError::InvalidArgument)?;
        let base = unsafe { alloc::alloc(layout) };
        if base.is_null() {
            return Err(SprigError::OutOfMemory);
        }
        Ok(Self {
            base,
            size,
            guard: ptr::null_mut(),
        })
    }

    /// Highest address of the usable region; the initial stack pointer is
    /// derived from this.
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.size) }
    }

    /// Usable size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether a guard page protects the low end.
    #[inline]
    pub fn has_guard(&self) -> bool {
        !self.guard.is_null()
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        unsafe {
            if self.guard.is_null() {
                let layout = Layout::from_size_align_unchecked(self.size, 16);
                alloc::dealloc(self.base, layout);
            } else {
                libc::munmap(self.guard as *mut libc::c_void, self.size + GUARD_SIZE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_MIN;

    #[test]
    fn allocates_guarded_stack() {
        let stack = StackRegion::allocate(STACK_MIN).unwrap();
        assert!(stack.has_guard());
        assert_eq!(stack.size(), STACK_MIN);
        assert_eq!(stack.top() as usize - stack.base as usize, STACK_MIN);
    }

    #[test]
    fn stack_is_writable_to_the_top() {
        let stack = StackRegion::allocate(STACK_MIN).unwrap();
        unsafe {
            // Touch the first and last usable bytes.
            stack.base.write(0xAA);
            stack.top().sub(1).write(0x55);
            assert_eq!(stack.base.read(), 0xAA);
            assert_eq!(stack.top().sub(1).read(), 0x55);
        }
    }

    #[test]
    fn plain_fallback_allocates() {
        let stack = StackRegion::allocate_plain(STACK_MIN).unwrap();
        assert!(!stack.has_guard());
        assert_eq!(stack.size(), STACK_MIN);
    }
}
