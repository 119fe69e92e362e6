//! # Kernel synchronization primitives
//!
//! The kernel runs a single logical thread of control that timer and device
//! interrupts can preempt at any point. Code that mutates shared state
//! (most prominently the heap's free list) therefore needs two things at
//! once: mutual exclusion against other contexts and protection against
//! re-entry from an interrupt handler on the same core.
//!
//! * [`Mutex`] with a [`RawSpin`] lock provides the former.
//! * [`IrqGuard`] masks interrupts for a scope and restores the previous
//!   mask on every exit path.
//! * [`Mutex::lock_irq`] combines both into an [`IrqMutex`] guard.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

// Hosted builds emulate the interrupt mask with a thread-local.
#[cfg(not(target_os = "none"))]
extern crate std;

pub mod irq;
mod mutex;
mod raw_spin;

pub use irq::{IrqGuard, IrqMutex};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;

/// A [`Mutex`] backed by a test-and-test-and-set spin lock.
pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
}

pub trait RawUnlock {
    /// Releases the lock.
    ///
    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn raw_unlock(&self);
}
