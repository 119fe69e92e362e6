//! Lock-protected cell shared by the heap and its interrupt-masking wrapper.
//!
//! The lock algorithm is a type parameter so the same cell works over any
//! [`RawLock`]; the kernel only instantiates it with
//! [`RawSpin`](crate::RawSpin) through [`SpinMutex`](crate::SpinMutex).

use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A value of type `T` reachable only while the raw lock `R` is held.
pub struct Mutex<T, R> {
    raw: R,
    value: UnsafeCell<T>,
}

// Safety: the raw lock serializes every access to `value`, so sharing the
// mutex only ever hands `T` to one context at a time.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    /// Wrap `value` behind an already constructed raw lock.
    #[must_use]
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            value: UnsafeCell::new(value),
        }
    }

    /// Exclusive borrow proves nobody else holds the lock.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    #[inline]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    /// Spin until the lock is ours.
    #[inline]
    #[must_use]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { mutex: self }
    }

    /// The guard, or `None` if another context holds the lock.
    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw
            .raw_try_lock()
            .then(|| MutexGuard { mutex: self })
    }

    /// Run `f` with the lock held; it is released when `f` returns or
    /// unwinds.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.lock())
    }
}

/// Proof that the lock of a [`Mutex`] is held. Unlocks on drop.
pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    mutex: &'a Mutex<T, R>,
}

impl<T, R: RawUnlock> Deref for MutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard exists only while the lock is held.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T, R: RawUnlock> DerefMut for MutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above, and `&mut self` rules out a second borrow.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T, R: RawUnlock> Drop for MutexGuard<'_, T, R> {
    fn drop(&mut self) {
        // Safety: this guard took the lock.
        unsafe { self.mutex.raw.raw_unlock() }
    }
}
