//! # Scoped interrupt masking
//!
//! The kernel's shared data structures are not reentrant. A handler that
//! runs while the interrupted code is halfway through relinking a list will
//! observe (and corrupt) a half-updated structure. [`IrqGuard`] turns the
//! "no interrupts inside this section" rule into a value: constructing it
//! masks IRQs, dropping it restores whatever mask was in effect before.
//!
//! # Platform
//!
//! | Target                        | Mask bit   | Mask / unmask               |
//! |-------------------------------|------------|-----------------------------|
//! | `aarch64`, bare metal         | `DAIF.I`   | `msr daifset/daifclr, #2`   |
//! | `arm` (ARMv6/v7), bare metal  | `CPSR.I`   | `cpsid i` / `cpsie i`       |
//! | hosted targets                | emulated   | a per-thread flag           |
//!
//! The hosted variant exists so the guard logic can be exercised by tests;
//! it does not touch real interrupt state.
//!
//! # Safety & Privilege
//!
//! On bare metal these instructions must run at a privilege level that may
//! change the interrupt mask (EL1 and above, or a privileged ARM mode).

use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::ops::{Deref, DerefMut};

/// A mutex guard that also masks interrupts while held.
///
/// Created via [`Mutex::lock_irq`]. Interrupts are masked before the lock is
/// taken and restored only after the lock has been released, so a handler
/// can never spin on a lock held by the code it interrupted.
///
/// # Examples
///
/// ```
/// use kernel_sync::SpinMutex;
///
/// static M: SpinMutex<u64> = SpinMutex::new(0);
///
/// {
///     let mut g = M.lock_irq();
///     *g += 1;
/// }
/// // mutex released, interrupt mask restored
/// ```
pub struct IrqMutex<'a, T, R: RawLock + RawUnlock> {
    // Field order is drop order: unlock first, then restore interrupts.
    g: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> Deref for IrqMutex<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.g
    }
}

impl<T, R: RawLock + RawUnlock> DerefMut for IrqMutex<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.g
    }
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Acquires the mutex with interrupts masked for the guard's lifetime.
    #[inline]
    #[must_use]
    pub fn lock_irq(&self) -> IrqMutex<'_, T, R> {
        let irq = IrqGuard::new();
        let g = self.lock();
        IrqMutex { g, _irq: irq }
    }

    /// Runs `f` with the mutex held and interrupts masked.
    ///
    /// Both are released when `f` returns or unwinds.
    #[inline]
    pub fn with_lock_irq<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut g = self.lock_irq();
        f(&mut g)
    }
}

/// Returns whether IRQs are currently unmasked.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    arch::interrupts_enabled()
}

/// Masks IRQs.
#[inline]
pub fn disable_interrupts() {
    arch::disable_interrupts();
}

/// Unmasks IRQs.
#[inline]
pub fn enable_interrupts() {
    arch::enable_interrupts();
}

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// Guards nest: an inner guard created while interrupts are already masked
/// leaves them masked on drop, only the outermost guard unmasks.
///
/// # Examples
///
/// ```
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were unmasked when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether this guard will unmask interrupts when dropped.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}

// No `nomem` on mask changes: they must also act as compiler barriers so
// memory accesses of the critical section stay between them.

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod arch {
    use core::arch::asm;

    /// `DAIF.I`, set while IRQs are masked.
    const DAIF_I: u64 = 1 << 7;

    #[inline]
    pub fn interrupts_enabled() -> bool {
        let daif: u64;
        unsafe { asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack, preserves_flags)) }
        daif & DAIF_I == 0
    }

    #[inline]
    pub fn disable_interrupts() {
        unsafe { asm!("msr daifset, #2", options(nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enable_interrupts() {
        unsafe { asm!("msr daifclr, #2", options(nostack, preserves_flags)) }
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod arch {
    use core::arch::asm;

    /// `CPSR.I`, set while IRQs are masked.
    const CPSR_I: u32 = 1 << 7;

    #[inline]
    pub fn interrupts_enabled() -> bool {
        let cpsr: u32;
        unsafe { asm!("mrs {}, cpsr", out(reg) cpsr, options(nomem, nostack, preserves_flags)) }
        cpsr & CPSR_I == 0
    }

    #[inline]
    pub fn disable_interrupts() {
        unsafe { asm!("cpsid i", options(nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enable_interrupts() {
        unsafe { asm!("cpsie i", options(nostack, preserves_flags)) }
    }
}

#[cfg(all(target_os = "none", not(any(target_arch = "aarch64", target_arch = "arm"))))]
compile_error!("kernel-sync: interrupt masking is only implemented for ARM targets");

#[cfg(not(target_os = "none"))]
mod arch {
    use core::cell::Cell;

    std::thread_local! {
        // The mask is per-core state; on hosted targets each thread plays one core.
        static ENABLED: Cell<bool> = const { Cell::new(true) };
    }

    #[inline]
    pub fn interrupts_enabled() -> bool {
        ENABLED.with(Cell::get)
    }

    #[inline]
    pub fn disable_interrupts() {
        ENABLED.with(|e| e.set(false));
    }

    #[inline]
    pub fn enable_interrupts() {
        ENABLED.with(|e| e.set(true));
    }
}
