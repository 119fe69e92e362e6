//! # Page providers
//!
//! The heap never maps memory itself. When its free list cannot satisfy a
//! request it asks a [`PageProvider`] for a fresh, page-aligned region and
//! carves chunks out of it. Regions are never handed back.

use core::ptr::NonNull;

/// A contiguous region of raw memory handed to the heap.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PageRegion {
    base: NonNull<u8>,
    len: usize,
}

impl PageRegion {
    /// Describe `len` bytes starting at `base`.
    ///
    /// # Safety
    /// `[base, base + len)` must be valid, writable memory that nothing else
    /// accesses for the rest of the program.
    #[inline]
    #[must_use]
    pub const unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    #[must_use]
    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Source of backing memory for the heap.
///
/// # Safety
/// Every region returned by [`acquire`](Self::acquire) must
/// - be at least `size` bytes long and aligned to the provider's page size,
/// - be valid and writable for the rest of the program,
/// - not overlap any previously returned region or any memory the provider
///   (or anyone else) still uses.
pub unsafe trait PageProvider {
    /// Obtain at least `size` bytes, or `None` when memory is exhausted.
    fn acquire(&mut self, size: usize) -> Option<PageRegion>;
}

/// Hands out page-granular slices of one fixed region, front to back.
///
/// Consecutive regions are adjacent, which lets the heap extend its current
/// arena instead of opening a new one.
#[derive(Debug)]
pub struct BumpPageProvider {
    /// Next free byte address (page aligned).
    next: usize,
    /// Exclusive end.
    end: usize,
    page_size: usize,
}

impl BumpPageProvider {
    /// Manage `[base, base + len)` in units of `page_size` bytes.
    ///
    /// The start is rounded up to the next page boundary and the end down.
    ///
    /// # Safety
    /// The range must be valid, writable and exclusive to this provider for
    /// the rest of the program. `page_size` must be a power of two.
    #[must_use]
    pub unsafe fn new(base: NonNull<u8>, len: usize, page_size: usize) -> Self {
        debug_assert!(page_size.is_power_of_two());
        let start = base.as_ptr() as usize;
        let end = start.saturating_add(len) & !(page_size - 1);
        let next = align_up(start, page_size).min(end);
        Self {
            next,
            end,
            page_size,
        }
    }

    /// Bytes still available.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.end - self.next
    }
}

unsafe impl PageProvider for BumpPageProvider {
    fn acquire(&mut self, size: usize) -> Option<PageRegion> {
        if size == 0 {
            return None;
        }
        let len = size.checked_add(self.page_size - 1)? & !(self.page_size - 1);
        if len > self.remaining() {
            log::warn!(
                "page provider exhausted: {len} bytes requested, {} left",
                self.remaining()
            );
            return None;
        }
        let base = NonNull::new(self.next as *mut u8)?;
        self.next += len;
        // Safety: the range lies inside the region we were given exclusively
        // and is never handed out twice.
        Some(unsafe { PageRegion::new(base, len) })
    }
}

/// Align `addr` upwards to `align` (must be a power of two).
#[inline]
pub(crate) const fn align_up(addr: usize, align: usize) -> usize {
    (addr + (align - 1)) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct Pages([u8; 4 * 4096]);

    #[test]
    fn hands_out_adjacent_page_multiples() {
        let mem = Box::leak(Box::new(Pages([0; 4 * 4096])));
        let base = NonNull::new(mem.0.as_mut_ptr()).unwrap();
        let mut p = unsafe { BumpPageProvider::new(base, mem.0.len(), 4096) };

        let a = p.acquire(100).unwrap();
        assert_eq!(a.len(), 4096);
        assert_eq!(a.addr(), base.as_ptr() as usize);

        let b = p.acquire(4097).unwrap();
        assert_eq!(b.len(), 8192);
        assert_eq!(b.addr(), a.addr() + a.len());

        assert_eq!(p.remaining(), 4096);
        assert!(p.acquire(8192).is_none(), "must not overrun the region");
        assert!(p.acquire(4096).is_some());
        assert!(p.acquire(1).is_none());
    }

    #[test]
    fn zero_and_overflowing_requests_fail() {
        let mem = Box::leak(Box::new(Pages([0; 4 * 4096])));
        let base = NonNull::new(mem.0.as_mut_ptr()).unwrap();
        let mut p = unsafe { BumpPageProvider::new(base, mem.0.len(), 512) };
        assert!(p.acquire(0).is_none());
        assert!(p.acquire(usize::MAX).is_none());
        assert_eq!(p.acquire(512).unwrap().len(), 512);
    }

    #[test]
    fn provider_can_move_behind_a_shared_heap_lock() {
        fn assert_send<T: Send>() {}
        assert_send::<BumpPageProvider>();
    }

    #[test]
    fn unaligned_base_is_rounded_in() {
        let mem = Box::leak(Box::new(Pages([0; 4 * 4096])));
        let base = NonNull::new(unsafe { mem.0.as_mut_ptr().add(8) }).unwrap();
        let p = unsafe { BumpPageProvider::new(base, 4 * 4096 - 8, 4096) };
        assert_eq!(p.remaining(), 3 * 4096);
    }
}
