//! # Global allocation operators
//!
//! [`LockedHeap`] is the shareable face of a [`Heap`]: every entry point
//! masks interrupts and takes the spin lock for exactly the duration of the
//! heap call, so an interrupt handler that allocates can never observe a
//! half-updated free list.
//!
//! Callers get the payload pointer, which sits [`HEADER_SIZE`] bytes past
//! the chunk header.

use crate::chunk::HEADER_SIZE;
use crate::heap::{FreeError, Heap, HeapCheckError, HeapStats};
use crate::page_provider::PageProvider;
use crate::static_heap::kernel_heap;
use crate::tunables::Tunables;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use kernel_sync::SpinMutex;

/// Largest alignment the heap guarantees for payload pointers.
pub const MAX_ALIGN: usize = 16;

const _: () = assert!(HEADER_SIZE.is_multiple_of(MAX_ALIGN));

pub struct LockedHeap<P> {
    inner: SpinMutex<Heap<P>>,
}

impl<P> LockedHeap<P> {
    #[must_use]
    pub const fn new(provider: P, tunables: Tunables) -> Self {
        Self {
            inner: SpinMutex::new(Heap::new(provider, tunables)),
        }
    }

    /// Run `f` on the heap with interrupts masked and the lock held.
    pub fn with_heap<U>(&self, f: impl FnOnce(&mut Heap<P>) -> U) -> U {
        self.inner.with_lock_irq(f)
    }

    /// See [`Heap::check`].
    ///
    /// # Errors
    /// The first violated heap invariant.
    pub fn check(&self) -> Result<(), HeapCheckError> {
        self.with_heap(|heap| heap.check())
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.with_heap(|heap| heap.stats())
    }

    /// Return a payload obtained from [`allocate`](Self::allocate).
    ///
    /// Errors are logged and otherwise ignored.
    pub fn release(&self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        if let Err(e) = self.try_release(payload) {
            log::error!("heap: invalid free of {ptr:p}: {e}");
        }
    }

    /// Like [`release`](Self::release), but reports what was wrong with the
    /// pointer.
    ///
    /// # Errors
    /// See [`Heap::free`].
    pub fn try_release(&self, payload: NonNull<u8>) -> Result<(), FreeError> {
        let header = NonNull::new(payload.as_ptr().wrapping_sub(HEADER_SIZE))
            .ok_or(FreeError::ForeignPointer(payload.as_ptr() as usize))?;
        self.with_heap(|heap| heap.free(header))
    }

    /// Bytes the caller may use behind `payload`, if it is a live allocation.
    #[must_use]
    pub fn usable_size(&self, payload: NonNull<u8>) -> Option<usize> {
        let header = NonNull::new(payload.as_ptr().wrapping_sub(HEADER_SIZE))?;
        self.with_heap(|heap| heap.chunk_size(header))
            .map(|size| size - HEADER_SIZE)
    }
}

impl<P: PageProvider> LockedHeap<P> {
    /// Allocate `size` bytes, aligned to [`MAX_ALIGN`].
    ///
    /// Returns `None` when the request cannot be met; it never panics.
    #[must_use]
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let Some(total) = size.checked_add(HEADER_SIZE) else {
            log::warn!("heap: refusing allocation of {size} bytes");
            return None;
        };
        match self.with_heap(|heap| heap.alloc(total)) {
            // Safety: the chunk is at least HEADER_SIZE + size bytes long.
            Ok(block) => Some(unsafe { block.ptr.add(HEADER_SIZE) }),
            Err(e) => {
                log::warn!("heap: allocation of {size} bytes failed: {e}");
                None
            }
        }
    }
}

unsafe impl<P: PageProvider + Send> GlobalAlloc for LockedHeap<P> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_ALIGN {
            log::warn!("heap: alignment {} is not supported", layout.align());
            return ptr::null_mut();
        }
        self.allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.release(ptr);
    }

    /// Grows or shrinks in place while the chunk is large enough.
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if let Some(payload) = NonNull::new(ptr)
            && self.usable_size(payload).is_some_and(|usable| new_size <= usable)
        {
            return ptr;
        }

        // Safety: `layout.align()` was valid for the original allocation.
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { self.alloc(new_layout) };
        if !new_ptr.is_null() {
            // Safety: both blocks are valid for the copied length and distinct.
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
        }
        new_ptr
    }
}

/// The kernel's global allocator.
///
/// Zero-sized; every call forwards to [`kernel_heap()`]. The kernel binary
/// installs it with `#[global_allocator]`.
#[derive(Copy, Clone, Default, Debug)]
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { kernel_heap().alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { kernel_heap().dealloc(ptr, layout) }
    }

    /// Zeroing is performed after allocation succeeds.
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        unsafe { kernel_heap().realloc(ptr, layout, new_size) }
    }
}
