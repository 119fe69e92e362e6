//! # Static Heap
//!
//! The kernel heap grows into a statically reserved region placed in a
//! dedicated `.bss` section, so no page allocator has to exist before the
//! first `Box` is created.

use crate::global::LockedHeap;
use crate::page_provider::{BumpPageProvider, PageProvider, PageRegion};
use crate::tunables::KERNEL_TUNABLES;
use core::ptr::NonNull;
use kernel_info::memory::{KERNEL_HEAP_SIZE, PAGE_SIZE};

/// Heap storage, page aligned so the bump provider wastes nothing.
#[repr(align(4096))]
struct HeapMem([u8; KERNEL_HEAP_SIZE]);

const _: () = assert!(align_of::<HeapMem>() == PAGE_SIZE);

/// Backing storage for the kernel heap.
#[cfg_attr(target_os = "none", unsafe(link_section = ".bss.heap"))]
static mut HEAP_MEM: HeapMem = HeapMem([0; KERNEL_HEAP_SIZE]);

/// The kernel heap.
pub static KERNEL_HEAP: LockedHeap<StaticPages> =
    LockedHeap::new(StaticPages::new(), KERNEL_TUNABLES);

/// The process-wide kernel heap.
#[inline]
#[must_use]
pub fn kernel_heap() -> &'static LockedHeap<StaticPages> {
    &KERNEL_HEAP
}

/// Page provider over the static heap region.
///
/// The region is wrapped in a [`BumpPageProvider`] on the first request.
/// Only [`KERNEL_HEAP`] owns one.
pub struct StaticPages {
    pages: Option<BumpPageProvider>,
}

impl StaticPages {
    const fn new() -> Self {
        Self { pages: None }
    }

    /// Bytes of the static region not yet handed to the heap.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pages
            .as_ref()
            .map_or(KERNEL_HEAP_SIZE, BumpPageProvider::remaining)
    }
}

unsafe impl PageProvider for StaticPages {
    fn acquire(&mut self, size: usize) -> Option<PageRegion> {
        let pages = match &mut self.pages {
            Some(pages) => pages,
            none => {
                // Safety: only the address is taken; no reference to HEAP_MEM is formed.
                let base = NonNull::new(unsafe { (&raw mut HEAP_MEM.0) }.cast::<u8>())?;
                log::debug!("heap: static region at {base:p}, {KERNEL_HEAP_SIZE} bytes");
                // Safety: HEAP_MEM is only ever reached through the single
                // StaticPages owned by KERNEL_HEAP, which is behind its lock.
                none.insert(unsafe { BumpPageProvider::new(base, KERNEL_HEAP_SIZE, PAGE_SIZE) })
            }
        };
        pages.acquire(size)
    }
}
