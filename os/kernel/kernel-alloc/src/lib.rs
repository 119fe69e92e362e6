//! # Kernel Heap Allocator
//!
//! The kernel's dynamic memory: a first-fit allocator over an intrusive,
//! doubly linked free list, backed by page-granular regions from a
//! [`PageProvider`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        KernelAllocator / LockedHeap (global)        │
//! │    • GlobalAlloc, allocate / release                │
//! │    • Interrupts masked around every call            │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Heap (engine)                       │
//! │    • Rounding, first-fit, split, growth             │
//! │    • Free policy, coalescing, invariant checks      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          FreeList  ·  ArenaSet  ·  chunk headers    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │     PageProvider (BumpPageProvider, StaticPages)    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Chunks
//!
//! Every chunk starts with a [`HEADER_SIZE`]-byte header holding its total
//! size and a status tag. Free chunks additionally carry the links of the
//! free list in their first payload bytes, so a free chunk is never smaller
//! than [`FREE_NODE_SIZE`]. Links are encoded as arena index plus offset
//! ([`ChunkRef`]) rather than raw pointers.
//!
//! ## Usage
//!
//! ```
//! use core::ptr::NonNull;
//! use kernel_alloc::{BumpPageProvider, FreePolicy, LockedHeap, Tunables};
//!
//! #[repr(align(4096))]
//! struct Pages([u8; 8192]);
//! let mem = Box::leak(Box::new(Pages([0; 8192])));
//! let base = NonNull::new(mem.0.as_mut_ptr()).unwrap();
//!
//! let provider = unsafe { BumpPageProvider::new(base, 8192, 4096) };
//! let heap = LockedHeap::new(provider, Tunables::new(16, 64, 4096, FreePolicy::Reclaim));
//!
//! let p = heap.allocate(100).unwrap();
//! heap.release(p.as_ptr());
//! assert!(heap.check().is_ok());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod arena;
mod chunk;
mod free_list;
mod global;
mod heap;
mod page_provider;
mod static_heap;
mod tunables;

pub use arena::{ARENA_ALIGN, Adopted, ArenaSet, MAX_ARENAS};
pub use chunk::{ChunkHeader, ChunkRef, ChunkState, FREE_NODE_SIZE, HEADER_SIZE, Status};
pub use free_list::{FreeList, FreeListError};
pub use global::{KernelAllocator, LockedHeap, MAX_ALIGN};
pub use heap::{Block, ChunkInfo, FreeError, Heap, HeapCheckError, HeapError, HeapStats, Walk};
pub use page_provider::{BumpPageProvider, PageProvider, PageRegion};
pub use static_heap::{KERNEL_HEAP, StaticPages, kernel_heap};
pub use tunables::{FreePolicy, KERNEL_TUNABLES, Tunables};
