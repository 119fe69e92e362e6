//! # Heap Tunables
//!
//! Granularities of the kernel heap allocator. They are fixed at build time;
//! `kernel-alloc` validates them again when it builds its `Tunables`.

use crate::memory::{KERNEL_HEAP_SIZE, PAGE_SIZE};

/// Rounding unit of every chunk. Also the alignment of chunk headers.
pub const MIN_ALLOC_SIZE: usize = 16;

/// Smallest leftover that is split off into its own free chunk.
///
/// Anything smaller stays attached to the chunk handed out.
pub const MIN_SPLIT_SIZE: usize = 64;

/// Unit in which the heap requests memory from the page provider.
pub const BLOCK_SIZE: usize = 16 * PAGE_SIZE; // 64 KiB

const _: () = {
    assert!(MIN_ALLOC_SIZE.is_power_of_two());
    assert!(MIN_SPLIT_SIZE >= MIN_ALLOC_SIZE);
    assert!(BLOCK_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(BLOCK_SIZE.is_multiple_of(MIN_ALLOC_SIZE));
    assert!(KERNEL_HEAP_SIZE >= BLOCK_SIZE);
};
