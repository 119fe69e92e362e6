//! # Heap tunables
//!
//! The granularities the heap works with. They are fixed when the heap is
//! constructed (for the kernel heap: at compile time, from `kernel-info`)
//! and validated in a `const fn`, so a bad combination fails the build.

use crate::chunk::{FREE_NODE_SIZE, HEADER_SIZE};
use kernel_info::heap::{BLOCK_SIZE, MIN_ALLOC_SIZE, MIN_SPLIT_SIZE};

/// What [`Heap::free`](crate::Heap::free) does with a released chunk.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FreePolicy {
    /// Leak: accept the pointer and keep no bookkeeping.
    Retain,
    /// Mark the chunk free, merge it with a free successor and push it onto
    /// the free list.
    Reclaim,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Tunables {
    /// Rounding unit and alignment of every chunk.
    pub min_alloc_size: usize,
    /// Smallest leftover that is split off as its own free chunk.
    pub min_split_size: usize,
    /// Unit of page-provider requests.
    pub block_size: usize,
    pub free_policy: FreePolicy,
}

/// The kernel heap's configuration.
pub const KERNEL_TUNABLES: Tunables =
    Tunables::new(MIN_ALLOC_SIZE, MIN_SPLIT_SIZE, BLOCK_SIZE, FreePolicy::Reclaim);

impl Tunables {
    /// # Panics
    /// If the granularities are inconsistent (at compile time when used in
    /// a `const`):
    /// - `min_alloc_size` must be a power of two of at least [`HEADER_SIZE`],
    /// - `min_split_size` must fit a free-list node,
    /// - `block_size` must be a non-zero multiple of `min_alloc_size`.
    #[must_use]
    pub const fn new(
        min_alloc_size: usize,
        min_split_size: usize,
        block_size: usize,
        free_policy: FreePolicy,
    ) -> Self {
        assert!(min_alloc_size.is_power_of_two());
        assert!(min_alloc_size >= HEADER_SIZE);
        assert!(min_split_size >= FREE_NODE_SIZE);
        assert!(block_size > 0 && block_size.is_multiple_of(min_alloc_size));
        Self {
            min_alloc_size,
            min_split_size,
            block_size,
            free_policy,
        }
    }

    #[must_use]
    pub const fn with_free_policy(self, free_policy: FreePolicy) -> Self {
        Self {
            free_policy,
            ..self
        }
    }

    /// Smallest chunk the heap ever hands out: one that can later hold a
    /// free-list node.
    #[inline]
    #[must_use]
    pub const fn min_chunk_size(&self) -> usize {
        round_up(FREE_NODE_SIZE, self.min_alloc_size)
    }

    /// Chunk size for a request of `size` bytes (header included), or
    /// `None` if rounding overflows.
    #[inline]
    #[must_use]
    pub const fn round_request(&self, size: usize) -> Option<usize> {
        let Some(padded) = size.checked_add(self.min_alloc_size - 1) else {
            return None;
        };
        let rounded = padded & !(self.min_alloc_size - 1);
        let min = self.min_chunk_size();
        Some(if rounded < min { min } else { rounded })
    }

    /// Bytes to request from the page provider for a chunk of `rounded`
    /// bytes: the next multiple of `block_size`.
    #[inline]
    #[must_use]
    pub const fn grow_size(&self, rounded: usize) -> Option<usize> {
        let Some(padded) = rounded.checked_add(self.block_size - 1) else {
            return None;
        };
        Some(padded / self.block_size * self.block_size)
    }

    /// Whether a free chunk of `available` bytes is split for a chunk of
    /// `rounded` bytes, rather than handed out whole.
    #[inline]
    #[must_use]
    pub const fn should_split(&self, rounded: usize, available: usize) -> bool {
        available - rounded >= self.min_split_size
    }

    /// Whether the tail of a freshly grown region of `len` bytes becomes a
    /// free chunk of its own after carving `rounded` bytes from its front.
    ///
    /// Stricter than [`should_split`](Self::should_split): a tail of exactly
    /// `min_split_size` bytes stays with the new chunk.
    #[inline]
    #[must_use]
    pub const fn should_split_region(&self, rounded: usize, len: usize) -> bool {
        len - rounded > self.min_split_size
    }
}

const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
