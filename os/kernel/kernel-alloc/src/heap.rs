//! # Heap engine
//!
//! [`Heap`] ties together the arena table, the free list and a page
//! provider:
//!
//! * **Allocation** rounds the request, scans the free list first-fit, and
//!   either hands out a whole free chunk or splits it. On a miss it grows by
//!   a block-granular region from the page provider.
//! * **Deallocation** follows the configured [`FreePolicy`].
//!
//! `Heap` does no locking and is not reentrant; the kernel wraps it in a
//! [`LockedHeap`](crate::LockedHeap), which masks interrupts around every
//! call.

use crate::arena::ArenaSet;
use crate::chunk::{ChunkHeader, ChunkRef, HEADER_SIZE, MAX_CHUNK_SIZE, Status};
use crate::free_list::{FreeList, FreeListError};
use crate::page_provider::PageProvider;
use crate::tunables::{FreePolicy, Tunables};
use core::ptr::NonNull;

/// A chunk handed out by [`Heap::alloc`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Block {
    pub chunk: ChunkRef,
    /// Address of the chunk header.
    pub ptr: NonNull<u8>,
    /// Total bytes of the chunk, header included. At least the request.
    pub size: usize,
}

/// One chunk as seen by [`Heap::walk`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ChunkInfo {
    pub chunk: ChunkRef,
    pub size: usize,
    pub status: Status,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct HeapStats {
    /// Arenas adopted from the page provider.
    pub arenas: usize,
    /// Bytes adopted from the page provider.
    pub backing_bytes: usize,
    /// Bytes in chunks currently handed out (headers included).
    pub in_use_bytes: usize,
    /// Chunks currently handed out.
    pub live_allocations: usize,
    /// Bytes on the free list.
    pub free_bytes: usize,
    /// Chunks on the free list.
    pub free_chunks: usize,
    /// Successful page-provider requests.
    pub grow_calls: usize,
}

pub struct Heap<P> {
    arenas: ArenaSet,
    free: FreeList,
    provider: P,
    tunables: Tunables,
    in_use_bytes: usize,
    live_allocations: usize,
    grow_calls: usize,
}

impl<P> Heap<P> {
    /// An empty heap; nothing is acquired until the first allocation.
    #[must_use]
    pub const fn new(provider: P, tunables: Tunables) -> Self {
        Self {
            arenas: ArenaSet::new(),
            free: FreeList::new(),
            provider,
            tunables,
            in_use_bytes: 0,
            live_allocations: 0,
            grow_calls: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    #[inline]
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    #[inline]
    #[must_use]
    pub const fn free_list(&self) -> &FreeList {
        &self.free
    }

    #[inline]
    #[must_use]
    pub const fn arenas(&self) -> &ArenaSet {
        &self.arenas
    }

    /// Free chunks in list order, as `(chunk, size)`.
    #[must_use]
    pub fn free_chunks(&self) -> impl Iterator<Item = (ChunkRef, usize)> + '_ {
        self.free.iter(&self.arenas)
    }

    /// Address of a chunk's header.
    #[must_use]
    pub fn address(&self, chunk: ChunkRef) -> NonNull<u8> {
        self.arenas.address(chunk)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let (free_chunks, free_bytes) = self
            .free_chunks()
            .fold((0, 0), |(n, bytes), (_, size)| (n + 1, bytes + size));
        HeapStats {
            arenas: self.arenas.len(),
            backing_bytes: self.arenas.total_bytes(),
            in_use_bytes: self.in_use_bytes,
            live_allocations: self.live_allocations,
            free_bytes,
            free_chunks,
            grow_calls: self.grow_calls,
        }
    }

    /// Every chunk of every arena, in address order within each arena.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            arenas: &self.arenas,
            arena: 0,
            offset: 0,
        }
    }

    /// Verify the free-list invariants and that the arenas are tiled by
    /// chunk headers whose free members match the free list.
    ///
    /// # Errors
    /// The first violated invariant.
    pub fn check(&self) -> Result<(), HeapCheckError> {
        self.free.check(&self.arenas)?;

        let mut free_seen = 0;
        for info in self.walk() {
            match info.status {
                Status::Invalid => return Err(HeapCheckError::CorruptHeader(info.chunk)),
                _ if info.size == 0 || !self.arenas.contains(info.chunk, info.size) => {
                    return Err(HeapCheckError::BadChunkSize(info.chunk, info.size));
                }
                Status::Free => free_seen += 1,
                Status::InUse => {}
            }
        }
        if free_seen != self.free.len() {
            return Err(HeapCheckError::StrayFreeChunks {
                listed: self.free.len(),
                found: free_seen,
            });
        }
        Ok(())
    }

    /// Release the chunk whose header is at `ptr`.
    ///
    /// Under [`FreePolicy::Retain`] this keeps no bookkeeping and leaks the
    /// chunk. Under [`FreePolicy::Reclaim`] the chunk is validated, merged
    /// with its successor when that one is free, and pushed onto the free
    /// list. Validation walks the arena's headers up to `ptr`, so a pointer
    /// into a payload is refused even when the bytes there look like a
    /// header.
    ///
    /// # Errors
    /// Only under [`FreePolicy::Reclaim`]: [`FreeError::ForeignPointer`] if
    /// `ptr` is outside every arena, [`FreeError::Misaligned`] if it is not
    /// on a chunk boundary, [`FreeError::DoubleFree`] if the chunk is
    /// already free and [`FreeError::CorruptHeader`] if it carries no valid
    /// header.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        if self.tunables.free_policy == FreePolicy::Retain {
            log::trace!("heap: free({ptr:p}) retained");
            return Ok(());
        }

        let addr = ptr.as_ptr() as usize;
        let chunk = self
            .arenas
            .locate(addr)
            .ok_or(FreeError::ForeignPointer(addr))?;
        if !chunk.offset().is_multiple_of(self.tunables.min_alloc_size) {
            return Err(FreeError::Misaligned(addr));
        }
        let mut size = match self.arenas.load_header(chunk) {
            Some(ChunkHeader { size, .. }) if !self.arenas.contains(chunk, size) => {
                return Err(FreeError::CorruptHeader(addr));
            }
            Some(h) if h.status() == Status::InUse => h.size,
            Some(_) => return Err(FreeError::DoubleFree(addr)),
            None => return Err(FreeError::CorruptHeader(addr)),
        };
        if !self.on_chunk_boundary(chunk) {
            return Err(FreeError::Misaligned(addr));
        }
        self.in_use_bytes -= size;
        self.live_allocations -= 1;

        let next = chunk.advance(size);
        if self.arenas.contains(next, self.tunables.min_chunk_size())
            && let Some(h) = self.arenas.load_header(next)
            && h.status() == Status::Free
        {
            self.free.remove_from_free_list(&mut self.arenas, next);
            size += h.size;
            log::trace!("heap: merged {chunk:?} with free successor {next:?}");
        }

        self.free.add_to_free_list(&mut self.arenas, chunk, size);
        self.debug_check();
        Ok(())
    }

    /// Bytes of `block` past its header.
    #[inline]
    #[must_use]
    pub const fn usable_size(block: &Block) -> usize {
        block.size - HEADER_SIZE
    }

    /// Size of the in-use chunk whose header is at `ptr`.
    #[must_use]
    pub fn chunk_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        let chunk = self.arenas.locate(ptr.as_ptr() as usize)?;
        if !chunk.offset().is_multiple_of(self.tunables.min_alloc_size) {
            return None;
        }
        self.arenas
            .load_header(chunk)
            .filter(|h| h.status() == Status::InUse && self.arenas.contains(chunk, h.size))
            .filter(|_| self.on_chunk_boundary(chunk))
            .map(|h| h.size)
    }

    /// Whether stepping from the start of `chunk`'s arena header by header
    /// lands exactly on `chunk`.
    fn on_chunk_boundary(&self, chunk: ChunkRef) -> bool {
        let mut at = ChunkRef::new(chunk.arena(), 0);
        while at.offset() < chunk.offset() {
            match self.arenas.load_header(at) {
                Some(h) if h.size != 0 && self.arenas.contains(at, h.size) => {
                    at = at.advance(h.size);
                }
                _ => return false,
            }
        }
        at == chunk
    }

    fn debug_check(&self) {
        if cfg!(debug_assertions)
            && let Err(e) = self.free.check(&self.arenas)
        {
            panic!("heap invariant violated: {e}");
        }
    }
}

impl<P: PageProvider> Heap<P> {
    /// Allocate a chunk of at least `requested` bytes (header included).
    ///
    /// # Errors
    /// [`HeapError::SizeOverflow`] if the request cannot be encoded,
    /// [`HeapError::OutOfMemory`] if the page provider is exhausted,
    /// [`HeapError::UnusableRegion`] if it returned a short or ragged region,
    /// and the arena errors of [`ArenaSet::adopt`]. A region refused this
    /// way is not returned to the provider.
    pub fn alloc(&mut self, requested: usize) -> Result<Block, HeapError> {
        let rounded = self
            .tunables
            .round_request(requested)
            .filter(|&r| r as u64 <= MAX_CHUNK_SIZE)
            .ok_or(HeapError::SizeOverflow(requested))?;

        let block = match self.first_fit(rounded) {
            Some((chunk, available)) => self.take(chunk, available, rounded),
            None => self.grow(rounded)?,
        };

        self.in_use_bytes += block.size;
        self.live_allocations += 1;
        self.debug_check();
        log::trace!(
            "heap: alloc({requested}) -> {:?} ({} bytes)",
            block.chunk,
            block.size
        );
        Ok(block)
    }

    /// The first free chunk, in list order, of at least `rounded` bytes.
    fn first_fit(&self, rounded: usize) -> Option<(ChunkRef, usize)> {
        self.free_chunks().find(|&(_, size)| size >= rounded)
    }

    /// Hand out (part of) the free chunk `chunk` of `available` bytes.
    fn take(&mut self, chunk: ChunkRef, available: usize, rounded: usize) -> Block {
        let size = if self.tunables.should_split(rounded, available) {
            self.free.split_free_block(&mut self.arenas, chunk, rounded);
            rounded
        } else {
            // The leftover is too small to be useful on its own; the chunk
            // keeps its full size.
            self.free.remove_from_free_list(&mut self.arenas, chunk);
            self.arenas.store_header(chunk, &ChunkHeader::in_use(available));
            available
        };
        Block {
            chunk,
            ptr: self.arenas.address(chunk),
            size,
        }
    }

    /// Acquire a block-granular region and carve a chunk of `rounded` bytes
    /// from its front.
    ///
    /// Page providers take nothing back, so a region that is refused after
    /// `acquire` returned it ([`HeapError::UnusableRegion`],
    /// [`HeapError::ArenaTableFull`], [`HeapError::MisalignedRegion`]) is lost
    /// for good.
    fn grow(&mut self, rounded: usize) -> Result<Block, HeapError> {
        let want = self
            .tunables
            .grow_size(rounded)
            .ok_or(HeapError::SizeOverflow(rounded))?;
        let Some(region) = self.provider.acquire(want) else {
            log::warn!("heap: page provider cannot supply {want} bytes");
            return Err(HeapError::OutOfMemory(want));
        };
        if region.len() < want || !region.len().is_multiple_of(self.tunables.min_alloc_size) {
            log::error!(
                "heap: dropping {} bytes at {:p}, {want} bytes were requested",
                region.len(),
                region.base()
            );
            return Err(HeapError::UnusableRegion {
                requested: want,
                got: region.len(),
            });
        }
        let adopted = self.arenas.adopt(region).inspect_err(|e| {
            log::error!("heap: dropping {} bytes at {:p}: {e}", region.len(), region.base());
        })?;
        self.grow_calls += 1;
        log::debug!(
            "heap: grew by {} bytes at {:p} ({:?}{})",
            region.len(),
            region.base(),
            adopted.start,
            if adopted.extended { ", extended" } else { "" }
        );

        let chunk = adopted.start;
        let len = region.len();
        let size = if self.tunables.should_split_region(rounded, len) {
            self.free
                .add_to_free_list(&mut self.arenas, chunk.advance(rounded), len - rounded);
            rounded
        } else {
            len
        };
        self.arenas.store_header(chunk, &ChunkHeader::in_use(size));
        Ok(Block {
            chunk,
            ptr: self.arenas.address(chunk),
            size,
        })
    }
}

/// Iterator returned by [`Heap::walk`].
pub struct Walk<'a> {
    arenas: &'a ArenaSet,
    arena: u16,
    offset: usize,
}

impl Iterator for Walk<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        loop {
            let len = self.arenas.arena_len(self.arena)?;
            if self.offset >= len {
                self.arena += 1;
                self.offset = 0;
                continue;
            }
            let chunk = ChunkRef::new(self.arena, self.offset);
            let info = match self.arenas.load_header(chunk) {
                Some(h) => ChunkInfo {
                    chunk,
                    size: h.size,
                    status: h.status(),
                },
                None => ChunkInfo {
                    chunk,
                    size: 0,
                    status: Status::Invalid,
                },
            };
            if info.size == 0 || !self.arenas.contains(chunk, info.size) {
                // Cannot step past a broken header; skip the rest of the arena.
                self.offset = len;
            } else {
                self.offset += info.size;
            }
            return Some(info);
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("allocation of {0} bytes exceeds the chunk size encoding")]
    SizeOverflow(usize),
    #[error("page provider could not supply {0} bytes")]
    OutOfMemory(usize),
    #[error("page provider returned {got} bytes for a request of {requested}")]
    UnusableRegion { requested: usize, got: usize },
    #[error("arena table is full")]
    ArenaTableFull,
    #[error("page provider returned misaligned region at {0:#x}")]
    MisalignedRegion(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    #[error("{0:#x} is not inside the heap")]
    ForeignPointer(usize),
    #[error("{0:#x} is not a chunk boundary")]
    Misaligned(usize),
    #[error("{0:#x} is already free")]
    DoubleFree(usize),
    #[error("{0:#x} does not carry a valid chunk header")]
    CorruptHeader(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapCheckError {
    #[error(transparent)]
    FreeList(#[from] FreeListError),
    #[error("chunk {0:?} has an invalid header")]
    CorruptHeader(ChunkRef),
    #[error("chunk {0:?} claims {1} bytes, which do not fit its arena")]
    BadChunkSize(ChunkRef, usize),
    #[error("{found} free chunks in the arenas, {listed} on the free list")]
    StrayFreeChunks { listed: usize, found: usize },
}
