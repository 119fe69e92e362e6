//! # Arenas
//!
//! The heap's backing memory is a small table of arenas, each one a
//! contiguous region adopted from the page provider. Chunks are named by
//! [`ChunkRef`] (arena index plus byte offset), so "the chunk after this
//! one" is `offset + size` inside the same arena rather than raw pointer
//! arithmetic, and a stray offset is caught by a bounds check instead of
//! scribbling over unrelated memory.
//!
//! This is also the only place that touches the raw header words; everyone
//! else goes through [`ChunkHeader`].

use crate::chunk::{
    ChunkHeader, ChunkRef, ChunkState, ChunkWord, Link, MAX_OFFSET, NEXT_WORD, PREV_WORD,
    SIZE_WORD, Status, WORD,
};
use crate::heap::HeapError;
use crate::page_provider::PageRegion;
use core::ptr::NonNull;

/// Capacity of the arena table.
pub const MAX_ARENAS: usize = 32;

/// Alignment every adopted region must have.
pub const ARENA_ALIGN: usize = 16;

#[derive(Copy, Clone, Debug)]
struct Arena {
    base: NonNull<u8>,
    len: usize,
}

impl Arena {
    #[inline]
    fn start(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    fn end(&self) -> usize {
        self.start() + self.len
    }
}

/// Where a freshly adopted region ended up.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Adopted {
    /// First byte of the region, as a chunk position.
    pub start: ChunkRef,
    /// Whether the region was appended to an existing arena.
    pub extended: bool,
}

/// Fixed-capacity table of arenas.
pub struct ArenaSet {
    arenas: [Option<Arena>; MAX_ARENAS],
    count: usize,
}

// Safety: the arenas are owned exclusively by the heap that owns this set.
unsafe impl Send for ArenaSet {}

impl Default for ArenaSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arenas: [None; MAX_ARENAS],
            count: 0,
        }
    }

    /// Number of arenas in use.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total bytes adopted so far.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.iter().map(|a| a.len).sum()
    }

    /// Length of arena `index`, if it exists.
    #[must_use]
    pub fn arena_len(&self, index: u16) -> Option<usize> {
        self.get(index).map(|a| a.len)
    }

    /// Take ownership of `region`.
    ///
    /// A region that starts exactly where the most recent arena ends is
    /// appended to it; otherwise it opens a new arena.
    ///
    /// # Errors
    /// [`HeapError::MisalignedRegion`] if the region is not
    /// [`ARENA_ALIGN`]-aligned, [`HeapError::ArenaTableFull`] if a new arena
    /// is needed and all slots are taken.
    pub fn adopt(&mut self, region: PageRegion) -> Result<Adopted, HeapError> {
        if !region.addr().is_multiple_of(ARENA_ALIGN) {
            return Err(HeapError::MisalignedRegion(region.addr()));
        }

        if let Some(last) = self.count.checked_sub(1)
            && let Some(arena) = self.arenas[last].as_mut()
            && arena.end() == region.addr()
            && (arena.len + region.len()) as u64 <= MAX_OFFSET
        {
            let start = ChunkRef::new(index_u16(last), arena.len);
            arena.len += region.len();
            return Ok(Adopted {
                start,
                extended: true,
            });
        }

        if self.count == MAX_ARENAS {
            return Err(HeapError::ArenaTableFull);
        }
        let index = self.count;
        self.arenas[index] = Some(Arena {
            base: region.base(),
            len: region.len(),
        });
        self.count += 1;
        Ok(Adopted {
            start: ChunkRef::new(index_u16(index), 0),
            extended: false,
        })
    }

    /// Map an address back to the chunk position it falls on.
    #[must_use]
    pub fn locate(&self, addr: usize) -> Option<ChunkRef> {
        self.iter()
            .enumerate()
            .find(|(_, a)| (a.start()..a.end()).contains(&addr))
            .map(|(i, a)| ChunkRef::new(index_u16(i), addr - a.start()))
    }

    /// Whether `bytes` bytes starting at `chunk` lie inside its arena.
    #[must_use]
    pub fn contains(&self, chunk: ChunkRef, bytes: usize) -> bool {
        self.get(chunk.arena())
            .is_some_and(|a| chunk.offset().checked_add(bytes).is_some_and(|end| end <= a.len))
    }

    /// Address of the first byte of `chunk`.
    ///
    /// # Panics
    /// If `chunk` does not lie inside an adopted arena.
    #[must_use]
    pub fn address(&self, chunk: ChunkRef) -> NonNull<u8> {
        let Some(arena) = self
            .get(chunk.arena())
            .filter(|a| chunk.offset() <= a.len)
        else {
            panic!("{chunk:?} outside every arena");
        };
        // Safety: offset is within the arena (or one past its end).
        unsafe { arena.base.add(chunk.offset()) }
    }

    /// Status bits of the header at `chunk`, without decoding anything else.
    #[must_use]
    pub fn load_status(&self, chunk: ChunkRef) -> Status {
        ChunkWord::from_bits(self.load_word(chunk, SIZE_WORD)).status()
    }

    /// Decode the header at `chunk`; `None` if it carries no valid status.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn load_header(&self, chunk: ChunkRef) -> Option<ChunkHeader> {
        let word = ChunkWord::from_bits(self.load_word(chunk, SIZE_WORD));
        let size = word.size() as usize;
        match word.status() {
            Status::InUse => Some(ChunkHeader::in_use(size)),
            Status::Free => {
                let next = Link::from_bits(self.load_word(chunk, NEXT_WORD)).decode();
                let prev = Link::from_bits(self.load_word(chunk, PREV_WORD)).decode();
                Some(ChunkHeader::free(size, next, prev))
            }
            Status::Invalid => None,
        }
    }

    /// Stamp `header` onto the memory at `chunk`.
    pub fn store_header(&mut self, chunk: ChunkRef, header: &ChunkHeader) {
        self.store_word(chunk, SIZE_WORD, header.size_word().into_bits());
        if let ChunkState::Free { next, prev } = header.state {
            self.store_word(chunk, NEXT_WORD, Link::encode(next).into_bits());
            self.store_word(chunk, PREV_WORD, Link::encode(prev).into_bits());
        }
    }

    fn load_word(&self, chunk: ChunkRef, index: usize) -> u64 {
        let ptr = self.word_ptr(chunk, index);
        // Safety: in bounds and 8-byte aligned (chunk offsets are multiples
        // of the minimum allocation size, arena bases of ARENA_ALIGN).
        unsafe { ptr.read() }
    }

    fn store_word(&mut self, chunk: ChunkRef, index: usize, value: u64) {
        let ptr = self.word_ptr(chunk, index);
        // Safety: see `load_word`; we own the arena exclusively.
        unsafe { ptr.write(value) }
    }

    #[allow(clippy::cast_ptr_alignment)]
    fn word_ptr(&self, chunk: ChunkRef, index: usize) -> *mut u64 {
        let at = index * WORD;
        assert!(
            self.contains(chunk.advance(at), WORD),
            "header word {index} of {chunk:?} outside its arena"
        );
        debug_assert!(chunk.offset().is_multiple_of(WORD));
        // Safety: bounds checked above.
        unsafe { self.address(chunk).add(at).cast::<u64>().as_ptr() }
    }

    fn get(&self, index: u16) -> Option<&Arena> {
        self.arenas.get(usize::from(index)).and_then(Option::as_ref)
    }

    fn iter(&self) -> impl Iterator<Item = &Arena> {
        self.arenas[..self.count].iter().flatten()
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn index_u16(index: usize) -> u16 {
    // MAX_ARENAS is far below u16::MAX.
    index as u16
}
