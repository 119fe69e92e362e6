//! # Chunk headers
//!
//! Every block of memory the heap manages starts with a header. The header
//! records the chunk's total size (header included) and whether the chunk is
//! free or handed out. Free chunks additionally carry their free-list links
//! in the words that become payload once the chunk is in use:
//!
//! ```text
//!          word 0              word 1            word 2
//!  +-------------------+-------------------+-------------------+----
//!  | size:60 | status:4|   next (Link)     |   prev (Link)     | ...   Free
//!  +-------------------+-------------------+-------------------+----
//!  | size:60 | status:4|     (padding)     |  payload ...                InUse
//!  +-------------------+-------------------+--------------------------
//!  ^ chunk             ^ chunk + 8         ^ chunk + HEADER_SIZE
//! ```
//!
//! The raw words are only ever produced and consumed through
//! [`ChunkHeader`], whose [`ChunkState`] makes the "free-list node" versus
//! "opaque payload" interpretation explicit.

use bitfield_struct::bitfield;

/// Bytes reserved at the front of every in-use chunk.
///
/// Two words so that payloads keep the 16-byte alignment of chunk headers.
pub const HEADER_SIZE: usize = 16;

/// Bytes a free chunk needs for its header and both links.
pub const FREE_NODE_SIZE: usize = 3 * WORD;

/// Largest chunk size the header can encode.
pub const MAX_CHUNK_SIZE: u64 = (1 << 60) - 1;

/// Largest chunk offset a [`Link`] can encode.
pub const MAX_OFFSET: u64 = (1 << 48) - 1;

pub(crate) const WORD: usize = size_of::<u64>();

/// Word index of the size/status word.
pub(crate) const SIZE_WORD: usize = 0;
/// Word index of the `next` link of a free chunk.
pub(crate) const NEXT_WORD: usize = 1;
/// Word index of the `prev` link of a free chunk.
pub(crate) const PREV_WORD: usize = 2;

/// Allocation status stored in the low bits of the header word.
///
/// The two valid encodings are far apart in Hamming distance so that a
/// header overwritten with payload rarely decodes as a valid status.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Status {
    /// Linked into the free list.
    Free = 0b1010,
    /// Handed out to a caller.
    InUse = 0b0101,
    /// Neither encoding; the header is not a chunk header (or was trampled).
    Invalid = 0b0000,
}

impl Status {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        match bits {
            0b1010 => Self::Free,
            0b0101 => Self::InUse,
            _ => Self::Invalid,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u64 {
        self as u64
    }
}

/// Raw header word: status in bits 0..4, total size in bits 4..64.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub(crate) struct ChunkWord {
    #[bits(4)]
    pub status: Status,
    #[bits(60)]
    pub size: u64,
}

/// Raw encoding of an optional [`ChunkRef`].
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub(crate) struct Link {
    #[bits(48)]
    pub offset: u64,
    #[bits(15)]
    pub arena: u16,
    pub present: bool,
}

impl Link {
    pub(crate) const NONE: Self = Self::new();

    #[inline]
    pub(crate) const fn encode(chunk: Option<ChunkRef>) -> Self {
        match chunk {
            None => Self::NONE,
            Some(c) => Self::new()
                .with_offset(c.offset as u64)
                .with_arena(c.arena)
                .with_present(true),
        }
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn decode(self) -> Option<ChunkRef> {
        if self.present() {
            Some(ChunkRef::new(self.arena(), self.offset() as usize))
        } else {
            None
        }
    }
}

/// Handle naming a chunk by its arena and its byte offset into that arena.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ChunkRef {
    arena: u16,
    offset: usize,
}

impl ChunkRef {
    #[inline]
    #[must_use]
    pub const fn new(arena: u16, offset: usize) -> Self {
        Self { arena, offset }
    }

    #[inline]
    #[must_use]
    pub const fn arena(self) -> u16 {
        self.arena
    }

    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    /// The chunk starting `bytes` after this one in the same arena.
    #[inline]
    #[must_use]
    pub const fn advance(self, bytes: usize) -> Self {
        Self::new(self.arena, self.offset + bytes)
    }
}

/// How the memory behind a header is currently interpreted.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ChunkState {
    /// A free-list node.
    Free {
        next: Option<ChunkRef>,
        prev: Option<ChunkRef>,
    },
    /// Opaque payload owned by a caller.
    InUse,
}

/// Decoded chunk header.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ChunkHeader {
    /// Total bytes the chunk occupies, header included.
    pub size: usize,
    pub state: ChunkState,
}

impl ChunkHeader {
    #[inline]
    #[must_use]
    pub const fn in_use(size: usize) -> Self {
        Self {
            size,
            state: ChunkState::InUse,
        }
    }

    #[inline]
    #[must_use]
    pub const fn free(size: usize, next: Option<ChunkRef>, prev: Option<ChunkRef>) -> Self {
        Self {
            size,
            state: ChunkState::Free { next, prev },
        }
    }

    #[inline]
    #[must_use]
    pub const fn status(&self) -> Status {
        match self.state {
            ChunkState::Free { .. } => Status::Free,
            ChunkState::InUse => Status::InUse,
        }
    }

    #[inline]
    pub(crate) const fn size_word(&self) -> ChunkWord {
        ChunkWord::new()
            .with_status(self.status())
            .with_size(self.size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_survives_any_size() {
        for size in [32usize, 48, 4096, (MAX_CHUNK_SIZE & !0xf) as usize] {
            let w = ChunkHeader::free(size, None, None).size_word();
            assert_eq!(w.status(), Status::Free);
            assert_eq!(w.size() as usize, size);

            let w = ChunkHeader::in_use(size).size_word();
            assert_eq!(w.status(), Status::InUse);
            assert_eq!(w.size() as usize, size);
        }
    }

    #[test]
    fn zeroed_and_garbage_words_are_invalid() {
        assert_eq!(ChunkWord::from_bits(0).status(), Status::Invalid);
        assert_eq!(ChunkWord::from_bits(0xdead_beef_dead_beef).status(), Status::Invalid);
        assert_eq!(ChunkWord::from_bits(0x30 | 0b0101).status(), Status::InUse);
    }

    #[test]
    fn link_none_and_some() {
        assert_eq!(Link::encode(None).decode(), None);
        assert_eq!(Link::from_bits(0).decode(), None);

        let c = ChunkRef::new(7, 0x1230);
        assert_eq!(Link::encode(Some(c)).decode(), Some(c));

        let far = ChunkRef::new(0x7fff, (MAX_OFFSET & !0xf) as usize);
        assert_eq!(Link::encode(Some(far)).decode(), Some(far));
    }

    #[test]
    fn free_node_fits_three_words() {
        assert_eq!(FREE_NODE_SIZE, 24);
        assert!(HEADER_SIZE >= WORD);
        assert!(HEADER_SIZE.is_power_of_two());
    }
}
