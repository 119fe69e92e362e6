//! # Free list
//!
//! An intrusive, doubly linked list of free chunks. The links live inside
//! the free chunks themselves (see [`crate::chunk`]); the list object only
//! remembers the head and the number of members.
//!
//! The list is unordered: new members are pushed at the head, and a split
//! remainder takes the place of the chunk it was carved from.
//!
//! # Invariants
//! Checked by [`FreeList::check`]:
//! 1. The head has no `prev`.
//! 2. Every member's header says [`Status::Free`].
//! 3. For every member with a `next`, `next.prev` is that member.
//! 4. No member appears twice.
//! 5. Every member lies inside an adopted arena.

use crate::arena::ArenaSet;
use crate::chunk::{ChunkHeader, ChunkRef, ChunkState, FREE_NODE_SIZE, Status};

/// Head of the intrusive free list.
#[derive(Debug, Default)]
pub struct FreeList {
    head: Option<ChunkRef>,
    len: usize,
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    #[must_use]
    pub const fn head(&self) -> Option<ChunkRef> {
        self.head
    }

    /// Number of members.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Stamp `chunk` as a free chunk of `size` bytes and push it at the head.
    pub fn add_to_free_list(&mut self, mem: &mut ArenaSet, chunk: ChunkRef, size: usize) {
        debug_assert!(size >= FREE_NODE_SIZE);
        if let Some(old) = self.head {
            set_prev(mem, old, Some(chunk));
        }
        mem.store_header(chunk, &ChunkHeader::free(size, self.head, None));
        self.head = Some(chunk);
        self.len += 1;
        log::trace!("free list: pushed {chunk:?} ({size} bytes)");
    }

    /// Splice `chunk` out of the list.
    ///
    /// `chunk` must currently be a member. Its header keeps its size and
    /// stale links; the caller re-stamps it.
    pub fn remove_from_free_list(&mut self, mem: &mut ArenaSet, chunk: ChunkRef) {
        let (next, prev) = links(mem, chunk);
        match prev {
            None => {
                debug_assert_eq!(self.head, Some(chunk), "unlinked node is not the head");
                self.head = next;
            }
            Some(prev) => set_next(mem, prev, next),
        }
        if let Some(next) = next {
            set_prev(mem, next, prev);
        }
        self.len -= 1;
        log::trace!("free list: removed {chunk:?}");
    }

    /// Carve the first `front_size` bytes off the member `chunk`.
    ///
    /// The remainder (at `chunk + front_size`) stays free and takes over
    /// `chunk`'s position in the list. The front is stamped in use with
    /// exactly `front_size` bytes, so its header never carries the stale
    /// free size.
    ///
    /// Returns the remainder.
    ///
    /// # Panics
    /// If `chunk` does not carry a free header.
    pub fn split_free_block(
        &mut self,
        mem: &mut ArenaSet,
        chunk: ChunkRef,
        front_size: usize,
    ) -> ChunkRef {
        let Some(ChunkHeader {
            size,
            state: ChunkState::Free { next, prev },
        }) = mem.load_header(chunk)
        else {
            panic!("split of {chunk:?}, which is not a free chunk");
        };
        debug_assert!(size - front_size >= FREE_NODE_SIZE);

        let rest = chunk.advance(front_size);
        mem.store_header(rest, &ChunkHeader::free(size - front_size, next, prev));
        match prev {
            None => self.head = Some(rest),
            Some(prev) => set_next(mem, prev, Some(rest)),
        }
        if let Some(next) = next {
            set_prev(mem, next, Some(rest));
        }
        mem.store_header(chunk, &ChunkHeader::in_use(front_size));
        log::trace!(
            "free list: split {chunk:?} into {front_size} + {} bytes",
            size - front_size
        );
        rest
    }

    /// Head-to-tail traversal yielding `(chunk, size)`.
    ///
    /// The walk stops early at a header that is not a free chunk; use
    /// [`check`](Self::check) to find out why.
    #[must_use]
    pub fn iter<'a>(&self, mem: &'a ArenaSet) -> Iter<'a> {
        Iter {
            mem,
            next: self.head,
            remaining: self.len,
        }
    }

    /// Verify the list invariants.
    ///
    /// Walks the list once with Floyd's cycle detection, so the check
    /// terminates even on a corrupted list and needs no extra memory.
    ///
    /// # Errors
    /// The first violated invariant.
    pub fn check(&self, mem: &ArenaSet) -> Result<(), FreeListError> {
        let Some(head) = self.head else {
            return if self.len == 0 {
                Ok(())
            } else {
                Err(FreeListError::LengthMismatch {
                    expected: self.len,
                    actual: 0,
                })
            };
        };

        let (_, head_prev) = checked_links(mem, head)?;
        if head_prev.is_some() {
            return Err(FreeListError::HeadHasPrev(head));
        }

        let mut count = 0;
        let mut slow = Some(head);
        let mut fast = Some(head);
        let mut node = Some(head);
        while let Some(current) = node {
            let (next, _) = checked_links(mem, current)?;
            count += 1;
            if let Some(next) = next {
                let (_, back) = checked_links(mem, next)?;
                if back != Some(current) {
                    return Err(FreeListError::BrokenLink {
                        node: current,
                        next,
                    });
                }
            }

            // The hare moves two links per step; meeting the tortoise means
            // some member is reachable twice.
            fast = fast
                .and_then(|f| checked_links(mem, f).ok()?.0)
                .and_then(|f| checked_links(mem, f).ok()?.0);
            slow = slow.and_then(|s| checked_links(mem, s).ok()?.0);
            if fast.is_some() && fast == slow {
                return Err(FreeListError::Cycle(current));
            }

            node = next;
        }

        if count != self.len {
            return Err(FreeListError::LengthMismatch {
                expected: self.len,
                actual: count,
            });
        }
        Ok(())
    }
}

/// Iterator returned by [`FreeList::iter`].
pub struct Iter<'a> {
    mem: &'a ArenaSet,
    next: Option<ChunkRef>,
    /// Bounds the walk by the recorded length, so a cyclic list terminates.
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = (ChunkRef, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.next?;
        if self.remaining == 0 || !self.mem.contains(chunk, FREE_NODE_SIZE) {
            self.next = None;
            return None;
        }
        match self.mem.load_header(chunk) {
            Some(ChunkHeader {
                size,
                state: ChunkState::Free { next, .. },
            }) => {
                self.next = next;
                self.remaining -= 1;
                Some((chunk, size))
            }
            _ => {
                self.next = None;
                None
            }
        }
    }
}

/// A violated free-list invariant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeListError {
    #[error("free list head {0:?} has a prev link")]
    HeadHasPrev(ChunkRef),
    #[error("free list member {0:?} is not marked free (status {1:?})")]
    NotFree(ChunkRef, Status),
    #[error("free list link {node:?} -> {next:?} is not mirrored by a prev link")]
    BrokenLink { node: ChunkRef, next: ChunkRef },
    #[error("free list member {0:?} is reachable twice")]
    Cycle(ChunkRef),
    #[error("free list member {0:?} lies outside every arena")]
    OutOfBounds(ChunkRef),
    #[error("free list records {expected} members but links {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

fn checked_links(
    mem: &ArenaSet,
    chunk: ChunkRef,
) -> Result<(Option<ChunkRef>, Option<ChunkRef>), FreeListError> {
    if !mem.contains(chunk, FREE_NODE_SIZE) {
        return Err(FreeListError::OutOfBounds(chunk));
    }
    match mem.load_header(chunk) {
        Some(ChunkHeader {
            state: ChunkState::Free { next, prev },
            ..
        }) => Ok((next, prev)),
        _ => Err(FreeListError::NotFree(chunk, mem.load_status(chunk))),
    }
}

fn links(mem: &ArenaSet, chunk: ChunkRef) -> (Option<ChunkRef>, Option<ChunkRef>) {
    match mem.load_header(chunk) {
        Some(ChunkHeader {
            state: ChunkState::Free { next, prev },
            ..
        }) => (next, prev),
        _ => panic!("{chunk:?} is linked into the free list but not free"),
    }
}

fn set_next(mem: &mut ArenaSet, chunk: ChunkRef, next: Option<ChunkRef>) {
    let (_, prev) = links(mem, chunk);
    relink(mem, chunk, next, prev);
}

fn set_prev(mem: &mut ArenaSet, chunk: ChunkRef, prev: Option<ChunkRef>) {
    let (next, _) = links(mem, chunk);
    relink(mem, chunk, next, prev);
}

fn relink(mem: &mut ArenaSet, chunk: ChunkRef, next: Option<ChunkRef>, prev: Option<ChunkRef>) {
    let Some(header) = mem.load_header(chunk) else {
        unreachable!("links() already validated {chunk:?}");
    };
    mem.store_header(chunk, &ChunkHeader::free(header.size, next, prev));
}
