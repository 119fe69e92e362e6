#![allow(clippy::cast_possible_truncation)]

use core::ptr::NonNull;
use kernel_alloc::{
    BumpPageProvider, ChunkInfo, ChunkRef, FreeError, FreePolicy, HEADER_SIZE, Heap, HeapError,
    PageProvider, PageRegion, Status, Tunables,
};
use std::alloc::{Layout, alloc_zeroed};

const SMALL: Tunables = Tunables::new(16, 32, 512, FreePolicy::Retain);

/// Leaked, zeroed, page-aligned host memory.
fn pages(len: usize) -> NonNull<u8> {
    let layout = Layout::from_size_align(len, 4096).unwrap();
    NonNull::new(unsafe { alloc_zeroed(layout) }).unwrap()
}

fn bump(len: usize, page_size: usize) -> BumpPageProvider {
    unsafe { BumpPageProvider::new(pages(len), len, page_size) }
}

fn heap(tunables: Tunables) -> Heap<BumpPageProvider> {
    Heap::new(bump(64 * 1024, 512), tunables)
}

fn free_list<P>(heap: &Heap<P>) -> Vec<(ChunkRef, usize)> {
    heap.free_chunks().collect()
}

fn at(offset: usize) -> ChunkRef {
    ChunkRef::new(0, offset)
}

/// Records every request and optionally skips a page before each region.
struct Recording {
    inner: BumpPageProvider,
    requests: Vec<usize>,
    gap: bool,
}

unsafe impl PageProvider for Recording {
    fn acquire(&mut self, size: usize) -> Option<PageRegion> {
        self.requests.push(size);
        if self.gap {
            self.inner.acquire(1)?;
        }
        self.inner.acquire(size)
    }
}

fn recording(gap: bool) -> Recording {
    Recording {
        inner: bump(64 * 1024, 512),
        requests: Vec::new(),
        gap,
    }
}

#[test]
fn fresh_block_is_split_when_the_leftover_is_useful() {
    let mut heap = Heap::new(recording(false), SMALL);

    let a = heap.alloc(40).unwrap();
    assert_eq!(a.size, 48);
    assert_eq!(a.chunk, at(0));
    assert_eq!(heap.provider().requests, [512]);
    assert_eq!(free_list(&heap), [(at(48), 464)]);
    heap.check().unwrap();
}

#[test]
fn free_chunk_is_split_when_the_leftover_reaches_the_threshold() {
    let mut heap = heap(SMALL);
    heap.alloc(40).unwrap();

    let b = heap.alloc(400).unwrap();
    assert_eq!(b.size, 400);
    assert_eq!(b.chunk, at(48));
    assert_eq!(free_list(&heap), [(at(448), 64)]);
    heap.check().unwrap();
}

#[test]
fn small_leftover_stays_with_the_block() {
    let mut heap = heap(SMALL);
    heap.alloc(40).unwrap();
    heap.alloc(400).unwrap();

    let c = heap.alloc(48).unwrap();
    assert_eq!(c.size, 64);
    assert_eq!(c.chunk, at(448));
    assert!(heap.free_list().is_empty());
    assert_eq!(heap.chunk_size(c.ptr), Some(64));
    heap.check().unwrap();
}

#[test]
fn retain_policy_leaves_the_free_list_untouched() {
    let mut heap = heap(SMALL);
    let a = heap.alloc(40).unwrap();
    let b = heap.alloc(100).unwrap();
    let before = free_list(&heap);

    heap.free(a.ptr).unwrap();
    heap.free(b.ptr).unwrap();

    assert_eq!(free_list(&heap), before);
    assert_eq!(heap.chunk_size(a.ptr), Some(48), "chunk must stay in use");
    heap.check().unwrap();
}

#[test]
fn split_threshold_follows_min_split_size() {
    for (min_split, expect_split) in [(32, true), (33, false)] {
        let mut heap = heap(Tunables::new(16, min_split, 512, FreePolicy::Retain));
        heap.alloc(40).unwrap();
        heap.alloc(400).unwrap(); // leaves 64 free

        let d = heap.alloc(20).unwrap(); // 32 after rounding, 32 left over
        if expect_split {
            assert_eq!(d.size, 32);
            assert_eq!(free_list(&heap), [(at(480), 32)]);
        } else {
            assert_eq!(d.size, 64);
            assert!(heap.free_list().is_empty());
        }
        heap.check().unwrap();
    }
}

#[test]
fn blocks_are_at_least_the_request_and_granular() {
    let mut heap = heap(SMALL.with_free_policy(FreePolicy::Reclaim));
    for requested in [0, 1, 15, 16, 17, 24, 31, 33, 100, 511, 512, 513, 3000] {
        let block = heap.alloc(requested).unwrap();
        assert!(block.size >= requested);
        assert!(block.size >= 32);
        assert!(block.size.is_multiple_of(16));
        assert_eq!(Heap::<BumpPageProvider>::usable_size(&block), block.size - HEADER_SIZE);
        assert!((block.ptr.as_ptr() as usize).is_multiple_of(16));
    }
    heap.check().unwrap();
}

#[test]
fn growth_extends_an_adjacent_arena() {
    let mut heap = Heap::new(recording(false), SMALL);
    heap.alloc(40).unwrap();

    // 600 bytes round to 608; the 464-byte free chunk is too small.
    let big = heap.alloc(600).unwrap();
    assert_eq!(heap.provider().requests, [512, 1024]);
    assert_eq!(big.chunk, at(512));
    assert_eq!(big.size, 608);
    assert_eq!(heap.arenas().len(), 1);
    assert_eq!(free_list(&heap), [(at(1120), 416), (at(48), 464)]);

    let layout: Vec<_> = heap.walk().map(|c| (c.chunk.offset(), c.size, c.status)).collect();
    assert_eq!(
        layout,
        [
            (0, 48, Status::InUse),
            (48, 464, Status::Free),
            (512, 608, Status::InUse),
            (1120, 416, Status::Free),
        ]
    );
    heap.check().unwrap();
}

#[test]
fn growth_opens_a_new_arena_after_a_gap() {
    let mut heap = Heap::new(recording(true), SMALL.with_free_policy(FreePolicy::Reclaim));
    heap.alloc(40).unwrap();
    let far = heap.alloc(600).unwrap();

    assert_eq!(heap.arenas().len(), 2);
    assert_eq!(far.chunk, ChunkRef::new(1, 0));

    heap.free(far.ptr).unwrap();
    let arenas: Vec<_> = heap.walk().map(|c| c.chunk.arena()).collect();
    assert_eq!(arenas, [0, 0, 1]);
    heap.check().unwrap();
}

#[test]
fn small_growth_leftover_is_absorbed() {
    let mut heap = heap(SMALL);
    // 496 bytes leave 16 of the 512-byte block, less than min_split_size.
    let block = heap.alloc(490).unwrap();
    assert_eq!(block.size, 512);
    assert!(heap.free_list().is_empty());
    heap.check().unwrap();
}

#[test]
fn growth_leftover_of_exactly_min_split_size_is_absorbed() {
    let mut heap = Heap::new(bump(4096, 512), SMALL);
    // 480 bytes leave exactly 32 of the 512-byte block.
    let block = heap.alloc(480).unwrap();
    assert_eq!(block.size, 512);
    assert!(heap.free_list().is_empty());
    assert_eq!(heap.chunk_size(block.ptr), Some(512));
    heap.check().unwrap();
}

#[test]
fn exhausted_provider_reports_out_of_memory() {
    let mut heap = Heap::new(bump(1024, 512), SMALL);
    assert_eq!(heap.alloc(2000), Err(HeapError::OutOfMemory(2048)));
    assert_eq!(heap.alloc(usize::MAX), Err(HeapError::SizeOverflow(usize::MAX)));

    // The heap stays usable.
    heap.alloc(1000).unwrap();
    assert_eq!(heap.alloc(100), Err(HeapError::OutOfMemory(512)));
    heap.check().unwrap();
}

#[test]
fn first_fit_follows_list_order() {
    let mut heap = heap(SMALL.with_free_policy(FreePolicy::Reclaim));
    let blocks: Vec<_> = (0..5).map(|_| heap.alloc(40).unwrap()).collect();
    heap.free(blocks[1].ptr).unwrap();
    heap.free(blocks[3].ptr).unwrap();
    assert_eq!(free_list(&heap), [(at(144), 48), (at(48), 48), (at(240), 272)]);

    assert_eq!(heap.alloc(40).unwrap().chunk, at(144));
    assert_eq!(heap.alloc(40).unwrap().chunk, at(48));
    assert_eq!(heap.alloc(40).unwrap().chunk, at(240));
    heap.check().unwrap();
}

#[test]
fn reclaim_merges_with_a_free_successor() {
    let mut heap = heap(SMALL.with_free_policy(FreePolicy::Reclaim));
    let blocks: Vec<_> = (0..4).map(|_| heap.alloc(40).unwrap()).collect();
    assert_eq!(free_list(&heap), [(at(192), 320)]);

    heap.free(blocks[3].ptr).unwrap();
    assert_eq!(free_list(&heap), [(at(144), 368)]);

    heap.free(blocks[2].ptr).unwrap();
    assert_eq!(free_list(&heap), [(at(96), 416)]);

    // No backward merge: the predecessor stays its own chunk.
    heap.free(blocks[0].ptr).unwrap();
    assert_eq!(free_list(&heap), [(at(0), 48), (at(96), 416)]);

    let stats = heap.stats();
    assert_eq!(stats.live_allocations, 1);
    assert_eq!(stats.in_use_bytes, 48);
    assert_eq!(stats.free_bytes, 464);
    assert_eq!(stats.free_chunks, 2);
    heap.check().unwrap();
}

#[test]
fn reclaim_rejects_bad_pointers() {
    let mut heap = heap(SMALL.with_free_policy(FreePolicy::Reclaim));
    let a = heap.alloc(40).unwrap();
    let addr = a.ptr.as_ptr() as usize;

    let mut local = [0u64; 4];
    let foreign = NonNull::from(&mut local).cast::<u8>();
    assert_eq!(
        heap.free(foreign),
        Err(FreeError::ForeignPointer(foreign.as_ptr() as usize))
    );
    assert_eq!(
        heap.free(unsafe { a.ptr.add(8) }),
        Err(FreeError::Misaligned(addr + 8))
    );
    assert_eq!(
        heap.free(unsafe { a.ptr.add(16) }),
        Err(FreeError::CorruptHeader(addr + 16))
    );

    heap.free(a.ptr).unwrap();
    assert_eq!(heap.free(a.ptr), Err(FreeError::DoubleFree(addr)));
    assert_eq!(heap.chunk_size(a.ptr), None);
    heap.check().unwrap();
}

#[test]
fn reclaim_refuses_a_header_forged_inside_a_payload() {
    let mut heap = heap(SMALL.with_free_policy(FreePolicy::Reclaim));
    let a = heap.alloc(200).unwrap();
    let inner = unsafe { a.ptr.add(32) };
    // Payload bytes that happen to decode as a 32-byte in-use header.
    unsafe { inner.cast::<u64>().write((32 << 4) | Status::InUse.into_bits()) };

    assert_eq!(heap.chunk_size(inner), None);
    assert_eq!(
        heap.free(inner),
        Err(FreeError::Misaligned(inner.as_ptr() as usize))
    );
    heap.check().unwrap();

    let next = heap.alloc(24).unwrap();
    assert!(next.chunk.offset() >= a.chunk.offset() + a.size);
    heap.free(a.ptr).unwrap();
    heap.check().unwrap();
}

#[test]
fn walk_tiles_the_backing_memory() {
    let mut heap = heap(SMALL.with_free_policy(FreePolicy::Reclaim));
    let blocks: Vec<_> = [40, 700, 16, 3000, 90]
        .into_iter()
        .map(|n| heap.alloc(n).unwrap())
        .collect();
    heap.free(blocks[1].ptr).unwrap();
    heap.free(blocks[3].ptr).unwrap();

    let chunks: Vec<ChunkInfo> = heap.walk().collect();
    let covered: usize = chunks.iter().map(|c| c.size).sum();
    assert_eq!(covered, heap.stats().backing_bytes);
    assert!(chunks.iter().all(|c| c.status != Status::Invalid));
    assert_eq!(
        chunks.iter().filter(|c| c.status == Status::Free).count(),
        heap.free_list().len()
    );
    heap.check().unwrap();
}

/// Deterministic pseudo-random sequence (64-bit LCG).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as usize
    }
}

#[test]
fn random_operations_keep_the_heap_consistent() {
    let mut heap = Heap::new(
        bump(1024 * 1024, 512),
        SMALL.with_free_policy(FreePolicy::Reclaim),
    );
    let mut rng = Lcg(0x5eed);
    // (payload, requested length, fill byte)
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for step in 0..2000 {
        if live.is_empty() || rng.next() % 3 != 0 {
            let len = rng.next() % 300;
            let block = heap.alloc(len + HEADER_SIZE).unwrap();
            assert!(block.size >= len + HEADER_SIZE);
            let payload = unsafe { block.ptr.add(HEADER_SIZE) };
            let fill = step as u8;
            unsafe { payload.write_bytes(fill, len) };
            live.push((payload, len, fill));
        } else {
            let (payload, len, fill) = live.swap_remove(rng.next() % live.len());
            let bytes = unsafe { core::slice::from_raw_parts(payload.as_ptr(), len) };
            assert!(bytes.iter().all(|&b| b == fill), "payload was overwritten");
            heap.free(unsafe { payload.sub(HEADER_SIZE) }).unwrap();
        }
        heap.check().unwrap();
    }

    let mut spans: Vec<_> = live
        .iter()
        .map(|&(p, len, _)| (p.as_ptr() as usize, len))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "live blocks overlap");
    }
    assert_eq!(heap.stats().live_allocations, live.len());
}
