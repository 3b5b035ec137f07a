use segalloc::{
    align::{align_up, ALIGNMENT, WORD_SIZE},
    AllocError, Config, Heap, HeapBuffer, Pointer,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn heap() -> Heap<HeapBuffer> {
    init_logger();
    Heap::new(HeapBuffer::new(16 << 20)).unwrap()
}

fn fill(heap: &mut Heap<HeapBuffer>, ptr: Pointer, len: usize, seed: u8) {
    for (i, byte) in heap.payload_mut(ptr)[..len].iter_mut().enumerate() {
        *byte = seed.wrapping_add(i as u8);
    }
}

fn holds(heap: &Heap<HeapBuffer>, ptr: Pointer, len: usize, seed: u8) -> bool {
    heap.payload(ptr)[..len]
        .iter()
        .enumerate()
        .all(|(i, byte)| *byte == seed.wrapping_add(i as u8))
}

#[test]
fn released_block_is_reused_by_smaller_request() {
    let mut heap = heap();

    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    fill(&mut heap, b, 16, 42);

    heap.release(a);
    let c = heap.allocate(8).unwrap();

    assert_eq!(c, a);
    assert!(holds(&heap, b, 16, 42));
    heap.check().unwrap();
}

#[test]
fn every_pointer_is_aligned() {
    let mut heap = heap();

    for size in (1..300).chain([4095, 4096, 4097, 10_000]) {
        let ptr = heap.allocate(size).unwrap();
        assert_eq!(ptr.offset() % ALIGNMENT, 0, "allocate({size})");
        assert!(heap.usable_size(ptr) >= size);
    }

    heap.check().unwrap();
}

#[test]
fn freed_neighbours_satisfy_double_request_without_growth() {
    let mut heap = heap();
    let size = 64;

    let blocks: Vec<_> = (0..8).map(|_| heap.allocate(size).unwrap()).collect();
    let growths = heap.stats().growths;

    // Every other block: nothing merges, the request is served from the tail.
    for ptr in blocks.iter().step_by(2) {
        heap.release(*ptr);
    }
    let from_tail = heap.allocate(2 * size).unwrap();
    assert!(from_tail.offset() > blocks[7].offset());
    heap.check().unwrap();

    // Releasing blocks[1] merges blocks[0..3] into one free block big enough.
    heap.release(blocks[1]);
    assert_eq!(heap.stats().free_blocks, 4);

    let merged = heap.allocate(2 * size).unwrap();
    assert!(merged.offset() >= blocks[0].offset());
    assert!(merged.offset() + heap.usable_size(merged) <= blocks[3].offset());

    assert_eq!(heap.stats().growths, growths);
    heap.check().unwrap();
}

#[test]
fn huge_request_grows_once_by_what_it_needs() {
    let mut heap = heap();
    let before = heap.stats();
    assert_eq!(before.growths, 1);

    let size = 100_000;
    let ptr = heap.allocate(size).unwrap();
    let asize = align_up(size + WORD_SIZE);

    let after = heap.stats();
    assert_eq!(after.growths, 2);
    assert_eq!(after.heap_size, before.heap_size + asize);
    assert_eq!(heap.usable_size(ptr), asize - WORD_SIZE);

    // The initial free block is still there, merged growth was carved from
    // its end.
    assert_eq!(after.free_blocks, 1);
    assert_eq!(after.free_bytes, before.free_bytes);
    heap.check().unwrap();
}

#[test]
fn small_growths_use_chunk_size() {
    init_logger();
    let mut heap = Heap::with_config(HeapBuffer::new(1 << 20), Config::new().with_chunk_size(1024)).unwrap();
    let initial = heap.heap_size();

    // Fill the initial chunk, then one more small request must add a whole
    // chunk.
    while heap.stats().free_blocks > 0 {
        heap.allocate(24).unwrap();
    }
    let growths = heap.stats().growths;
    heap.allocate(24).unwrap();

    assert_eq!(heap.stats().growths, growths + 1);
    assert_eq!(heap.heap_size(), initial + 1024);
    heap.check().unwrap();
}

#[test]
fn shrink_then_grow_back() {
    let mut heap = heap();

    for blocked in [false, true] {
        let ptr = heap.allocate(1000).unwrap();
        fill(&mut heap, ptr, 1000, 3);

        let ptr = heap.resize(Some(ptr), 100).unwrap();
        assert!(holds(&heap, ptr, 100, 3));
        heap.check().unwrap();

        // A live block in the released tail forces the next resize to move.
        let neighbour = blocked.then(|| heap.allocate(800).unwrap());

        let ptr = heap.resize(Some(ptr), 1000).unwrap();
        assert!(heap.usable_size(ptr) >= 1000);
        assert!(holds(&heap, ptr, 100, 3));
        heap.check().unwrap();

        heap.release(ptr);
        if let Some(neighbour) = neighbour {
            heap.release(neighbour);
        }
        heap.check().unwrap();
    }

    assert_eq!(heap.stats().allocated_blocks, 0);
    assert_eq!(heap.stats().free_blocks, 1);
}

#[test]
fn pattern_survives_unrelated_churn() {
    let mut heap = heap();

    let kept = heap.allocate(500).unwrap();
    fill(&mut heap, kept, 500, 99);

    let mut live = Vec::new();
    for round in 0..50usize {
        let size = 1 + (round * 37) % 700;
        live.push(heap.allocate(size).unwrap());
        if round % 3 == 0 {
            let ptr = live.swap_remove(round % live.len());
            heap.release(ptr);
        }
        if round % 5 == 0 {
            if let Some(ptr) = live.pop() {
                live.push(heap.resize(Some(ptr), size * 3).unwrap());
            }
        }
    }

    for ptr in live {
        heap.release(ptr);
    }

    assert!(holds(&heap, kept, 500, 99));
    heap.check().unwrap();
}

#[test]
fn exhaustion_is_reported_and_recoverable() {
    init_logger();
    let mut heap = Heap::new(HeapBuffer::new(64 << 10)).unwrap();

    let mut live = Vec::new();
    let error = loop {
        match heap.try_allocate(1000) {
            Ok(ptr) => live.push(ptr),
            Err(error) => break error,
        }
    };

    assert!(matches!(error, AllocError::OutOfMemory { .. }));
    assert!(!live.is_empty());
    heap.check().unwrap();

    // Growing in place is impossible too, but the block stays valid.
    let last = *live.last().unwrap();
    fill(&mut heap, last, 1000, 1);
    assert_eq!(heap.resize(Some(last), 64 << 10), None);
    assert!(holds(&heap, last, 1000, 1));

    for ptr in live {
        heap.release(ptr);
    }
    heap.check().unwrap();
    assert_eq!(heap.stats().free_blocks, 1);
    assert!(heap.allocate(1000).is_some());
}

#[test]
fn default_source_heap() {
    init_logger();
    let mut heap = Heap::reserve(segalloc::DEFAULT_MAX_HEAP).unwrap();

    let ptrs: Vec<_> = (1..64).map(|i| heap.allocate(i * 100).unwrap()).collect();
    for ptr in ptrs.into_iter().rev() {
        heap.release(ptr);
    }

    heap.check().unwrap();
    assert_eq!(heap.stats().free_blocks, 1);
}
