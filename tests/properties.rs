use proptest::prelude::*;
use segalloc::{align::ALIGNMENT, Config, Heap, HeapBuffer, Pointer};

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Release(usize),
    Resize(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1_usize..2048).prop_map(Op::Allocate),
        2 => any::<usize>().prop_map(Op::Release),
        2 => (any::<usize>(), 0_usize..6000).prop_map(|(index, size)| Op::Resize(index, size)),
    ]
}

/// A live allocation and the bytes its owner expects to find in it.
struct Live {
    ptr: Pointer,
    len: usize,
    seed: u8,
}

fn write_pattern(heap: &mut Heap<HeapBuffer>, live: &Live) {
    for (i, byte) in heap.payload_mut(live.ptr)[..live.len].iter_mut().enumerate() {
        *byte = live.seed ^ (i as u8);
    }
}

fn pattern_intact(heap: &Heap<HeapBuffer>, live: &Live, len: usize) -> bool {
    heap.payload(live.ptr)[..len]
        .iter()
        .enumerate()
        .all(|(i, byte)| *byte == live.seed ^ (i as u8))
}

/// Live payload ranges must be pairwise disjoint.
fn assert_no_overlap(heap: &Heap<HeapBuffer>, live: &[Live]) -> Result<(), TestCaseError> {
    let mut ranges: Vec<_> = live
        .iter()
        .map(|live| (live.ptr.offset(), live.ptr.offset() + heap.usable_size(live.ptr)))
        .collect();
    ranges.sort_unstable();

    for pair in ranges.windows(2) {
        prop_assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }

    Ok(())
}

fn run(heap: &mut Heap<HeapBuffer>, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut live: Vec<Live> = Vec::new();

    for (step, op) in ops.into_iter().enumerate() {
        let seed = step as u8;

        match op {
            Op::Allocate(size) => {
                let Some(ptr) = heap.allocate(size) else {
                    continue;
                };
                let allocation = Live { ptr, len: size, seed };
                write_pattern(heap, &allocation);
                live.push(allocation);
            }

            Op::Release(index) if !live.is_empty() => {
                let allocation = live.swap_remove(index % live.len());
                prop_assert!(pattern_intact(heap, &allocation, allocation.len));
                heap.release(allocation.ptr);
            }

            Op::Resize(index, size) if !live.is_empty() => {
                let index = index % live.len();
                let old = &live[index];
                prop_assert!(pattern_intact(heap, old, old.len));

                match heap.resize(Some(old.ptr), size) {
                    None if size == 0 => {
                        live.swap_remove(index);
                    }
                    // Out of memory, the block must be intact.
                    None => prop_assert!(pattern_intact(heap, &live[index], live[index].len)),
                    Some(ptr) => {
                        let kept = old.len.min(size);
                        let moved = Live { ptr, len: kept, seed: old.seed };
                        prop_assert!(pattern_intact(heap, &moved, kept));
                        prop_assert!(heap.usable_size(ptr) >= size);

                        live[index] = Live { ptr, len: size, seed };
                        write_pattern(heap, &live[index]);
                    }
                }
            }

            _ => continue,
        }

        for allocation in &live {
            prop_assert_eq!(allocation.ptr.offset() % ALIGNMENT, 0);
        }
        assert_no_overlap(heap, &live)?;
        prop_assert_eq!(heap.check(), Ok(()));
    }

    for allocation in &live {
        prop_assert!(pattern_intact(heap, allocation, allocation.len));
    }

    for allocation in live {
        heap.release(allocation.ptr);
    }
    heap.check().map_err(|err| TestCaseError::fail(err.to_string()))?;

    let stats = heap.stats();
    prop_assert_eq!(stats.allocated_blocks, 0);
    prop_assert_eq!(stats.free_blocks, 1);

    Ok(())
}

proptest! {
    #[test]
    fn random_operations_keep_heap_consistent(ops in proptest::collection::vec(arb_op(), 1..200)) {
        let mut heap = Heap::new(HeapBuffer::new(8 << 20)).unwrap();
        run(&mut heap, ops)?;
    }

    #[test]
    fn tight_heap_survives_exhaustion(ops in proptest::collection::vec(arb_op(), 1..200)) {
        let config = Config::new().with_chunk_size(256);
        let mut heap = Heap::with_config(HeapBuffer::new(16 << 10), config).unwrap();
        run(&mut heap, ops)?;
    }

    #[test]
    fn any_split_threshold_works(threshold in 0_usize..5000, ops in proptest::collection::vec(arb_op(), 1..100)) {
        let config = Config::new().with_split_threshold(threshold);
        let mut heap = Heap::with_config(HeapBuffer::new(8 << 20), config).unwrap();
        run(&mut heap, ops)?;
    }

    #[test]
    fn few_buckets_work(ops in proptest::collection::vec(arb_op(), 1..100)) {
        let mut heap = Heap::<_, 3>::with_buckets(HeapBuffer::new(8 << 20), Config::new()).unwrap();
        run_generic(&mut heap, ops)?;
    }
}

/// Bare version of [`run`] for heaps with a non default bucket count:
/// releases everything at the end and checks the heap collapses back into a
/// single free block.
fn run_generic<const N: usize>(heap: &mut Heap<HeapBuffer, N>, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut live = Vec::new();

    for op in ops {
        match op {
            Op::Allocate(size) => live.extend(heap.allocate(size)),
            Op::Release(index) if !live.is_empty() => {
                let ptr = live.swap_remove(index % live.len());
                heap.release(ptr);
            }
            Op::Resize(index, size) if !live.is_empty() => {
                let index = index % live.len();
                match heap.resize(Some(live[index]), size) {
                    Some(ptr) => live[index] = ptr,
                    None if size == 0 => {
                        live.swap_remove(index);
                    }
                    None => {}
                }
            }
            _ => {}
        }
        prop_assert_eq!(heap.check(), Ok(()));
    }

    for ptr in live {
        heap.release(ptr);
    }
    prop_assert_eq!(heap.check(), Ok(()));
    prop_assert_eq!(heap.stats().free_blocks, 1);

    Ok(())
}
