use crate::{arena::Arena, block::MIN_BLOCK_SIZE, list::FreeList, platform::MemorySource};

/// Default number of size classes.
pub const DEFAULT_BUCKETS: usize = 32;

/// `ceil(log2(MIN_BLOCK_SIZE))`. Class 0 is reserved for minimum sized blocks,
/// so every class index is shifted down by this amount.
const MIN_CLASS: u32 = ceil_log2(MIN_BLOCK_SIZE);

/// `ceil(log2(value))`, with `ceil_log2(0) == ceil_log2(1) == 0`.
#[inline]
const fn ceil_log2(value: usize) -> u32 {
    if value <= 1 {
        0
    } else {
        usize::BITS - (value - 1).leading_zeros()
    }
}

/// Segregated free lists. Free blocks are bucketed by size class, where the
/// class of a block of `size` bytes is `ceil(log2(size))` shifted so that
/// minimum sized blocks land in bucket 0:
///
/// ```text
///                +-------+    +-------+
/// lists[0]   ->  |  32   | -> |  32   |                 size <= 32
///                +-------+    +-------+
///                +-------+    +-------+    +-------+
/// lists[1]   ->  |  48   | -> |  48   | -> |  64   |    32 < size <= 64
///                +-------+    +-------+    +-------+
///
///    ...
///                +-------+    +-------+
/// lists[N-1] ->  | 64 K  | -> |  2 M  |                 everything else
///                +-------+    +-------+
/// ```
///
/// The last bucket is a catch-all for every block too big for the other
/// ones. Each bucket is a [`FreeList`] sorted by size. A block belongs to
/// exactly one bucket, determined by its current size, so it must be removed
/// before its size changes and inserted again afterwards.
pub(crate) struct SegregatedFreeList<const N: usize> {
    lists: [FreeList; N],
}

impl<const N: usize> SegregatedFreeList<N> {
    pub const fn new() -> Self {
        const EMPTY: FreeList = FreeList::new();
        assert!(N > 0, "at least one size class is needed");
        Self { lists: [EMPTY; N] }
    }

    /// Index of the bucket where blocks of `size` bytes belong.
    #[inline]
    pub fn bucket_for(size: usize) -> usize {
        let class = ceil_log2(size).saturating_sub(MIN_CLASS) as usize;
        class.min(N - 1)
    }

    /// Indexes free `block` according to its current size.
    pub fn insert<S: MemorySource>(&mut self, arena: &mut Arena<S>, block: usize) {
        let bucket = Self::bucket_for(arena.header(block).size());
        self.lists[bucket].insert(arena, block);
    }

    /// Unlinks `block`. Its header must still hold the size it was inserted
    /// with.
    pub fn remove<S: MemorySource>(&mut self, arena: &mut Arena<S>, block: usize) {
        let bucket = Self::bucket_for(arena.header(block).size());
        self.lists[bucket].remove(arena, block);
    }

    /// Segregated fit. Starts at the bucket for `size` and takes the first
    /// block big enough, moving to bigger buckets when the current one has
    /// nothing. Every bucket is sorted, so within a bucket this is best fit.
    pub fn find<S: MemorySource>(&self, arena: &Arena<S>, size: usize) -> Option<usize> {
        self.lists[Self::bucket_for(size)..]
            .iter()
            .filter(|list| !list.is_empty())
            .find_map(|list| list.find(arena, size))
    }

    /// Total number of free blocks indexed.
    pub fn len(&self) -> usize {
        self.lists.iter().map(|list| list.len).sum()
    }

    /// All the buckets, in ascending size class order.
    pub fn lists(&self) -> &[FreeList; N] {
        &self.lists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::FIRST_BLOCK, platform::HeapBuffer};

    type Index = SegregatedFreeList<DEFAULT_BUCKETS>;

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(4096), 12);
        assert_eq!(ceil_log2(4097), 13);
    }

    #[test]
    fn size_classes() {
        assert_eq!(Index::bucket_for(MIN_BLOCK_SIZE), 0);
        assert_eq!(Index::bucket_for(MIN_BLOCK_SIZE + 16), 1);
        assert_eq!(Index::bucket_for(2 * MIN_BLOCK_SIZE), 1);
        assert_eq!(Index::bucket_for(2 * MIN_BLOCK_SIZE + 16), 2);
        assert_eq!(Index::bucket_for(usize::MAX), DEFAULT_BUCKETS - 1);

        // Small indexes clamp everything to the catch-all bucket.
        assert_eq!(SegregatedFreeList::<3>::bucket_for(MIN_BLOCK_SIZE * 4), 2);
        assert_eq!(SegregatedFreeList::<3>::bucket_for(1 << 20), 2);
        assert_eq!(SegregatedFreeList::<1>::bucket_for(MIN_BLOCK_SIZE), 0);
    }

    #[test]
    fn find_moves_to_bigger_buckets() {
        let mut arena = Arena::init(HeapBuffer::new(1 << 16)).unwrap();
        let sizes = [MIN_BLOCK_SIZE, 8 * MIN_BLOCK_SIZE, 2 * MIN_BLOCK_SIZE];
        arena.grow(sizes.iter().sum()).unwrap();

        let mut index = Index::new();
        let mut blocks = Vec::new();
        let mut block = FIRST_BLOCK;
        for size in sizes {
            arena.set_free_tags(block, size, true);
            index.insert(&mut arena, block);
            blocks.push(block);
            block += size;
        }

        assert_eq!(index.len(), 3);
        assert_eq!(index.find(&arena, MIN_BLOCK_SIZE), Some(blocks[0]));
        assert_eq!(index.find(&arena, MIN_BLOCK_SIZE + 16), Some(blocks[2]));
        assert_eq!(index.find(&arena, 3 * MIN_BLOCK_SIZE), Some(blocks[1]));
        assert_eq!(index.find(&arena, 9 * MIN_BLOCK_SIZE), None);

        index.remove(&mut arena, blocks[2]);
        assert_eq!(index.find(&arena, MIN_BLOCK_SIZE + 16), Some(blocks[1]));
        assert_eq!(index.len(), 2);
        assert!(index.lists()[1].is_empty());
    }
}
