use crate::{align::WORD_SIZE, arena::Arena, platform::MemorySource};

/// Free blocks store their list links in the first two words of the payload.
/// Links are payload offsets of other free blocks and 0 means "no block",
/// which is fine because offset 0 is the padding word, never a payload.
///
/// ```text
///              +---------------------+
///              | header              |
/// payload ->   +---------------------+
///              | prev free block     |  <- block + 0
///              +---------------------+
///              | next free block     |  <- block + WORD_SIZE
///              +---------------------+
///              |         ...         |
/// ```
///
/// Note that we never keep offsets of allocated payloads around, once a
/// block is handed out the caller owns those words.
impl<S: MemorySource> Arena<S> {
    #[inline]
    pub fn prev_free(&self, block: usize) -> Option<usize> {
        decode(self.read_word(block))
    }

    #[inline]
    pub fn next_free(&self, block: usize) -> Option<usize> {
        decode(self.read_word(block + WORD_SIZE))
    }

    #[inline]
    pub fn set_prev_free(&mut self, block: usize, link: Option<usize>) {
        self.write_word(block, link.unwrap_or(0));
    }

    #[inline]
    pub fn set_next_free(&mut self, block: usize, link: Option<usize>) {
        self.write_word(block + WORD_SIZE, link.unwrap_or(0));
    }
}

#[inline]
fn decode(word: usize) -> Option<usize> {
    (word != 0).then_some(word)
}

/// Doubly linked list of free blocks kept in ascending size order. The nodes
/// live inside the arena (see the links above), this struct only knows where
/// the list starts and how long it is. Since we are the allocator, the list
/// can't allocate anything itself, every operation receives the arena where
/// the nodes are written.
///
/// Keeping the list sorted means the first block that fits is also the
/// smallest one that fits, so a first fit search is a best fit search within
/// the list.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FreeList {
    pub head: Option<usize>,
    pub len: usize,
}

impl FreeList {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Inserts `block` before the first node whose size is greater than or
    /// equal to the size of `block`, or at the end if there's none. This is
    /// O(n), the price we pay for not keeping a balanced tree.
    pub fn insert<S: MemorySource>(&mut self, arena: &mut Arena<S>, block: usize) {
        let size = arena.header(block).size();

        let mut prev = None;
        let mut current = self.head;

        while let Some(node) = current {
            if arena.header(node).size() >= size {
                break;
            }
            prev = Some(node);
            current = arena.next_free(node);
        }

        arena.set_prev_free(block, prev);
        arena.set_next_free(block, current);

        match prev {
            Some(prev) => arena.set_next_free(prev, Some(block)),
            None => self.head = Some(block),
        }

        if let Some(next) = current {
            arena.set_prev_free(next, Some(block));
        }

        self.len += 1;
    }

    /// Unlinks `block` from the list. `block` must be in this list.
    pub fn remove<S: MemorySource>(&mut self, arena: &mut Arena<S>, block: usize) {
        let prev = arena.prev_free(block);
        let next = arena.next_free(block);

        match (prev, next) {
            // Only node.
            (None, None) => self.head = None,
            // Head.
            (None, Some(next)) => {
                arena.set_prev_free(next, None);
                self.head = Some(next);
            }
            // Tail.
            (Some(prev), None) => arena.set_next_free(prev, None),
            // Somewhere in the middle.
            (Some(prev), Some(next)) => {
                arena.set_next_free(prev, Some(next));
                arena.set_prev_free(next, Some(prev));
            }
        }

        self.len -= 1;
    }

    /// Returns the first block in the list that can hold `size` bytes. Since
    /// the list is sorted, that's also the smallest one.
    pub fn find<S: MemorySource>(&self, arena: &Arena<S>, size: usize) -> Option<usize> {
        self.iter(arena).find(|block| arena.header(*block).size() >= size)
    }

    /// Iterates over the payload offsets of the blocks in this list.
    pub fn iter<'a, S: MemorySource>(&self, arena: &'a Arena<S>) -> impl Iterator<Item = usize> + 'a {
        let mut current = self.head;

        std::iter::from_fn(move || {
            let block = current?;
            current = arena.next_free(block);
            Some(block)
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::FIRST_BLOCK, platform::HeapBuffer};

    /// Builds an arena with free blocks of the given sizes laid out back to
    /// back. They're not coalesced because we never ask for it here.
    fn arena_with_blocks(sizes: &[usize]) -> (Arena<HeapBuffer>, Vec<usize>) {
        let mut arena = Arena::init(HeapBuffer::new(1 << 16)).unwrap();
        arena.grow(sizes.iter().sum()).unwrap();

        let mut blocks = Vec::new();
        let mut block = FIRST_BLOCK;
        for size in sizes {
            arena.set_free_tags(block, *size, true);
            blocks.push(block);
            block += size;
        }

        (arena, blocks)
    }

    fn sizes_in_order(list: &FreeList, arena: &Arena<HeapBuffer>) -> Vec<usize> {
        list.iter(arena).map(|block| arena.header(block).size()).collect()
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let (mut arena, blocks) = arena_with_blocks(&[64, 32, 128, 48, 32]);
        let mut list = FreeList::new();

        for block in &blocks {
            list.insert(&mut arena, *block);
        }

        assert_eq!(list.len, 5);
        assert_eq!(sizes_in_order(&list, &arena), vec![32, 32, 48, 64, 128]);

        // Equal sizes go before the existing ones.
        assert_eq!(list.head, Some(blocks[4]));
    }

    #[test]
    fn remove_head_tail_middle_and_only() {
        let (mut arena, blocks) = arena_with_blocks(&[32, 48, 64, 80]);
        let mut list = FreeList::new();
        for block in &blocks {
            list.insert(&mut arena, *block);
        }

        // Middle.
        list.remove(&mut arena, blocks[1]);
        assert_eq!(sizes_in_order(&list, &arena), vec![32, 64, 80]);
        assert_eq!(arena.prev_free(blocks[2]), Some(blocks[0]));

        // Head.
        list.remove(&mut arena, blocks[0]);
        assert_eq!(sizes_in_order(&list, &arena), vec![64, 80]);
        assert_eq!(arena.prev_free(blocks[2]), None);
        assert_eq!(list.head, Some(blocks[2]));

        // Tail.
        list.remove(&mut arena, blocks[3]);
        assert_eq!(sizes_in_order(&list, &arena), vec![64]);
        assert_eq!(arena.next_free(blocks[2]), None);

        // Only node.
        list.remove(&mut arena, blocks[2]);
        assert!(list.is_empty());
        assert_eq!(list.len, 0);
    }

    #[test]
    fn find_returns_smallest_fit() {
        let (mut arena, blocks) = arena_with_blocks(&[128, 48, 96, 32]);
        let mut list = FreeList::new();
        for block in &blocks {
            list.insert(&mut arena, *block);
        }

        assert_eq!(list.find(&arena, 40), Some(blocks[1]));
        assert_eq!(list.find(&arena, 32), Some(blocks[3]));
        assert_eq!(list.find(&arena, 97), Some(blocks[0]));
        assert_eq!(list.find(&arena, 129), None);
    }
}
