//! Heap consistency checker and statistics. Neither is needed for the
//! allocator to work, they walk the whole arena and are meant for tests,
//! debugging and the occasional sanity check in a host program.

use thiserror::Error;

use crate::{
    align::{is_aligned, WORD_SIZE},
    allocator::Heap,
    block::{payload_size, FIRST_BLOCK, HEADER_SIZE, MIN_BLOCK_SIZE, PROLOGUE_SIZE},
    freelist::SegregatedFreeList,
    header::Tag,
    platform::MemorySource,
};

/// First inconsistency found by [`Heap::check`]. Offsets are payload
/// offsets of the block at fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapCorruption {
    #[error("prologue has been overwritten")]
    Prologue,

    #[error("epilogue expected at {expected}, found tag {found:#x}")]
    Epilogue { expected: usize, found: usize },

    #[error("block at {offset} runs past the end of the arena")]
    OutOfBounds { offset: usize },

    #[error("block at {offset} is not aligned")]
    Misaligned { offset: usize },

    #[error("block at {offset} has invalid size {size}")]
    InvalidSize { offset: usize, size: usize },

    #[error("free block at {offset} has header {header:#x} but footer {footer:#x}")]
    FooterMismatch {
        offset: usize,
        header: usize,
        footer: usize,
    },

    #[error("free blocks at {offset} and {next} are adjacent")]
    Uncoalesced { offset: usize, next: usize },

    #[error("block at {offset} has the wrong previous allocated bit")]
    PrevAllocatedBit { offset: usize },

    #[error("free list link at {offset} points to {link}, which is not a free block")]
    DanglingLink { offset: usize, link: usize },

    #[error("free list links around {offset} are not symmetric")]
    AsymmetricLink { offset: usize },

    #[error("block at {offset} is in bucket {bucket}, expected {expected}")]
    WrongBucket {
        offset: usize,
        bucket: usize,
        expected: usize,
    },

    #[error("bucket {bucket} is not sorted at {offset}")]
    Unsorted { bucket: usize, offset: usize },

    #[error("{walked} free blocks in the arena but {indexed} in the free lists")]
    IndexMismatch { walked: usize, indexed: usize },
}

/// Snapshot of the heap usage, see [`Heap::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Size of the arena, sentinels included.
    pub heap_size: usize,
    /// Number of times the arena has grown, initial growth included.
    pub growths: usize,
    pub allocated_blocks: usize,
    /// Sum of block sizes of allocated blocks, headers included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    /// Sum of block sizes of free blocks.
    pub free_bytes: usize,
    /// Payload capacity of the biggest free block, or 0 if there's none.
    pub largest_free: usize,
}

impl<S: MemorySource, const N: usize> Heap<S, N> {
    /// Walks every block in the arena and returns usage numbers.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            heap_size: self.arena.len(),
            growths: self.arena.growths(),
            ..Default::default()
        };

        for (_, tag) in self.arena.blocks() {
            if tag.is_allocated() {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += tag.size();
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += tag.size();
                stats.largest_free = stats.largest_free.max(payload_size(tag.size()));
            }
        }

        stats
    }

    /// Verifies every invariant the allocator relies on:
    ///
    /// - Sentinels are intact.
    /// - Blocks are aligned, tile the arena exactly and have valid sizes.
    /// - Free blocks have matching header and footer.
    /// - No two free blocks are adjacent.
    /// - Every previous allocated bit matches reality.
    /// - Free lists are well formed, sorted, contain only free blocks in
    ///   their right bucket and every free block is in exactly one of them.
    ///
    /// This is O(n) in the number of blocks and never panics, no matter how
    /// broken the heap is.
    pub fn check(&self) -> Result<(), HeapCorruption> {
        let walked = self.check_blocks()?;

        let indexed = self.free_lists.len();
        if walked != indexed {
            return Err(HeapCorruption::IndexMismatch { walked, indexed });
        }

        let indexed = self.check_free_lists(walked)?;

        if walked != indexed {
            return Err(HeapCorruption::IndexMismatch { walked, indexed });
        }

        Ok(())
    }

    fn tag_at(&self, block: usize) -> Result<Tag, HeapCorruption> {
        block
            .checked_sub(HEADER_SIZE)
            .and_then(|header| self.arena.get_word(header))
            .map(Tag::from_word)
            .ok_or(HeapCorruption::OutOfBounds { offset: block })
    }

    /// Walks the arena block by block. Returns the number of free blocks.
    fn check_blocks(&self) -> Result<usize, HeapCorruption> {
        let prologue = self.tag_at(PROLOGUE_SIZE)?;
        let prologue_footer = self.arena.get_word(PROLOGUE_SIZE).map(Tag::from_word);
        if prologue.size() != PROLOGUE_SIZE
            || !prologue.is_allocated()
            || prologue_footer.map(|footer| footer.same_block(prologue)) != Some(true)
        {
            return Err(HeapCorruption::Prologue);
        }

        let end = self.arena.epilogue();
        let mut block = FIRST_BLOCK;
        let mut prev_allocated = true;
        let mut free = 0;

        while block < end {
            let tag = self.tag_at(block)?;
            let size = tag.size();

            if !is_aligned(block) {
                return Err(HeapCorruption::Misaligned { offset: block });
            }

            if size < MIN_BLOCK_SIZE || !is_aligned(size) {
                return Err(HeapCorruption::InvalidSize { offset: block, size });
            }

            let next = match block.checked_add(size) {
                Some(next) if next <= end => next,
                _ => return Err(HeapCorruption::OutOfBounds { offset: block }),
            };

            if tag.is_prev_allocated() != prev_allocated {
                return Err(HeapCorruption::PrevAllocatedBit { offset: block });
            }

            if !tag.is_allocated() {
                // In bounds, the block ends before the epilogue.
                let footer = self.arena.footer(block);

                if !footer.same_block(tag) {
                    return Err(HeapCorruption::FooterMismatch {
                        offset: block,
                        header: tag.word(),
                        footer: footer.word(),
                    });
                }

                if !prev_allocated {
                    let prev_size = self
                        .arena
                        .get_word(block - 2 * WORD_SIZE)
                        .map_or(0, |word| Tag::from_word(word).size());
                    return Err(HeapCorruption::Uncoalesced {
                        offset: block.saturating_sub(prev_size),
                        next: block,
                    });
                }

                free += 1;
            }

            prev_allocated = tag.is_allocated();
            block = next;
        }

        let epilogue = self.tag_at(end)?;
        if epilogue.size() != 0 || !epilogue.is_allocated() {
            return Err(HeapCorruption::Epilogue {
                expected: end,
                found: epilogue.word(),
            });
        }
        if epilogue.is_prev_allocated() != prev_allocated {
            return Err(HeapCorruption::PrevAllocatedBit { offset: end });
        }

        Ok(free)
    }

    /// Walks every bucket. Returns the number of indexed blocks. `limit` is
    /// the number of free blocks found in the arena, used to bail out of
    /// cyclic lists.
    fn check_free_lists(&self, limit: usize) -> Result<usize, HeapCorruption> {
        let end = self.arena.epilogue();
        let mut indexed = 0;

        for (bucket, list) in self.free_lists.lists().iter().enumerate() {
            let mut prev: Option<usize> = None;
            let mut current = list.head;
            let mut last_size = 0;
            let mut len = 0;

            while let Some(block) = current {
                let link = prev.unwrap_or(0);

                if block < FIRST_BLOCK || block >= end || !is_aligned(block) {
                    return Err(HeapCorruption::DanglingLink { offset: link, link: block });
                }

                let tag = self.tag_at(block)?;
                if tag.is_allocated() {
                    return Err(HeapCorruption::DanglingLink { offset: link, link: block });
                }

                let stored_prev = self
                    .arena
                    .get_word(block)
                    .ok_or(HeapCorruption::OutOfBounds { offset: block })?;
                if stored_prev != link {
                    return Err(HeapCorruption::AsymmetricLink { offset: block });
                }

                let expected = SegregatedFreeList::<N>::bucket_for(tag.size());
                if expected != bucket {
                    return Err(HeapCorruption::WrongBucket {
                        offset: block,
                        bucket,
                        expected,
                    });
                }

                if tag.size() < last_size {
                    return Err(HeapCorruption::Unsorted { bucket, offset: block });
                }

                indexed += 1;
                len += 1;
                if indexed > limit {
                    return Err(HeapCorruption::IndexMismatch {
                        walked: limit,
                        indexed,
                    });
                }

                last_size = tag.size();
                prev = Some(block);
                current = self
                    .arena
                    .get_word(block + WORD_SIZE)
                    .map(|word| (word != 0).then_some(word))
                    .ok_or(HeapCorruption::OutOfBounds { offset: block })?;
            }

            if len != list.len {
                return Err(HeapCorruption::IndexMismatch {
                    walked: len,
                    indexed: list.len,
                });
            }
        }

        Ok(indexed)
    }
}
