use crate::{
    allocator::Heap,
    block::{block_size, payload_size, MIN_BLOCK_SIZE},
    header::Tag,
    platform::MemorySource,
    Pointer,
};

/// This is used to carry resize metadata around, we don't want to pass the
/// same parameters over and over again. For the actual business, see
/// [`Heap::resize`].
pub(crate) struct Realloc {
    /// Payload offset of the block being resized.
    pub block: usize,
    /// Current size of the block, header included.
    pub old_size: usize,
    /// Block size needed for the new request.
    pub new_size: usize,
    /// Bytes the caller asked for.
    pub requested: usize,
    pub method: ReallocMethod,
}

/// What the resize should do to the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReallocMethod {
    /// The block already has exactly the right size.
    Unchanged,
    Shrink,
    Grow,
}

impl Realloc {
    /// Builds a new [`Realloc`] for the block at `block` which currently
    /// spans `old_size` bytes. Returns `None` if `requested` bytes can't be
    /// represented as a block size.
    pub fn new(block: usize, old_size: usize, requested: usize) -> Option<Self> {
        let new_size = block_size(requested)?;

        let method = if new_size == old_size {
            ReallocMethod::Unchanged
        } else if new_size < old_size {
            ReallocMethod::Shrink
        } else {
            ReallocMethod::Grow
        };

        Some(Self {
            block,
            old_size,
            new_size,
            requested,
            method,
        })
    }

    /// Number of bytes that should be copied if the block has to move. We
    /// don't remember how much the caller asked for originally, so this is
    /// bounded by the payload capacity of the old block.
    pub fn count(&self) -> usize {
        payload_size(self.old_size).min(self.requested)
    }
}

impl<S: MemorySource, const N: usize> Heap<S, N> {
    /// Resizes the allocation at `ptr` so that it can hold `size` bytes,
    /// preserving its contents up to the smaller of both sizes.
    ///
    /// - `ptr == None` behaves like [`Heap::allocate`].
    /// - `size == 0` releases `ptr` and returns `None`.
    /// - Shrinking always happens in place, the tail is released.
    /// - Growing happens in place if the block is followed by a free block
    ///   big enough, or if it sits at the end of the arena (possibly after
    ///   a free block), in which case the arena grows once.
    /// - Otherwise the contents move to a new block and the old one is
    ///   released.
    ///
    /// Returns `None` if memory is exhausted, in which case the original
    /// block is left untouched.
    ///
    /// The same contract as [`Heap::release`] applies to `ptr`.
    pub fn resize(&mut self, ptr: Option<Pointer>, size: usize) -> Option<Pointer> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            self.release(ptr);
            return None;
        }

        let block = ptr.offset();
        let realloc = Realloc::new(block, self.arena.header(block).size(), size)?;

        let result = match realloc.method {
            ReallocMethod::Unchanged => Some(ptr),
            ReallocMethod::Shrink => {
                self.shrink_in_place(&realloc);
                Some(ptr)
            }
            ReallocMethod::Grow => {
                if self.grow_in_place(&realloc) {
                    Some(ptr)
                } else {
                    self.relocate(&realloc)
                }
            }
        };

        log::trace!(
            "resize({block}, {size}) {:?} {} -> {} bytes: {result:?}",
            realloc.method,
            realloc.old_size,
            realloc.new_size,
        );

        result
    }

    /// Cuts the block down to `realloc.new_size` bytes and releases the
    /// tail, if it's big enough to be a block on its own.
    fn shrink_in_place(&mut self, realloc: &Realloc) {
        self.trim(realloc.block, realloc.old_size, realloc.new_size);
    }

    /// Tries to extend the block without moving it. Returns whether it
    /// succeeded.
    ///
    /// ```text
    /// Case 1, next block is free and big enough:
    ///
    /// +---------+-------------------+       +-----------------+---------+
    /// |  Block  |      Free         |  ->   |      Block      |  Free   |
    /// +---------+-------------------+       +-----------------+---------+
    ///
    /// Case 2, block is the last one (maybe followed by a free block):
    ///
    /// +---------+------+----------+         +-----------------------+---+----------+
    /// |  Block  | Free | epilogue |   ->    |         Block         | F | epilogue |
    /// +---------+------+----------+         +-----------------------+---+----------+
    ///                                                   ^ arena grows here
    /// ```
    fn grow_in_place(&mut self, realloc: &Realloc) -> bool {
        let block = realloc.block;
        let next = self.arena.next_block(block);
        let next_tag = self.arena.header(next);

        let mut available = realloc.old_size;
        let mut last = next;

        if !next_tag.is_allocated() {
            available += next_tag.size();
            last = self.arena.next_block(next);
        }

        if available < realloc.new_size {
            // Only the last block of the arena can grow into new memory.
            if last != self.arena.epilogue() {
                return false;
            }

            if let Err(err) = self.extend(realloc.new_size - available) {
                log::debug!("in place growth of {block} failed: {err}");
                return false;
            }
        }

        // Whatever happened above, the next block is now free and big
        // enough. Absorb it.
        let next = self.arena.next_block(block);
        let next_size = self.arena.header(next).size();
        self.free_lists.remove(&mut self.arena, next);

        let total = realloc.old_size + next_size;
        self.arena.set_prev_allocated(self.arena.next_block(next), true);
        let prev_allocated = self.arena.header(block).is_prev_allocated();
        self.arena.set_header(block, Tag::pack(total, true).with_prev_allocated(prev_allocated));

        self.trim(block, total, realloc.new_size);

        true
    }

    /// Allocates a new block, copies the contents and releases the old one.
    fn relocate(&mut self, realloc: &Realloc) -> Option<Pointer> {
        let new = self.allocate(realloc.requested)?;

        self.arena.copy(realloc.block, new.offset(), realloc.count());
        self.release(Pointer::from_offset(realloc.block));

        Some(new)
    }

    /// Splits allocated `block` of `size` bytes so that it only spans
    /// `new_size` bytes, releasing the rest. Does nothing if the rest would
    /// be smaller than a minimum block.
    fn trim(&mut self, block: usize, size: usize, new_size: usize) {
        if size - new_size < MIN_BLOCK_SIZE {
            return;
        }

        let prev_allocated = self.arena.header(block).is_prev_allocated();
        self.arena.set_header(block, Tag::pack(new_size, true).with_prev_allocated(prev_allocated));

        let rest = block + new_size;
        self.arena.set_free_tags(rest, size - new_size, true);
        let after = self.arena.next_block(rest);
        self.arena.set_prev_allocated(after, false);

        self.free_lists.insert(&mut self.arena, rest);
        self.coalesce(rest);
    }
}
