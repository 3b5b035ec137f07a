use crate::{
    arena::Arena,
    block::{block_size, payload_size, MIN_BLOCK_SIZE},
    config::Config,
    error::{AllocError, Result},
    freelist::{SegregatedFreeList, DEFAULT_BUCKETS},
    header::Tag,
    platform::{default_source, DefaultSource, MemorySource},
    Pointer,
};

/// This is the allocator. Once you've read [`crate::header`],
/// [`crate::block`], [`crate::list`] and [`crate::freelist`], this is where
/// the circle gets completed:
///
/// ```text
///                  +-----------------------------------------------+
///                  |                                               |
///   lists[0] ------|-----------------------+                       |
///                  |                       |                       |
///                  v                       v                       |
///   +----------+--------+-------+-------+--------+-------+------------------+---------+
///   | prologue |  Free  | Alloc | Alloc |  Free  | Alloc |       Free       | epilog. |
///   +----------+--------+-------+-------+--------+-------+------------------+---------+
///                                                                ^
///   lists[N-1] --------------------------------------------------+
/// ```
///
/// Every block in the arena is delimited by boundary tags, free blocks are
/// also linked into the bucket of their size class. Allocation searches the
/// buckets, splits the block it finds and grows the arena when nothing fits.
/// Releasing a block merges it with its free neighbours right away, so no two
/// free blocks are ever adjacent.
///
/// The heap is single threaded and needs `&mut self` for everything. If you
/// need to share it, see [`crate::LockedHeap`].
///
/// # Examples
///
/// ```rust
/// use segalloc::{Heap, HeapBuffer};
///
/// let mut heap = Heap::new(HeapBuffer::new(1 << 20)).unwrap();
///
/// let ptr = heap.allocate(64).unwrap();
/// heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
///
/// let ptr = heap.resize(Some(ptr), 1024).unwrap();
/// assert_eq!(&heap.payload(ptr)[..5], b"hello");
///
/// heap.release(ptr);
/// ```
pub struct Heap<S: MemorySource = DefaultSource, const N: usize = DEFAULT_BUCKETS> {
    pub(crate) arena: Arena<S>,
    pub(crate) free_lists: SegregatedFreeList<N>,
    pub(crate) config: Config,
}

impl<S: MemorySource> Heap<S> {
    /// Builds a heap on top of `source` with the default [`Config`].
    pub fn new(source: S) -> Result<Self> {
        Self::with_config(source, Config::default())
    }

    /// Builds a heap on top of `source` configured with `config`.
    pub fn with_config(source: S, config: Config) -> Result<Self> {
        Self::with_buckets(source, config)
    }
}

impl Heap<DefaultSource> {
    /// Builds a heap backed by the platform's preferred memory source, able
    /// to grow up to `max_heap` bytes.
    pub fn reserve(max_heap: usize) -> Result<Self> {
        Self::new(default_source(max_heap)?)
    }
}

impl<S: MemorySource, const N: usize> Heap<S, N> {
    /// Builds a heap with `N` size classes instead of the default number.
    ///
    /// ```rust
    /// use segalloc::{Config, Heap, HeapBuffer};
    ///
    /// let mut heap = Heap::<_, 4>::with_buckets(HeapBuffer::new(1 << 16), Config::new()).unwrap();
    /// assert!(heap.allocate(100).is_some());
    /// ```
    pub fn with_buckets(source: S, config: Config) -> Result<Self> {
        let Some(config) = config.normalized() else {
            return Err(AllocError::OutOfMemory {
                requested: config.chunk_size.max(config.initial_size),
                available: source.remaining(),
            });
        };

        let mut heap = Self {
            arena: Arena::init(source)?,
            free_lists: SegregatedFreeList::new(),
            config,
        };

        heap.extend(config.initial_size)?;

        log::debug!(
            "heap initialised with {} bytes, {} size classes",
            heap.arena.len(),
            N
        );

        Ok(heap)
    }

    /// Allocates a block that can hold at least `size` bytes and returns its
    /// payload. Returns `None` for zero sized requests or when the memory
    /// source is exhausted. See [`Heap::try_allocate`] to tell them apart.
    pub fn allocate(&mut self, size: usize) -> Option<Pointer> {
        self.try_allocate(size).ok()
    }

    /// Same as [`Heap::allocate`] but reports why it failed.
    pub fn try_allocate(&mut self, size: usize) -> Result<Pointer> {
        if size == 0 {
            return Err(AllocError::InvalidArgument);
        }

        let Some(asize) = block_size(size) else {
            return Err(AllocError::OutOfMemory {
                requested: size,
                available: self.arena.remaining(),
            });
        };

        let block = match self.free_lists.find(&self.arena, asize) {
            Some(block) => block,
            None => self.extend(asize)?,
        };

        let block = self.place(block, asize);
        log::trace!("allocate({size}) -> {block} [{asize} bytes]");

        Ok(Pointer::from_offset(block))
    }

    /// Allocates `size` bytes and zeroes the payload.
    pub fn allocate_zeroed(&mut self, size: usize) -> Option<Pointer> {
        let ptr = self.allocate(size)?;
        self.payload_mut(ptr).fill(0);
        Some(ptr)
    }

    /// Releases the block at `ptr` and merges it with its free neighbours.
    ///
    /// # Contract
    ///
    /// `ptr` must have been returned by [`Heap::allocate`] or
    /// [`Heap::resize`] on this same heap and must not have been released
    /// since. There's no validity bookkeeping, so anything else is undefined:
    /// it might corrupt the heap metadata or panic on an out of bounds
    /// offset. It will never touch memory outside the arena though. Use
    /// [`Heap::check`] to hunt this kind of bug down.
    pub fn release(&mut self, ptr: Pointer) {
        let block = ptr.offset();
        let tag = self.arena.header(block);

        self.arena.set_free_tags(block, tag.size(), tag.is_prev_allocated());
        let next = self.arena.next_block(block);
        self.arena.set_prev_allocated(next, false);

        self.free_lists.insert(&mut self.arena, block);
        let merged = self.coalesce(block);

        log::trace!("release({block}) -> free block at {merged}");
    }

    /// Number of payload bytes the caller can use at `ptr`. Might be bigger
    /// than what was requested because of alignment and minimum block sizes.
    pub fn usable_size(&self, ptr: Pointer) -> usize {
        payload_size(self.arena.header(ptr.offset()).size())
    }

    /// Payload of the allocated block at `ptr`, [`Heap::usable_size`] bytes.
    pub fn payload(&self, ptr: Pointer) -> &[u8] {
        self.arena.bytes(ptr.offset(), self.usable_size(ptr))
    }

    /// Mutable payload of the allocated block at `ptr`.
    pub fn payload_mut(&mut self, ptr: Pointer) -> &mut [u8] {
        let len = self.usable_size(ptr);
        self.arena.bytes_mut(ptr.offset(), len)
    }

    /// Current size of the arena in bytes, sentinels included.
    pub fn heap_size(&self) -> usize {
        self.arena.len()
    }

    /// Configuration in use, already normalized.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The memory source backing this heap.
    pub fn source(&self) -> &S {
        self.arena.source()
    }

    /// Consumes the heap and returns its memory source.
    pub fn into_source(self) -> S {
        self.arena.into_source()
    }

    /// Grows the arena by at least `size` bytes (never less than the
    /// configured chunk size) and returns the resulting free block, already
    /// indexed and merged with the free block that preceded the old
    /// epilogue, if any.
    pub(crate) fn extend(&mut self, size: usize) -> Result<usize> {
        let too_big = || AllocError::OutOfMemory {
            requested: size,
            available: self.arena.remaining(),
        };

        let size = crate::align::checked_align_up(size.max(self.config.chunk_size)).ok_or_else(too_big)?;

        let block = self.arena.grow(size)?;
        self.free_lists.insert(&mut self.arena, block);

        Ok(self.coalesce(block))
    }

    /// Allocates `asize` bytes out of free `block` and returns the payload
    /// offset of the allocated piece. If the leftover can't hold a minimum
    /// block the whole block is used. Otherwise it's split:
    ///
    /// ```text
    ///  asize < split_threshold:        asize >= split_threshold:
    ///
    ///  +-----------+---------------+   +---------------+-----------+
    ///  |   Alloc   |     Free      |   |     Free      |   Alloc   |
    ///  +-----------+---------------+   +---------------+-----------+
    ///  ^                               ^               ^
    ///  +-- returned                    +-- block       +-- returned
    /// ```
    ///
    /// Small allocations pack together at low addresses, big ones go towards
    /// the end of the arena, where they merge with new growth once freed.
    pub(crate) fn place(&mut self, block: usize, asize: usize) -> usize {
        let tag = self.arena.header(block);
        let size = tag.size();
        let prev_allocated = tag.is_prev_allocated();

        self.free_lists.remove(&mut self.arena, block);

        if size - asize < MIN_BLOCK_SIZE {
            self.arena.set_header(block, Tag::pack(size, true).with_prev_allocated(prev_allocated));
            let next = self.arena.next_block(block);
            self.arena.set_prev_allocated(next, true);
            return block;
        }

        if asize < self.config.split_threshold {
            self.arena.set_header(block, Tag::pack(asize, true).with_prev_allocated(prev_allocated));
            let rest = block + asize;
            self.arena.set_free_tags(rest, size - asize, true);
            self.free_lists.insert(&mut self.arena, rest);
            block
        } else {
            self.arena.set_free_tags(block, size - asize, prev_allocated);
            self.free_lists.insert(&mut self.arena, block);
            let allocated = block + size - asize;
            self.arena.set_header(allocated, Tag::pack(asize, true));
            let next = self.arena.next_block(allocated);
            self.arena.set_prev_allocated(next, true);
            allocated
        }
    }

    /// Merges free (and indexed) `block` with its free neighbours, if any,
    /// and returns the payload offset of the resulting block, which is
    /// indexed again according to its new size.
    ///
    /// ```text
    /// Before:
    ///
    /// +---------------+---------------+---------------+
    /// |    Free A     | Recently freed|    Free C     |
    /// +---------------+---------------+---------------+
    ///
    /// After:
    ///
    /// +-----------------------------------------------+
    /// |                  Free A + B + C               |
    /// +-----------------------------------------------+
    /// ```
    pub(crate) fn coalesce(&mut self, block: usize) -> usize {
        let tag = self.arena.header(block);
        let next = self.arena.next_block(block);
        let next_tag = self.arena.header(next);

        let prev_free = !tag.is_prev_allocated();
        let next_free = !next_tag.is_allocated();

        let (merged, size, prev_allocated) = match (prev_free, next_free) {
            (false, false) => return block,

            (true, false) => {
                let prev = self.arena.prev_block(block);
                let prev_tag = self.arena.header(prev);
                self.free_lists.remove(&mut self.arena, block);
                self.free_lists.remove(&mut self.arena, prev);
                (prev, prev_tag.size() + tag.size(), prev_tag.is_prev_allocated())
            }

            (false, true) => {
                self.free_lists.remove(&mut self.arena, block);
                self.free_lists.remove(&mut self.arena, next);
                (block, tag.size() + next_tag.size(), true)
            }

            (true, true) => {
                let prev = self.arena.prev_block(block);
                let prev_tag = self.arena.header(prev);
                self.free_lists.remove(&mut self.arena, block);
                self.free_lists.remove(&mut self.arena, prev);
                self.free_lists.remove(&mut self.arena, next);
                let size = prev_tag.size() + tag.size() + next_tag.size();
                (prev, size, prev_tag.is_prev_allocated())
            }
        };

        self.arena.set_free_tags(merged, size, prev_allocated);
        self.free_lists.insert(&mut self.arena, merged);

        merged
    }
}
