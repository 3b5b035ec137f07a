use crate::{align::checked_align_up, block::MIN_BLOCK_SIZE};

/// Default growth increment in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Default size at or above which [`crate::Heap`] places allocations at the
/// high end of the free block it splits.
pub const DEFAULT_SPLIT_THRESHOLD: usize = 100;

/// Tunables of a [`crate::Heap`]. None of these affect correctness, only how
/// often the arena grows and how fragmented it gets.
///
/// # Examples
///
/// ```rust
/// use segalloc::{Config, Heap, HeapBuffer};
///
/// let config = Config::new()
///     .with_chunk_size(1 << 16)
///     .with_split_threshold(256);
///
/// let heap = Heap::with_config(HeapBuffer::new(1 << 20), config).unwrap();
/// assert_eq!(heap.config().chunk_size, 1 << 16);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Minimum number of bytes requested from the memory source every time
    /// the arena needs to grow. Requests bigger than this grow the arena by
    /// exactly what they need.
    pub chunk_size: usize,
    /// Size of the first growth, performed when the heap is built.
    pub initial_size: usize,
    /// Block size threshold of the split policy. Smaller blocks are carved
    /// from the low end of a free block, leaving the remainder at the high
    /// end. Blocks at or above the threshold are carved from the high end.
    pub split_threshold: usize,
}

impl Config {
    /// 4 KiB chunks, initial growth of one chunk, split threshold of 100.
    pub const fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_size: DEFAULT_CHUNK_SIZE,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
        }
    }

    /// Sets the growth increment. Also sets the initial growth, call
    /// [`Config::with_initial_size`] afterwards to change it separately.
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.initial_size = chunk_size;
        self
    }

    /// Sets the size of the growth performed when the heap is built, which
    /// is also how much the heap can serve before growing again.
    pub const fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Sets the block size at or above which allocations are carved from
    /// the high end of free blocks.
    pub const fn with_split_threshold(mut self, split_threshold: usize) -> Self {
        self.split_threshold = split_threshold;
        self
    }

    /// Rounds sizes up to the block granularity so that every growth yields
    /// at least one minimum sized, aligned block. Returns `None` if a size is
    /// too close to [`usize::MAX`] to be rounded.
    pub(crate) fn normalized(self) -> Option<Self> {
        Some(Self {
            chunk_size: checked_align_up(self.chunk_size.max(MIN_BLOCK_SIZE))?,
            initial_size: checked_align_up(self.initial_size.max(MIN_BLOCK_SIZE))?,
            split_threshold: self.split_threshold,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
