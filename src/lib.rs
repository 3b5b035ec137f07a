//! Segregated free list allocator with boundary tag coalescing.
//!
//! The allocator manages one contiguous arena that only grows at the end,
//! like the classic `sbrk` heap. Every block carries a one word header and
//! free blocks also carry a footer, so both neighbours of any block can be
//! found in constant time:
//!
//! ```text
//!   +-----+----------+---------------+-------+---------------+---------+
//!   | pad | prologue |     Free      | Alloc |     Free      | epilog. |
//!   +-----+----------+---------------+-------+---------------+---------+
//!                    ^                       ^
//!                    |                       |
//!   lists[1] --------+                       |
//!   lists[7] --------------------------------+
//! ```
//!
//! Free blocks are indexed in [`DEFAULT_BUCKETS`] size classes, each one a
//! doubly linked list sorted by size that lives inside the free blocks
//! themselves. Releasing a block merges it with its free neighbours right
//! away, so the arena never contains two adjacent free blocks.
//!
//! Blocks are addressed by [`Pointer`], the offset of their payload within
//! the arena, and payload bytes are only reachable through the [`Heap`] that
//! owns them. See [`Heap`] for the single threaded API and [`LockedHeap`] to
//! share one between threads.

pub mod align;
mod allocator;
mod arena;
mod block;
mod check;
mod config;
mod error;
mod freelist;
mod header;
mod list;
mod locked;
mod platform;
mod realloc;

use std::num::NonZeroUsize;

pub use allocator::Heap;
pub use check::{HeapCorruption, Stats};
pub use config::{Config, DEFAULT_CHUNK_SIZE, DEFAULT_SPLIT_THRESHOLD};
pub use error::{AllocError, Result};
pub use freelist::DEFAULT_BUCKETS;
pub use locked::LockedHeap;
#[cfg(all(any(unix, windows), not(miri)))]
pub use platform::ReservedRegion;
pub use platform::{default_source, DefaultSource, HeapBuffer, MemorySource, DEFAULT_MAX_HEAP};

/// Handle to an allocated block: the offset of its payload from the start of
/// the arena. Offset 0 is never a payload (the prologue lives there), which
/// makes `Option<Pointer>` the same size as `usize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer(NonZeroUsize);

impl Pointer {
    /// Wraps a raw arena offset. Returns `None` for 0.
    pub const fn new(offset: usize) -> Option<Self> {
        match NonZeroUsize::new(offset) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    /// Offset of the payload within the arena. Always a multiple of
    /// [`align::ALIGNMENT`].
    #[inline]
    pub const fn offset(self) -> usize {
        self.0.get()
    }

    /// Builds a pointer out of a block offset computed by the allocator.
    /// Payloads always come after the sentinels, so `offset` is never 0.
    #[inline]
    pub(crate) fn from_offset(offset: usize) -> Self {
        debug_assert!(offset != 0, "payload offsets are never 0");
        Self(NonZeroUsize::new(offset).unwrap_or(NonZeroUsize::MIN))
    }
}
