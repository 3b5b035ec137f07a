//! Error types returned by the allocator.
//!
//! There are only two ways an allocator operation can fail in a recoverable
//! way: the host refuses to give us more memory, or the request itself makes
//! no sense (zero bytes). Everything else, like releasing a pointer twice, is
//! undefined behaviour by contract and is not reported here. See
//! [`crate::check`] for the debugging aid that detects corrupted metadata.

use thiserror::Error;

/// Errors produced by [`crate::Heap`] and the [`crate::MemorySource`]
/// implementations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The memory source cannot extend the arena any further.
    #[error("out of memory: requested {requested} bytes, {available} bytes left in the source")]
    OutOfMemory {
        /// Number of bytes the arena tried to grow by.
        requested: usize,
        /// Number of bytes the source could still hand out.
        available: usize,
    },

    /// Zero sized allocations are refused. They don't corrupt anything, the
    /// caller simply gets no memory back.
    #[error("invalid argument: zero sized allocation")]
    InvalidArgument,
}

/// Shorter syntax for allocator results.
pub type Result<T> = std::result::Result<T, AllocError>;
