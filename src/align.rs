use std::mem;

/// Machine word size in bytes. Boundary tags and free list links are all one
/// word wide.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Every payload offset and every block size is a multiple of this value,
/// which is two machine words (16 bytes on 64 bit machines).
pub const ALIGNMENT: usize = 2 * WORD_SIZE;

/// Rounds `value` up to the next multiple of [`ALIGNMENT`].
///
/// ```rust
/// use segalloc::align::{align_up, ALIGNMENT};
///
/// assert_eq!(align_up(1), ALIGNMENT);
/// assert_eq!(align_up(ALIGNMENT), ALIGNMENT);
/// assert_eq!(align_up(ALIGNMENT + 1), 2 * ALIGNMENT);
/// ```
#[inline]
pub const fn align_up(value: usize) -> usize {
    (value + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Same as [`align_up`] but returns `None` instead of wrapping around when
/// `value` is close to [`usize::MAX`].
#[inline]
pub const fn checked_align_up(value: usize) -> Option<usize> {
    match value.checked_add(ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Whether `value` is a multiple of [`ALIGNMENT`].
#[inline]
pub const fn is_aligned(value: usize) -> bool {
    value & (ALIGNMENT - 1) == 0
}
