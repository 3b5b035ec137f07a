use std::fmt;

/// Low bit of a tag, set when the block is in use.
const ALLOCATED: usize = 0b001;

/// Second bit of a tag, set when the block physically preceding this one is
/// in use. Allocated blocks don't keep a footer, so this is the only way to
/// tell whether the previous block can be merged without reading payload.
const PREV_ALLOCATED: usize = 0b010;

/// Sizes are multiples of 8 at least, so the 3 low bits are free for flags.
const FLAGS: usize = 0b111;

/// Boundary tag. This is the word stored in every block header and, while the
/// block is free, also in its footer:
///
/// ```text
///  63                                   3   2   1   0
/// +---------------------------------------+---+---+---+
/// |              block size               | - | P | A |
/// +---------------------------------------+---+---+---+
///                                               |   |
///                   previous block allocated <--+   +--> this block allocated
/// ```
///
/// The size includes the header itself, the payload and the footer (if any),
/// so jumping `size` bytes forward from a block always lands on the next
/// block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(usize);

impl Tag {
    /// Builds a tag for a block of `size` bytes. The previous allocated bit
    /// starts cleared, see [`Tag::with_prev_allocated`].
    #[inline]
    pub const fn pack(size: usize, allocated: bool) -> Self {
        debug_assert!(size & FLAGS == 0);
        Self(size | if allocated { ALLOCATED } else { 0 })
    }

    /// Reinterprets a raw word read from the arena.
    #[inline]
    pub const fn from_word(word: usize) -> Self {
        Self(word)
    }

    /// Raw word to be written into the arena.
    #[inline]
    pub const fn word(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & !FLAGS
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    #[inline]
    pub const fn is_prev_allocated(self) -> bool {
        self.0 & PREV_ALLOCATED != 0
    }

    /// Returns a copy of this tag with the previous allocated bit set to
    /// `prev_allocated`.
    #[inline]
    pub const fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        if prev_allocated {
            Self(self.0 | PREV_ALLOCATED)
        } else {
            Self(self.0 & !PREV_ALLOCATED)
        }
    }

    /// Whether two tags describe the same block, ignoring the previous
    /// allocated bit which footers don't carry.
    #[inline]
    pub const fn same_block(self, other: Self) -> bool {
        self.size() == other.size() && self.is_allocated() == other.is_allocated()
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .field("prev_allocated", &self.is_prev_allocated())
            .finish()
    }
}
