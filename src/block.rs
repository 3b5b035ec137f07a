use crate::{
    align::{checked_align_up, WORD_SIZE},
    arena::Arena,
    header::Tag,
    platform::MemorySource,
};

/// Size of the header of every block. Allocated blocks carry nothing else,
/// so this is also the per allocation overhead.
pub(crate) const HEADER_SIZE: usize = WORD_SIZE;

/// Minimum block size: header, two free list links and footer. Blocks are
/// never split if the remainder would be smaller than this.
pub(crate) const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

/// The prologue is a permanently allocated block with header and footer but
/// no payload.
pub(crate) const PROLOGUE_SIZE: usize = 2 * WORD_SIZE;

/// Padding word + prologue + epilogue header.
pub(crate) const SENTINELS_SIZE: usize = 4 * WORD_SIZE;

/// Payload offset of the first real block in the arena.
pub(crate) const FIRST_BLOCK: usize = SENTINELS_SIZE;

/// Memory layout of blocks. Blocks are identified by the offset of their
/// payload (the first byte after the header), which is also what we hand out
/// to callers. An allocated block looks like this:
///
/// ```text
///              +---------------------+
///              | size | P | 1        |  <- header
/// payload ->   +---------------------+
///              |                     |
///              |    caller's data    |  <- size - HEADER_SIZE bytes
///              |                     |
///              +---------------------+
/// ```
///
/// And a free one like this:
///
/// ```text
///              +---------------------+
///              | size | 1 | 0        |  <- header
/// payload ->   +---------------------+
///              | prev free block     |  <- see crate::list
///              +---------------------+
///              | next free block     |
///              +---------------------+
///              |         ...         |
///              +---------------------+
///              | size | 0 | 0        |  <- footer
///              +---------------------+
/// ```
///
/// The footer is what makes [`Arena::prev_block`] possible: the word right
/// before our header is the footer of the previous block, if that block is
/// free. If it's not free those bytes are somebody's payload, which is why
/// the header carries the previous allocated bit.
impl<S: MemorySource> Arena<S> {
    /// Offset of the header of `block`.
    #[inline]
    pub fn header_of(block: usize) -> usize {
        block - HEADER_SIZE
    }

    /// Offset of the footer of `block`. Only meaningful if the block is free.
    #[inline]
    pub fn footer_of(&self, block: usize) -> usize {
        block + self.header(block).size() - 2 * WORD_SIZE
    }

    #[inline]
    pub fn header(&self, block: usize) -> Tag {
        Tag::from_word(self.read_word(Self::header_of(block)))
    }

    #[inline]
    pub fn set_header(&mut self, block: usize, tag: Tag) {
        self.write_word(Self::header_of(block), tag.word());
    }

    #[inline]
    pub fn footer(&self, block: usize) -> Tag {
        Tag::from_word(self.read_word(self.footer_of(block)))
    }

    /// Writes header and footer of a free block of `size` bytes.
    pub fn set_free_tags(&mut self, block: usize, size: usize, prev_allocated: bool) {
        let tag = Tag::pack(size, false);
        self.set_header(block, tag.with_prev_allocated(prev_allocated));
        self.write_word(self.footer_of(block), tag.word());
    }

    /// Payload offset of the block physically after `block`.
    #[inline]
    pub fn next_block(&self, block: usize) -> usize {
        block + self.header(block).size()
    }

    /// Payload offset of the block physically before `block`. Only valid if
    /// that block is free, which can be checked with
    /// [`Tag::is_prev_allocated`] on our own header.
    #[inline]
    pub fn prev_block(&self, block: usize) -> usize {
        let footer = Tag::from_word(self.read_word(block - 2 * WORD_SIZE));
        block - footer.size()
    }

    /// Updates the previous allocated bit of `block` without touching
    /// anything else.
    #[inline]
    pub fn set_prev_allocated(&mut self, block: usize, prev_allocated: bool) {
        let tag = self.header(block);
        self.set_header(block, tag.with_prev_allocated(prev_allocated));
    }

    /// Iterates over every block from the first one up to (excluding) the
    /// epilogue, yielding payload offsets and headers.
    pub fn blocks(&self) -> Blocks<'_, S> {
        Blocks {
            arena: self,
            current: FIRST_BLOCK,
        }
    }
}

/// See [`Arena::blocks`].
pub(crate) struct Blocks<'a, S> {
    arena: &'a Arena<S>,
    current: usize,
}

impl<'a, S: MemorySource> Iterator for Blocks<'a, S> {
    type Item = (usize, Tag);

    fn next(&mut self) -> Option<Self::Item> {
        let tag = Tag::from_word(self.arena.get_word(self.current - HEADER_SIZE)?);

        if tag.size() == 0 {
            return None;
        }

        let block = self.current;
        self.current += tag.size();

        Some((block, tag))
    }
}

/// Block size needed to serve a request of `size` bytes: header plus
/// payload rounded up to [`crate::align::ALIGNMENT`], and never less than
/// [`MIN_BLOCK_SIZE`]. Returns `None` for zero or if the computation
/// overflows.
pub(crate) fn block_size(size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }

    let total = checked_align_up(size.checked_add(HEADER_SIZE)?)?;

    Some(total.max(MIN_BLOCK_SIZE))
}

/// Payload capacity of a block of `size` bytes once allocated.
#[inline]
pub(crate) const fn payload_size(size: usize) -> usize {
    size - HEADER_SIZE
}
