use crate::{
    align::WORD_SIZE,
    block::{PROLOGUE_SIZE, SENTINELS_SIZE},
    error::{AllocError, Result},
    header::Tag,
    platform::MemorySource,
};

/// The single contiguous region managed by the allocator. It owns the
/// [`MemorySource`] and knows how to read and write words at arbitrary
/// offsets, everything else is built on top of that. Here's what the arena
/// looks like right after [`Arena::init`]:
///
/// ```text
///   0        W        2W       3W       4W
///   +--------+--------+--------+--------+
///   | unused | 2W / 1 | 2W / 1 |  0 / 1 |
///   +--------+--------+--------+--------+
///            ^                 ^        ^
///            |                 |        |
///            +-- prologue      |        +-- break
///                header/footer +-- epilogue header
/// ```
///
/// The first word is padding so that payloads end up aligned to two words.
/// After every growth the old epilogue header becomes the header of the new
/// free block and a new epilogue is written right before the new break:
///
/// ```text
///   +----------+-----------------------------+------------+--------+
///   | prologue |      ...existing blocks...  | new block  |  0 / 1 |
///   +----------+-----------------------------+------------+--------+
///                                            ^                     ^
///                                            |                     |
///                                            +-- old break         +-- new break
/// ```
pub(crate) struct Arena<S> {
    source: S,
    /// Number of successful calls to [`Arena::grow`].
    growths: usize,
}

impl<S: MemorySource> Arena<S> {
    /// Lays out the sentinels at the start of `source`, which must not have
    /// handed out any bytes yet. Every offset in the arena is relative to the
    /// start of the source, so a source that already moved its break is
    /// rejected with [`AllocError::InvalidArgument`].
    pub fn init(mut source: S) -> Result<Self> {
        if !source.is_empty() {
            log::warn!("memory source already holds {} bytes", source.len());
            return Err(AllocError::InvalidArgument);
        }

        source.sbrk(SENTINELS_SIZE)?;

        let mut arena = Self { source, growths: 0 };
        arena.write_word(0, 0);
        arena.write_word(WORD_SIZE, Tag::pack(PROLOGUE_SIZE, true).word());
        arena.write_word(PROLOGUE_SIZE, Tag::pack(PROLOGUE_SIZE, true).word());
        arena.write_word(
            3 * WORD_SIZE,
            Tag::pack(0, true).with_prev_allocated(true).word(),
        );

        log::debug!("arena initialised with {} bytes of sentinels", SENTINELS_SIZE);

        Ok(arena)
    }

    /// Moves the break `size` bytes forward and turns the new bytes into one
    /// free block, followed by a fresh epilogue. Returns the payload offset
    /// of the new block, which is not indexed nor coalesced yet.
    ///
    /// `size` must be aligned and at least the minimum block size. If the
    /// source refuses to grow the arena is left untouched.
    pub fn grow(&mut self, size: usize) -> Result<usize> {
        // The old epilogue header sits right before the old break, so the
        // old break is exactly the payload offset of the new block.
        let block = self.source.sbrk(size)?;
        let prev_allocated = self.header(block).is_prev_allocated();

        self.set_free_tags(block, size, prev_allocated);
        self.set_header(block + size, Tag::pack(0, true));
        self.growths += 1;

        log::debug!(
            "arena grew by {size} bytes, new block at {block}, break at {}",
            self.len()
        );

        Ok(block)
    }

    /// Reads the machine word stored at `offset`. Panics if `offset` is out
    /// of bounds, which only happens if the caller handed us a pointer that
    /// didn't come from this heap.
    #[inline]
    pub fn read_word(&self, offset: usize) -> usize {
        let mut word = [0; WORD_SIZE];
        word.copy_from_slice(&self.source.as_slice()[offset..offset + WORD_SIZE]);
        usize::from_ne_bytes(word)
    }

    /// Like [`Arena::read_word`] but returns `None` for offsets out of
    /// bounds. Used by the heap checker, which must not trust anything.
    pub fn get_word(&self, offset: usize) -> Option<usize> {
        let end = offset.checked_add(WORD_SIZE)?;
        let bytes = self.source.as_slice().get(offset..end)?;
        let mut word = [0; WORD_SIZE];
        word.copy_from_slice(bytes);
        Some(usize::from_ne_bytes(word))
    }

    #[inline]
    pub fn write_word(&mut self, offset: usize, value: usize) {
        self.source.as_mut_slice()[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
    }

    /// Bytes from `offset` to `offset + len`.
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.source.as_slice()[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.source.as_mut_slice()[offset..offset + len]
    }

    /// Copies `count` bytes from `src` to `dst`. Ranges may overlap.
    pub fn copy(&mut self, src: usize, dst: usize, count: usize) {
        self.source.as_mut_slice().copy_within(src..src + count, dst);
    }

    /// Current size of the arena in bytes, sentinels included.
    #[inline]
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Payload offset of the epilogue, or "the block after the last block".
    #[inline]
    pub fn epilogue(&self) -> usize {
        self.len()
    }

    /// How many bytes the source can still hand out.
    pub fn remaining(&self) -> usize {
        self.source.remaining()
    }

    pub fn growths(&self) -> usize {
        self.growths
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }
}
