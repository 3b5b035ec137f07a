//! Abstraction over the host primitive that feeds the arena. The allocator
//! only ever asks for "N more bytes right after the ones you gave me", which
//! is exactly what `sbrk` does, so that's the shape of [`MemorySource`].
//!
//! Blocks are addressed by offsets from the start of the source, never by raw
//! addresses, so a source is free to move its storage around as long as the
//! offset space stays contiguous. [`ReservedRegion`] never moves (the kernel
//! reserves the whole range up front), [`HeapBuffer`] might when its vector
//! reallocates.

use crate::error::{AllocError, Result};

/// Default upper bound for a memory source, 20 MiB.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Host memory provider for the arena.
pub trait MemorySource {
    /// Extends the source by `increment` bytes and returns the offset where
    /// the new bytes start (the previous break). On failure nothing changes.
    fn sbrk(&mut self, increment: usize) -> Result<usize>;

    /// Current break, or number of bytes handed out so far.
    fn len(&self) -> usize;

    /// Maximum number of bytes this source will ever hand out.
    fn capacity(&self) -> usize;

    /// All the bytes handed out so far, `0..self.len()`.
    fn as_slice(&self) -> &[u8];

    /// Mutable view of `0..self.len()`.
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Whether no bytes have been handed out yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many bytes can still be requested.
    fn remaining(&self) -> usize {
        self.capacity() - self.len()
    }
}

/// Shared failure path for all sources.
#[inline]
fn out_of_memory(requested: usize, available: usize) -> AllocError {
    log::warn!("memory source exhausted: requested {requested} bytes, {available} available");
    AllocError::OutOfMemory {
        requested,
        available,
    }
}

/// Memory source backed by a plain [`Vec<u8>`] capped at a maximum length.
/// This is what we use under Miri (no FFI there) and in most tests since it
/// makes out of memory conditions trivial to trigger.
#[derive(Debug, Clone)]
pub struct HeapBuffer {
    bytes: Vec<u8>,
    max_heap: usize,
}

impl HeapBuffer {
    /// Builds an empty buffer that refuses to grow past `max_heap` bytes.
    pub fn new(max_heap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max_heap,
        }
    }
}

impl Default for HeapBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEAP)
    }
}

impl MemorySource for HeapBuffer {
    fn sbrk(&mut self, increment: usize) -> Result<usize> {
        let old_break = self.bytes.len();

        let new_break = match old_break.checked_add(increment) {
            Some(new_break) if new_break <= self.max_heap => new_break,
            _ => return Err(out_of_memory(increment, self.remaining())),
        };

        // The host allocator might not have the memory even if we're under
        // our own limit.
        if self.bytes.try_reserve(increment).is_err() {
            return Err(out_of_memory(increment, self.remaining()));
        }

        self.bytes.resize(new_break, 0);
        Ok(old_break)
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn capacity(&self) -> usize {
        self.max_heap
    }

    fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(all(unix, not(miri)))]
mod unix {
    use std::{ptr::NonNull, slice};

    use super::{out_of_memory, MemorySource};
    use crate::error::Result;

    /// Memory source that reserves `max_heap` bytes of virtual memory with
    /// `mmap` and moves a break inside that range. The kernel only backs the
    /// pages we actually touch, so reserving a big range is cheap, and since
    /// the base never moves payload addresses are stable for the lifetime of
    /// the source.
    ///
    /// ```text
    /// base                      break                          base + max_heap
    ///  |                          |                                   |
    ///  v                          v                                   v
    ///  +--------------------------+-----------------------------------+
    ///  |   handed out to arena    |         reserved, untouched       |
    ///  +--------------------------+-----------------------------------+
    /// ```
    pub struct ReservedRegion {
        base: NonNull<u8>,
        brk: usize,
        max_heap: usize,
    }

    // The region is exclusively owned, nothing else holds the base pointer.
    unsafe impl Send for ReservedRegion {}

    impl ReservedRegion {
        /// Reserves `max_heap` bytes (rounded up to the page size).
        pub fn reserve(max_heap: usize) -> Result<Self> {
            let page_size = page_size();
            let length = max_heap
                .div_ceil(page_size)
                .max(1)
                .checked_mul(page_size)
                .ok_or_else(|| out_of_memory(max_heap, 0))?;

            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Private to our process, not mapped to any file, and don't
            // reserve swap for pages we might never use.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let address = unsafe { libc::mmap(std::ptr::null_mut(), length, protection, flags, -1, 0) };

            match NonNull::new(address.cast::<u8>()) {
                Some(base) if address != libc::MAP_FAILED => {
                    log::debug!("reserved {length} bytes at {base:?}");
                    Ok(Self {
                        base,
                        brk: 0,
                        max_heap: length,
                    })
                }
                _ => Err(out_of_memory(length, 0)),
            }
        }

        /// Base address of the reservation. Adding a payload offset to it
        /// yields the payload address.
        pub fn base(&self) -> NonNull<u8> {
            self.base
        }
    }

    impl MemorySource for ReservedRegion {
        fn sbrk(&mut self, increment: usize) -> Result<usize> {
            let old_break = self.brk;

            match old_break.checked_add(increment) {
                Some(new_break) if new_break <= self.max_heap => {
                    self.brk = new_break;
                    Ok(old_break)
                }
                _ => Err(out_of_memory(increment, self.remaining())),
            }
        }

        fn len(&self) -> usize {
            self.brk
        }

        fn capacity(&self) -> usize {
            self.max_heap
        }

        fn as_slice(&self) -> &[u8] {
            // SAFETY: `0..brk` lies inside the mapping, which is readable and
            // zero initialised by the kernel.
            unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
        }

        fn as_mut_slice(&mut self) -> &mut [u8] {
            // SAFETY: see `as_slice`, and `&mut self` guarantees exclusivity.
            unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
        }
    }

    impl Drop for ReservedRegion {
        fn drop(&mut self) {
            unsafe {
                if libc::munmap(self.base.as_ptr().cast(), self.max_heap) != 0 {
                    log::warn!("munmap of {} bytes at {:?} failed", self.max_heap, self.base);
                }
            }
        }
    }

    pub(crate) fn page_size() -> usize {
        match unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } {
            size if size > 0 => size as usize,
            _ => 4096,
        }
    }
}

#[cfg(all(windows, not(miri)))]
mod win32 {
    use std::{mem::MaybeUninit, ptr::NonNull, slice};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{out_of_memory, MemorySource};
    use crate::error::Result;

    /// Same idea as the unix version: reserve address space once, then
    /// commit pages as the break moves forward.
    pub struct ReservedRegion {
        base: NonNull<u8>,
        brk: usize,
        max_heap: usize,
    }

    unsafe impl Send for ReservedRegion {}

    impl ReservedRegion {
        pub fn reserve(max_heap: usize) -> Result<Self> {
            let page_size = page_size();
            let length = max_heap
                .div_ceil(page_size)
                .max(1)
                .checked_mul(page_size)
                .ok_or_else(|| out_of_memory(max_heap, 0))?;

            // Reserve only, pages become usable once committed in `sbrk`. See
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc
            let address = unsafe {
                Memory::VirtualAlloc(None, length, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS)
            };

            match NonNull::new(address.cast::<u8>()) {
                Some(base) => Ok(Self {
                    base,
                    brk: 0,
                    max_heap: length,
                }),
                None => Err(out_of_memory(length, 0)),
            }
        }

        pub fn base(&self) -> NonNull<u8> {
            self.base
        }
    }

    impl MemorySource for ReservedRegion {
        fn sbrk(&mut self, increment: usize) -> Result<usize> {
            let old_break = self.brk;

            let new_break = match old_break.checked_add(increment) {
                Some(new_break) if new_break <= self.max_heap => new_break,
                _ => return Err(out_of_memory(increment, self.remaining())),
            };

            if increment > 0 {
                let address = unsafe { self.base.as_ptr().add(old_break) };
                let committed = unsafe {
                    Memory::VirtualAlloc(
                        Some(address as *const std::ffi::c_void),
                        increment,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    )
                };
                if committed.is_null() {
                    return Err(out_of_memory(increment, self.remaining()));
                }
            }

            self.brk = new_break;
            Ok(old_break)
        }

        fn len(&self) -> usize {
            self.brk
        }

        fn capacity(&self) -> usize {
            self.max_heap
        }

        fn as_slice(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
        }

        fn as_mut_slice(&mut self) -> &mut [u8] {
            unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
        }
    }

    impl Drop for ReservedRegion {
        fn drop(&mut self) {
            // Length must be 0 with MEM_RELEASE, the whole reservation goes.
            unsafe {
                if !Memory::VirtualFree(self.base.as_ptr().cast(), 0, Memory::MEM_RELEASE).as_bool() {
                    log::warn!("VirtualFree of region at {:?} failed", self.base);
                }
            }
        }
    }

    fn page_size() -> usize {
        let mut system_info = MaybeUninit::uninit();
        unsafe {
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());
            system_info.assume_init().dwPageSize as usize
        }
    }
}

#[cfg(all(unix, not(miri)))]
pub use unix::ReservedRegion;

#[cfg(all(windows, not(miri)))]
pub use win32::ReservedRegion;

/// The preferred source on this platform.
#[cfg(all(any(unix, windows), not(miri)))]
pub type DefaultSource = ReservedRegion;

/// The preferred source on this platform.
#[cfg(any(miri, not(any(unix, windows))))]
pub type DefaultSource = HeapBuffer;

/// Builds the platform's preferred source able to hold `max_heap` bytes.
#[cfg(all(any(unix, windows), not(miri)))]
pub fn default_source(max_heap: usize) -> Result<DefaultSource> {
    ReservedRegion::reserve(max_heap)
}

/// Builds the platform's preferred source able to hold `max_heap` bytes.
#[cfg(any(miri, not(any(unix, windows))))]
pub fn default_source(max_heap: usize) -> Result<DefaultSource> {
    Ok(HeapBuffer::new(max_heap))
}
