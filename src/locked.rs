use std::sync::Mutex;

use crate::{
    allocator::Heap,
    config::Config,
    error::Result,
    freelist::DEFAULT_BUCKETS,
    platform::{DefaultSource, MemorySource},
    Pointer,
};

/// [`Heap`] behind a [`Mutex`], so it can be shared between threads through
/// `&self`. Every operation takes the lock for its whole duration, so calls
/// are serialized and each one observes the heap as left by the previous.
///
/// If a thread panics while holding the lock the heap might be in the middle
/// of an update, so a poisoned lock makes every operation fail instead of
/// touching the heap again.
///
/// # Examples
///
/// ```rust
/// use std::thread;
///
/// use segalloc::{Heap, HeapBuffer, LockedHeap};
///
/// let heap = LockedHeap::new(Heap::new(HeapBuffer::new(1 << 20)).unwrap());
///
/// thread::scope(|scope| {
///     for _ in 0..4 {
///         scope.spawn(|| {
///             let ptr = heap.allocate(128).unwrap();
///             heap.release(ptr);
///         });
///     }
/// });
/// ```
pub struct LockedHeap<S: MemorySource = DefaultSource, const N: usize = DEFAULT_BUCKETS> {
    heap: Mutex<Heap<S, N>>,
}

impl LockedHeap {
    /// Locked heap on top of the platform's default memory source.
    pub fn reserve(max_heap: usize) -> Result<Self> {
        Heap::reserve(max_heap).map(Self::new)
    }
}

impl<S: MemorySource> LockedHeap<S> {
    pub fn with_config(source: S, config: Config) -> Result<Self> {
        Heap::with_config(source, config).map(Self::new)
    }
}

impl<S: MemorySource, const N: usize> LockedHeap<S, N> {
    pub const fn new(heap: Heap<S, N>) -> Self {
        Self {
            heap: Mutex::new(heap),
        }
    }

    /// See [`Heap::allocate`].
    pub fn allocate(&self, size: usize) -> Option<Pointer> {
        self.with(|heap| heap.allocate(size)).flatten()
    }

    /// See [`Heap::allocate_zeroed`].
    pub fn allocate_zeroed(&self, size: usize) -> Option<Pointer> {
        self.with(|heap| heap.allocate_zeroed(size)).flatten()
    }

    /// See [`Heap::release`], same contract applies.
    pub fn release(&self, ptr: Pointer) {
        self.with(|heap| heap.release(ptr));
    }

    /// See [`Heap::resize`].
    pub fn resize(&self, ptr: Option<Pointer>, size: usize) -> Option<Pointer> {
        self.with(|heap| heap.resize(ptr, size)).flatten()
    }

    /// Runs `f` with exclusive access to the heap, which is the way to read
    /// and write payloads. Returns `None` if the lock is poisoned.
    pub fn with<R>(&self, f: impl FnOnce(&mut Heap<S, N>) -> R) -> Option<R> {
        match self.heap.lock() {
            Ok(mut heap) => Some(f(&mut heap)),
            Err(_) => {
                log::warn!("heap lock poisoned");
                None
            }
        }
    }

    /// Unwraps the heap. Returns `None` if the lock is poisoned.
    pub fn into_inner(self) -> Option<Heap<S, N>> {
        self.heap.into_inner().ok()
    }
}

impl<S: MemorySource, const N: usize> From<Heap<S, N>> for LockedHeap<S, N> {
    fn from(heap: Heap<S, N>) -> Self {
        Self::new(heap)
    }
}
