//! Arena of reusable frame proxies.

use std::sync::{Arc, Mutex, MutexGuard};

/// A per-port arena of pooled objects.
///
/// Slots are allocated lazily and never freed individually; the arena only
/// shrinks when [`clear`](Self::clear)ed at stage disposal. The free list is
/// guarded by its own lock, held only while a slot index is taken or
/// returned.
///
/// A free slot is handed out again only when the arena holds the sole
/// reference to it, so a handle that outlives its release never aliases a
/// fresh acquisition.
#[derive(Debug)]
pub struct FramePool<T> {
    inner: Mutex<Slots<T>>,
}

#[derive(Debug)]
struct Slots<T> {
    slots: Vec<Arc<T>>,
    free: Vec<usize>,
}

impl<T> FramePool<T> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Allocate `count` free slots up front.
    pub fn prealloc(&self, count: usize, mut make: impl FnMut(usize) -> T) {
        let mut inner = self.lock();
        for _ in 0..count {
            let slot = inner.slots.len();
            inner.slots.push(Arc::new(make(slot)));
            inner.free.push(slot);
        }
    }

    /// Take a free slot, or grow the arena with `make` if none is reusable.
    ///
    /// Returns the slot index and a handle to its object.
    pub fn acquire(&self, make: impl FnOnce(usize) -> T) -> (usize, Arc<T>) {
        let mut inner = self.lock();

        let reusable = inner
            .free
            .iter()
            .rposition(|&slot| Arc::strong_count(&inner.slots[slot]) == 1);
        if let Some(position) = reusable {
            let slot = inner.free.swap_remove(position);
            return (slot, Arc::clone(&inner.slots[slot]));
        }

        let slot = inner.slots.len();
        let item = Arc::new(make(slot));
        inner.slots.push(Arc::clone(&item));
        (slot, item)
    }

    /// Return a slot to the free list.
    ///
    /// Releasing a slot twice is a contract violation; the second release is
    /// ignored.
    pub fn release(&self, slot: usize) {
        let mut inner = self.lock();

        if slot >= inner.slots.len() {
            // Arena was cleared while the slot was out
            return;
        }
        if inner.free.contains(&slot) {
            tracing::error!(slot, "frame pool slot released twice");
            debug_assert!(false, "frame pool slot {slot} released twice");
            return;
        }
        inner.free.push(slot);
    }

    /// Total slots allocated.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Whether no slot was ever allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently on the free list.
    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    /// Drop every slot.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.free.clear();
        inner.slots.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap()
    }
}

impl<T> Default for FramePool<T> {
    fn default() -> Self {
        Self::new()
    }
}
