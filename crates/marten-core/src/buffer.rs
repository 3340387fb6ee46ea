//! Reusable encode buffers
//!
//! Each store owns one pool so that releasing the store releases its
//! buffers deterministically. Ownership of a buffer moves out of the pool
//! on acquire, so two callers can never observe the same buffer.

use parking_lot::Mutex;

/// Minimum capacity handed out by [`BufferPool::acquire`].
pub const MIN_BUFFER_CAPACITY: usize = 64 * 1024;

/// Buffers larger than this are dropped on release instead of pooled,
/// bounding the pool's idle footprint.
pub const MAX_POOLED_CAPACITY: usize = 1024 * 1024;

/// Pool of growable byte buffers used by the encode driver.
#[derive(Debug, Default)]
pub struct BufferPool {
    shelf: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a cleared buffer with capacity at least
    /// `max(min_size, MIN_BUFFER_CAPACITY)`, reusing a pooled buffer when
    /// one is large enough.
    pub fn acquire(&self, min_size: usize) -> Vec<u8> {
        let want = min_size.max(MIN_BUFFER_CAPACITY);
        let mut shelf = self.shelf.lock();
        if let Some(idx) = shelf.iter().position(|b| b.capacity() >= want) {
            let mut buf = shelf.swap_remove(idx);
            buf.clear();
            return buf;
        }
        drop(shelf);
        Vec::with_capacity(want)
    }

    /// Hand a buffer back. Oversized buffers are dropped.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            tracing::debug!(capacity = buf.capacity(), "dropping oversized buffer");
            return;
        }
        buf.clear();
        self.shelf.lock().push(buf);
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        self.shelf.lock().clear();
    }

    /// Number of idle buffers currently pooled.
    pub fn idle(&self) -> usize {
        self.shelf.lock().len()
    }
}
