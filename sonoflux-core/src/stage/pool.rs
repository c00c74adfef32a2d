//! Lock-free freelist of pre-sized frame records.
//!
//! The hot path must not touch the allocator, so every record it emits
//! comes from here and every consumer hands its record back. `acquire`
//! and `release` are a bounded number of atomic operations each
//! (`ArrayQueue` push/pop); the allocator is only reached when the
//! freelist underflows, which cannot happen after warm-up as long as
//! consumers keep releasing.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use super::message::{ProcessedFrame, Reusable};

/// Freelist of `T` records, all pre-sized to the same bin count.
pub struct FramePool<T: Reusable> {
    free: ArrayQueue<T>,
    bins: usize,
}

impl<T: Reusable> FramePool<T> {
    /// Create a pool holding up to `capacity` records, each with
    /// sequences pre-sized to `bins` elements. The freelist starts full.
    pub fn new(capacity: usize, bins: usize) -> Self {
        let free = ArrayQueue::new(capacity.max(1));
        for _ in 0..free.capacity() {
            // Queue was sized for exactly this many records.
            let _ = free.push(T::with_bins(bins));
        }
        Self { free, bins }
    }

    /// Take a record, allocating a fresh one when the freelist is empty.
    pub fn acquire(&self) -> T {
        self.free.pop().unwrap_or_else(|| T::with_bins(self.bins))
    }

    /// Take a record only if one is free. Never allocates; this is the
    /// hot-path entry point.
    pub fn try_acquire(&self) -> Option<T> {
        self.free.pop()
    }

    /// Reset `record` and return it to the freelist. A full freelist
    /// (more releases than the pool ever handed out) drops the record.
    pub fn release(&self, mut record: T) {
        record.reset();
        let _ = self.free.push(record);
    }

    /// Records currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }
}

/// Shared ownership of one pooled [`ProcessedFrame`]: the router hands a
/// clone to every endpoint, and whichever owner drops last returns the
/// record to its pool. Owners never release explicitly, so an abandoned
/// mailbox recycles its frames the moment it is dropped.
#[derive(Clone)]
pub struct SharedFrame {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    // Some until the drop guard takes it; never observable as None.
    frame: Option<ProcessedFrame>,
    pool: Arc<FramePool<ProcessedFrame>>,
}

impl SharedFrame {
    pub fn new(frame: ProcessedFrame, pool: Arc<FramePool<ProcessedFrame>>) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                frame: Some(frame),
                pool,
            }),
        }
    }
}

impl std::ops::Deref for SharedFrame {
    type Target = ProcessedFrame;

    fn deref(&self) -> &ProcessedFrame {
        self.inner
            .frame
            .as_ref()
            .expect("frame is present until the last owner drops")
    }
}

impl std::fmt::Debug for SharedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.frame.fmt(f)
    }
}

impl Drop for SharedInner {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.release(frame);
        }
    }
}
