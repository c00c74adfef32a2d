//! Double-buffered snapshot with copy-on-read semantics.
//!
//! ## Protocol
//!
//! 1. One slot is "active" (readable) at any moment.
//! 2. The single writer mutates the inactive slot in place, then flips
//!    the active index while still holding the write guard.
//! 3. Readers copy the active slot under the read guard, so a
//!    concurrent swap can never expose a half-written frame.
//!
//! Copy-on-read costs one memcpy per reader but removes every ordering
//! hazard between the audio thread and downstream consumers.

use parking_lot::RwLock;

use crate::simd::AlignedBuf;

/// Deep copy used by [`DoubleBuffer::get`]. Implemented for the sequence
/// types the engine snapshots (`f32`/`f64`/`i32`/`c128` elements) and for
/// aggregate frames that copy each member sequence. Empty inputs stay
/// empty.
pub trait Snapshot {
    fn snapshot(&self) -> Self;
}

macro_rules! vec_snapshot {
    ($($elem:ty),* $(,)?) => {
        $(impl Snapshot for Vec<$elem> {
            fn snapshot(&self) -> Self {
                // Vec<Copy> clone is a single memcpy.
                self.clone()
            }
        })*
    };
}

vec_snapshot!(f32, f64, i32, rustfft::num_complex::Complex<f64>);

impl<T: Copy + Default> Snapshot for AlignedBuf<T> {
    fn snapshot(&self) -> Self {
        self.clone()
    }
}

struct Slots<T> {
    slots: [T; 2],
    active: usize,
}

/// Two equal slots with an atomically flipped active index. One writer,
/// any number of readers.
pub struct DoubleBuffer<T> {
    inner: RwLock<Slots<T>>,
}

impl<T: Snapshot> DoubleBuffer<T> {
    /// Initialize both slots; slot `a` starts active.
    pub fn new(a: T, b: T) -> Self {
        Self {
            inner: RwLock::new(Slots {
                slots: [a, b],
                active: 0,
            }),
        }
    }

    /// Deep copy of the active slot. Safe to call concurrently with other
    /// readers and with at most one in-flight [`swap`](Self::swap).
    pub fn get(&self) -> T {
        let guard = self.inner.read();
        guard.slots[guard.active].snapshot()
    }

    /// Mutate the inactive slot in place, then make it active. The flip
    /// happens before the write guard is released, so readers see either
    /// the full pre-swap or the full post-swap state.
    pub fn swap(&self, update: impl FnOnce(&mut T)) {
        let mut guard = self.inner.write();
        let inactive = 1 - guard.active;
        update(&mut guard.slots[inactive]);
        guard.active = inactive;
    }

    /// Run `f` against a snapshot of the active slot.
    pub fn force_get(&self, f: impl FnOnce(T)) {
        f(self.get());
    }

    /// Run `f` against the active slot by reference, without copying.
    /// Used on the hot path to copy bins into a pooled record's existing
    /// buffer instead of allocating a fresh one.
    pub fn with_active<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.read();
        f(&guard.slots[guard.active])
    }
}
