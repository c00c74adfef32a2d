//! Thread-safe snapshot structures for real-time audio processing.
//!
//! The double buffer is the only channel through which per-bin magnitude
//! data crosses from the audio callback thread to the rest of the engine.
//! The audio thread writes into the inactive slot and flips the active
//! index; readers deep-copy the active slot and never observe a torn
//! frame.

pub mod double;

pub use double::{DoubleBuffer, Snapshot};
