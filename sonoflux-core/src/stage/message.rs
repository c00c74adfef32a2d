//! Message types flowing through the actor pipeline.
//!
//! The mailbox carries a closed sum instead of a type-erased trait
//! object, so dispatch is a match on the variant and unexpected kinds are
//! discarded with a warning at the receiving actor.

use chrono::{DateTime, Utc};

use super::pool::SharedFrame;
use crate::buffering::Snapshot;

/// Magnitude bin count for the default 256-sample FFT (`N/2 + 1`). Pools
/// pre-size vectors to this so typical configurations never grow them.
pub const DEFAULT_MAG_BINS: usize = 129;

/// Hot-path output prior to the processor. Acquired from the raw pool on
/// the audio thread; released by the processor.
#[derive(Debug, Default)]
pub struct RawFrame {
    pub magnitudes: Vec<f64>,
    pub spectral_flux: Vec<f64>,
    pub frame_count: u64,
    pub bpm: f64,
    pub confidence: f64,
}

/// Router/endpoint input: a raw frame plus the wall-clock instant the
/// processor stamped. Travels inside a [`SharedFrame`], whose last owner
/// returns it to the processed pool.
#[derive(Debug)]
pub struct ProcessedFrame {
    pub magnitudes: Vec<f64>,
    pub spectral_flux: Vec<f64>,
    pub frame_count: u64,
    pub bpm: f64,
    pub confidence: f64,
    pub start_time: DateTime<Utc>,
}

impl Default for ProcessedFrame {
    fn default() -> Self {
        Self {
            magnitudes: Vec::new(),
            spectral_flux: Vec::new(),
            frame_count: 0,
            bpm: 0.0,
            confidence: 0.0,
            start_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl Snapshot for RawFrame {
    fn snapshot(&self) -> Self {
        Self {
            magnitudes: self.magnitudes.snapshot(),
            spectral_flux: self.spectral_flux.snapshot(),
            frame_count: self.frame_count,
            bpm: self.bpm,
            confidence: self.confidence,
        }
    }
}

impl Snapshot for ProcessedFrame {
    fn snapshot(&self) -> Self {
        Self {
            magnitudes: self.magnitudes.snapshot(),
            spectral_flux: self.spectral_flux.snapshot(),
            frame_count: self.frame_count,
            bpm: self.bpm,
            confidence: self.confidence,
            start_time: self.start_time,
        }
    }
}

/// A record that can live in a [`FramePool`](super::pool::FramePool):
/// constructed with pre-sized sequences, reset to an empty-but-capacious
/// state on release.
pub trait Reusable: Send + 'static {
    /// Fresh record with sequences pre-sized to `bins` elements.
    fn with_bins(bins: usize) -> Self;

    /// Truncate sequences to length 0 (capacity preserved) and clear
    /// scalar fields.
    fn reset(&mut self);
}

impl Reusable for RawFrame {
    fn with_bins(bins: usize) -> Self {
        Self {
            magnitudes: Vec::with_capacity(bins),
            spectral_flux: Vec::with_capacity(bins),
            ..Self::default()
        }
    }

    fn reset(&mut self) {
        self.magnitudes.clear();
        self.spectral_flux.clear();
        self.frame_count = 0;
        self.bpm = 0.0;
        self.confidence = 0.0;
    }
}

impl Reusable for ProcessedFrame {
    fn with_bins(bins: usize) -> Self {
        Self {
            magnitudes: Vec::with_capacity(bins),
            spectral_flux: Vec::with_capacity(bins),
            ..Self::default()
        }
    }

    fn reset(&mut self) {
        self.magnitudes.clear();
        self.spectral_flux.clear();
        self.frame_count = 0;
        self.bpm = 0.0;
        self.confidence = 0.0;
        self.start_time = DateTime::<Utc>::UNIX_EPOCH;
    }
}

/// The closed message sum carried by every mailbox.
#[derive(Debug)]
pub enum FrameMessage {
    /// From the hot path to the processor.
    Raw(RawFrame),
    /// From the processor through the router to each endpoint.
    Processed(SharedFrame),
}

impl FrameMessage {
    /// Variant name for log lines about unexpected message kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameMessage::Raw(_) => "raw",
            FrameMessage::Processed(_) => "processed",
        }
    }
}
