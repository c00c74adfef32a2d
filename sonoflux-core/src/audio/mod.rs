//! Audio capture behind a backend seam.
//!
//! # Design constraints
//!
//! The input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! The engine's hot path honors that contract; this module's only job is
//! to deliver interleaved `i32` sample buffers (signed 24-bit samples
//! left-justified in 32 bits) into it and to keep stream lifetimes sane.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows,
//! CoreAudio on macOS). Streams are therefore created and dropped inside
//! the same `spawn_blocking` closure; the `InputStream` trait is
//! deliberately not `Send`.

pub mod device;

#[cfg(feature = "audio-cpal")]
mod cpal_backend;

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;

use crate::error::Result;

/// Metadata about an audio input device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Position in the backend's enumeration order.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub max_input_channels: u16,
    pub default_sample_rate: f64,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

/// Everything a backend needs to open one input stream.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Index into [`AudioBackend::devices`].
    pub device_index: usize,
    pub channels: u16,
    pub sample_rate: f64,
    pub frames_per_buffer: usize,
    /// Prefer the device's low-latency hint.
    pub low_latency: bool,
}

/// Invoked on the real-time audio thread with each captured buffer.
pub type SampleCallback = Box<dyn FnMut(&[i32]) + Send + 'static>;

/// An open input stream. Created and dropped on one thread.
pub trait InputStream {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Abstracts the audio host so the engine can be driven by cpal in
/// production and by a scripted backend in tests.
pub trait AudioBackend: Send + Sync {
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open (but do not start) an input stream delivering `i32` buffers
    /// to `callback`. Must be called on the thread that will also drop
    /// the returned stream.
    fn open_stream(
        &self,
        params: &StreamParams,
        callback: SampleCallback,
    ) -> Result<Box<dyn InputStream>>;
}
