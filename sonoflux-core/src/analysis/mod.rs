//! Spectral analysis: windowed FFT, spectral flux, onset/BPM detection.

pub mod bpm;
pub mod fft;
pub mod window;

pub use bpm::BpmDetector;
pub use fft::FftStage;
pub use window::WindowKind;
