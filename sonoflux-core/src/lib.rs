//! # sonoflux-core
//!
//! Real-time audio analysis engine.
//!
//! ## Architecture
//!
//! ```text
//! Audio device → hot-path callback ──► FFT + flux ──► BPM update
//!                       │ try_send (pooled RawFrame)
//!                       ▼
//!                  processor actor ──► router actor ──► endpoint actors
//!                                                            │
//!                                            WebSocket / UDP transports
//! ```
//!
//! The audio callback is zero-alloc and never blocks: frames come from a
//! lock-free pool, magnitudes cross threads through a double-buffered
//! snapshot, and dispatch into the actor system is a non-blocking
//! `try_send` that drops the frame when the pipeline is behind.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod bits;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod simd;
pub mod stage;
pub mod transport;

// Convenience re-exports for downstream crates
pub use analysis::{BpmDetector, FftStage, WindowKind};
pub use config::Config;
pub use engine::{Engine, EngineState};
pub use error::{EngineError, Result};
pub use stage::{FrameMessage, ProcessedFrame, RawFrame, Scheduler};
pub use transport::TransportSink;
