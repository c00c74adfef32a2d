//! The audio-callback contract.
//!
//! One invocation per captured buffer, on the real-time thread. The
//! entire body is allocation-free after warm-up: FFT scratch, flux, and
//! BPM buffers are pre-sized, outgoing frames come from the pool, and a
//! full or closed mailbox means the frame is dropped and its record
//! returned. The only synchronization touched here is the magnitude
//! snapshot swap, the BPM state lock, and the pool/mailbox atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::analysis::{BpmDetector, FftStage};
use crate::stage::{Actor, FrameMessage, FramePool, RawFrame};

pub(crate) struct HotPath {
    fft: Option<FftStage>,
    bpm: Arc<BpmDetector>,
    raw_pool: Arc<FramePool<RawFrame>>,
    processor: Arc<Actor>,
    frame_count: Arc<AtomicU64>,
}

impl HotPath {
    pub(crate) fn new(
        fft: Option<FftStage>,
        bpm: Arc<BpmDetector>,
        raw_pool: Arc<FramePool<RawFrame>>,
        processor: Arc<Actor>,
        frame_count: Arc<AtomicU64>,
    ) -> Self {
        Self {
            fft,
            bpm,
            raw_pool,
            processor,
            frame_count,
        }
    }

    pub(crate) fn on_samples(&mut self, samples: &[i32]) {
        let frame_count = self.frame_count.fetch_add(1, Ordering::Relaxed) + 1;

        let Some(fft) = self.fft.as_mut() else {
            return;
        };

        fft.process(samples);
        self.bpm.process_flux(fft.spectral_flux(), frame_count);
        let (bpm, confidence) = self.bpm.bpm();

        // No free record means the pipeline is behind; skip this frame
        // rather than allocate or wait.
        let Some(mut frame) = self.raw_pool.try_acquire() else {
            return;
        };

        frame.frame_count = frame_count;
        frame.bpm = bpm;
        frame.confidence = confidence;
        fft.copy_magnitudes_into(&mut frame.magnitudes);
        frame.spectral_flux.clear();
        frame.spectral_flux.extend_from_slice(fft.spectral_flux());

        if let Err(rejected) = self.processor.try_send(FrameMessage::Raw(frame)) {
            if let FrameMessage::Raw(frame) = rejected.into_message() {
                self.raw_pool.release(frame);
            }
        }
    }
}
