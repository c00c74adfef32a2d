//! Windowed real-input FFT with double-buffered magnitude snapshots.
//!
//! Everything here runs on the audio callback thread; the magnitude
//! double buffer is the only channel through which bin data leaves it.
//! All per-frame work happens in buffers sized at construction, so the
//! callback never touches the allocator.
//!
//! Samples arrive as signed 24-bit values packed into `i32` and are
//! normalized by 2⁻³¹. Magnitudes carry the `1/N` FFT scale plus the
//! single-sided ×2 compensation on interior bins; spectral flux is the
//! positive-only per-bin difference against the previous frame, with
//! doubled weight below 200 Hz to emphasize onset-relevant energy.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use tracing::info;

use crate::bits::is_power_of_two;
use crate::buffering::DoubleBuffer;
use crate::error::{EngineError, Result};
use crate::simd::{aligned_c128, aligned_f64, AlignedBuf};

use super::window::{self, WindowKind};

/// Frequency below which spectral flux is double-weighted.
const BASS_CUTOFF_HZ: f64 = 200.0;

/// Per-FFT-size precomputed state. Mutated only from the audio thread.
pub struct FftStage {
    size: usize,
    sample_rate: f64,
    fft: Arc<dyn RealToComplex<f64>>,
    window: AlignedBuf<f64>,
    input: AlignedBuf<f64>,
    spectrum: AlignedBuf<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    freq_bins: AlignedBuf<f64>,
    prev_mag: AlignedBuf<f64>,
    spectral_flux: AlignedBuf<f64>,
    magnitudes: DoubleBuffer<AlignedBuf<f64>>,
    /// Converts i32 samples to [-1, 1).
    norm: f64,
    /// FFT scale, applied on the magnitude side.
    scale: f64,
}

impl FftStage {
    /// `size` must be a power of two. Precomputes window coefficients,
    /// per-bin center frequencies, and all scratch buffers.
    pub fn new(size: usize, sample_rate: f64, window_kind: WindowKind) -> Result<Self> {
        if !is_power_of_two(size) {
            return Err(EngineError::FftInvalidSize { size });
        }

        let bins = size / 2 + 1;
        let resolution = sample_rate / size as f64;

        let mut window_coeffs = aligned_f64(size);
        window::fill(&mut window_coeffs, window_kind);

        let mut freq_bins = aligned_f64(bins);
        for (i, f) in freq_bins.iter_mut().enumerate() {
            *f = i as f64 * resolution;
        }

        let fft = RealFftPlanner::<f64>::new().plan_fft_forward(size);
        let scratch = fft.make_scratch_vec();

        info!(
            size,
            sample_rate,
            bins,
            resolution_hz = resolution,
            window = ?window_kind,
            "FFT stage initialized"
        );

        Ok(Self {
            size,
            sample_rate,
            fft,
            window: window_coeffs,
            input: aligned_f64(size),
            spectrum: aligned_c128(bins),
            scratch,
            freq_bins,
            prev_mag: aligned_f64(bins),
            spectral_flux: aligned_f64(bins),
            magnitudes: DoubleBuffer::new(aligned_f64(bins), aligned_f64(bins)),
            norm: 1.0 / (1u64 << 31) as f64,
            scale: 1.0 / size as f64,
        })
    }

    /// Run one frame through the FFT and swap the magnitude snapshot.
    ///
    /// Input shorter than the FFT size is zero-padded; longer input is
    /// truncated at the FFT size.
    pub fn process(&mut self, samples: &[i32]) {
        for (i, x) in self.input.iter_mut().enumerate() {
            *x = if i < samples.len() {
                samples[i] as f64 * self.norm * self.window[i]
            } else {
                0.0
            };
        }

        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .expect("fft buffers are sized at construction");

        let half = self.size / 2;
        let scale = self.scale;
        let spectrum = &*self.spectrum;
        let freq_bins = &*self.freq_bins;
        let prev_mag = &mut *self.prev_mag;
        let flux = &mut *self.spectral_flux;

        self.magnitudes.swap(|mags| {
            for i in 0..=half {
                let raw = spectrum[i].norm() * scale;
                // Single-sided compensation: interior bins carry the
                // energy of both spectrum halves.
                let mag = if i > 0 && i < half { raw * 2.0 } else { raw };
                mags[i] = mag;

                let weight = if freq_bins[i] < BASS_CUTOFF_HZ { 2.0 } else { 1.0 };
                let diff = (mag - prev_mag[i]) * weight;
                flux[i] = if diff > 0.0 { diff } else { 0.0 };

                prev_mag[i] = mag;
            }
        });
    }

    /// Independent copy of the current magnitude snapshot.
    pub fn magnitudes(&self) -> Vec<f64> {
        self.magnitudes.with_active(|slot| slot.to_vec())
    }

    /// Copy the current magnitude snapshot into `out`, reusing its
    /// capacity. The hot path uses this to fill pooled records.
    pub fn copy_magnitudes_into(&self, out: &mut Vec<f64>) {
        self.magnitudes.with_active(|slot| {
            out.clear();
            out.extend_from_slice(slot);
        });
    }

    /// The persistent spectral-flux view. Owned by the audio thread;
    /// consumers copy before sharing across threads.
    pub fn spectral_flux(&self) -> &[f64] {
        &self.spectral_flux
    }

    /// Sum of spectral flux over `[low_hz, high_hz]`.
    pub fn flux_in_range(&self, low_hz: f64, high_hz: f64) -> f64 {
        let mut sum = 0.0;
        for (i, &f) in self.freq_bins.iter().enumerate() {
            if f > high_hz {
                break;
            }
            if f >= low_hz {
                sum += self.spectral_flux[i];
            }
        }
        sum
    }

    /// The `(frequency, magnitude)` of the strongest bin in the current
    /// snapshot.
    pub fn peak_frequency(&self) -> (f64, f64) {
        self.magnitudes.with_active(|mags| {
            let mut max_idx = 0;
            let mut max_mag = 0.0;
            for (i, &m) in mags.iter().enumerate() {
                if m > max_mag {
                    max_mag = m;
                    max_idx = i;
                }
            }
            (self.freq_bins[max_idx], max_mag)
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Magnitude/flux length: `N/2 + 1`.
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    pub fn frequency_bins(&self) -> &[f64] {
        &self.freq_bins
    }

    pub fn frequency_resolution(&self) -> f64 {
        self.sample_rate / self.size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SAMPLE_RATE: f64 = 44100.0;
    const FULL_SCALE: f64 = (1u64 << 31) as f64 - 1.0;

    fn sine_i32(freq: f64, amplitude: f64, len: usize) -> Vec<i32> {
        (0..len)
            .map(|n| {
                let t = n as f64 / SAMPLE_RATE;
                (amplitude * FULL_SCALE * (2.0 * PI * freq * t).sin()) as i32
            })
            .collect()
    }

    #[test]
    fn non_power_of_two_size_is_rejected() {
        assert!(matches!(
            FftStage::new(1000, SAMPLE_RATE, WindowKind::Hann),
            Err(EngineError::FftInvalidSize { size: 1000 })
        ));
        assert!(FftStage::new(256, SAMPLE_RATE, WindowKind::Hann).is_ok());
    }

    #[test]
    fn output_lengths_are_half_size_plus_one() {
        let mut stage = FftStage::new(256, SAMPLE_RATE, WindowKind::Hann).unwrap();
        stage.process(&vec![0; 256]);
        assert_eq!(stage.bins(), 129);
        assert_eq!(stage.magnitudes().len(), 129);
        assert_eq!(stage.spectral_flux().len(), 129);
        assert_eq!(stage.frequency_bins().len(), 129);
    }

    #[test]
    fn silence_produces_all_zero_magnitudes_and_flux() {
        let mut stage = FftStage::new(256, SAMPLE_RATE, WindowKind::Hann).unwrap();
        for _ in 0..10 {
            stage.process(&vec![0; 256]);
            assert!(stage.magnitudes().iter().all(|&m| m == 0.0));
            assert!(stage.spectral_flux().iter().all(|&f| f == 0.0));
        }
    }

    #[test]
    fn bin_centered_sine_peaks_at_its_bin() {
        // Bin 46 of a 2048-point FFT at 44.1 kHz: 990.53 Hz, the bin
        // closest to 1 kHz.
        let size = 2048;
        let bin = 46;
        let freq = bin as f64 * SAMPLE_RATE / size as f64;
        let mut stage = FftStage::new(size, SAMPLE_RATE, WindowKind::Hann).unwrap();
        stage.process(&sine_i32(freq, 1.0, size));

        let mags = stage.magnitudes();
        let argmax = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(argmax, bin);

        let (peak_freq, _) = stage.peak_frequency();
        assert!((peak_freq - freq).abs() < stage.frequency_resolution() / 2.0);

        // Energy outside the Hann main lobe (peak +/- 1 bin) is tiny.
        assert!(mags[bin] / mags[bin - 2].max(1e-12) > 10.0);
        assert!(mags[bin] / mags[bin + 2].max(1e-12) > 10.0);
    }

    #[test]
    fn bin_centered_sine_amplitude_matches_window_gain() {
        // After 1/N scaling and the single-sided x2, the peak carries
        // A times the window's coherent gain (0.5 for Hann).
        let size = 2048;
        let bin = 64;
        let freq = bin as f64 * SAMPLE_RATE / size as f64;
        let amplitude = 0.8;
        let mut stage = FftStage::new(size, SAMPLE_RATE, WindowKind::Hann).unwrap();
        stage.process(&sine_i32(freq, amplitude, size));

        let mags = stage.magnitudes();
        let expected = amplitude * 0.5;
        assert!(
            (mags[bin] - expected).abs() / expected < 0.01,
            "peak {} vs expected {}",
            mags[bin],
            expected
        );
    }

    #[test]
    fn short_input_is_zero_padded_and_long_input_truncated() {
        let mut stage = FftStage::new(256, SAMPLE_RATE, WindowKind::Hann).unwrap();

        // 64 samples of DC into a 256 FFT: finite energy, no panic.
        stage.process(&vec![1 << 24; 64]);
        assert!(stage.magnitudes().iter().any(|&m| m > 0.0));

        // 1024 samples: only the first 256 contribute.
        let mut long = vec![0i32; 1024];
        long[512] = i32::MAX; // past the truncation point
        stage.process(&vec![0; 256]); // settle flux
        stage.process(&long);
        assert!(stage.magnitudes().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn flux_is_clamped_to_positive_changes() {
        let size = 256;
        let mut stage = FftStage::new(size, SAMPLE_RATE, WindowKind::Hann).unwrap();

        // Loud frame after silence: positive flux everywhere energy rose.
        stage.process(&vec![0; size]);
        stage.process(&sine_i32(990.5, 1.0, size));
        assert!(stage.spectral_flux().iter().any(|&f| f > 0.0));

        // Silence after the loud frame: magnitudes fall, flux is clamped
        // to zero rather than going negative.
        stage.process(&vec![0; size]);
        assert!(stage.spectral_flux().iter().all(|&f| f == 0.0));
    }

    #[test]
    fn frequency_bins_follow_the_resolution_grid() {
        let stage = FftStage::new(512, 48000.0, WindowKind::Hamming).unwrap();
        let res = 48000.0 / 512.0;
        let bins = stage.frequency_bins();
        assert_eq!(bins[0], 0.0);
        assert!((bins[1] - res).abs() < 1e-9);
        assert!((bins[256] - 24000.0).abs() < 1e-9);
    }
}
