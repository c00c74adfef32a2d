//! Onset detection and tempo estimation from spectral flux.
//!
//! ## Pipeline (per frame)
//!
//! ```text
//! flux[0..10] summed ──► rolling onset buffer (1024)
//!                              │ mean/stddev over last 20
//!                              ▼
//!                    adaptive threshold peak pick ──► onset times (10 s)
//!                                                          │ >= 4 onsets
//!                                                          ▼
//!                       interval histogram ──► candidate scoring ──► (bpm, confidence)
//! ```
//!
//! All buffers are bounded and allocated up front; per-frame work reuses
//! them. The state sits behind one `RwLock`: writes from `process_flux`
//! (audio thread), reads from `bpm()`.

use std::collections::HashMap;

use parking_lot::RwLock;

/// How many leading flux bins feed the onset signal. Low bins carry the
/// percussive energy; the rest mostly adds noise.
const ONSET_BINS: usize = 10;
const ONSET_BUFFER_SIZE: usize = 1024;
const ONSET_TIMES_SIZE: usize = 1024;
/// Statistics window for the adaptive threshold.
const STATS_WINDOW: usize = 20;
/// Minimum spacing between onsets (debounce).
const MIN_ONSET_GAP_SECS: f64 = 0.1;
/// Onsets older than this are pruned before estimation.
const ONSET_RETENTION_SECS: f64 = 10.0;
/// Inter-onset intervals outside this range are discarded (30-300 BPM).
const MIN_INTERVAL_SECS: f64 = 0.2;
const MAX_INTERVAL_SECS: f64 = 2.0;

struct BpmState {
    onset_threshold: f64,
    onset_buffer: Vec<f64>,
    onset_len: usize,
    onset_times: Vec<f64>,
    times_len: usize,
    // Scratch reused across estimations.
    valid_onsets: Vec<f64>,
    intervals: Vec<f64>,
    histogram: HashMap<i64, usize>,
    bin_counts: Vec<(i64, usize)>,
    candidates: Vec<f64>,
    scored: Vec<(f64, f64)>,
    current_bpm: f64,
    confidence: f64,
}

/// Onset/tempo estimator. `process_flux` is called from the audio
/// thread; `bpm()` may be read from anywhere.
pub struct BpmDetector {
    sample_rate: f64,
    frames_per_buffer: usize,
    state: RwLock<BpmState>,
}

impl BpmDetector {
    pub fn new(sample_rate: f64, frames_per_buffer: usize) -> Self {
        Self {
            sample_rate,
            frames_per_buffer,
            state: RwLock::new(BpmState {
                onset_threshold: 0.1,
                onset_buffer: vec![0.0; ONSET_BUFFER_SIZE],
                onset_len: 0,
                onset_times: vec![0.0; ONSET_TIMES_SIZE],
                times_len: 0,
                valid_onsets: vec![0.0; ONSET_TIMES_SIZE],
                intervals: vec![0.0; ONSET_TIMES_SIZE],
                histogram: HashMap::new(),
                bin_counts: Vec::with_capacity(100),
                candidates: Vec::with_capacity(20),
                scored: Vec::with_capacity(20),
                current_bpm: 0.0,
                confidence: 0.0,
            }),
        }
    }

    /// Feed one frame's spectral flux. `frame_count` is the monotonic
    /// callback counter; onset timestamps derive from it.
    pub fn process_flux(&self, flux: &[f64], frame_count: u64) {
        let total: f64 = flux.iter().take(ONSET_BINS).sum();

        let mut guard = self.state.write();
        let state = &mut *guard;

        // Rolling append; shift left once full so the window stays flat.
        if state.onset_len < ONSET_BUFFER_SIZE {
            let len = state.onset_len;
            state.onset_buffer[len] = total;
            state.onset_len += 1;
        } else {
            state.onset_buffer.copy_within(1.., 0);
            state.onset_buffer[ONSET_BUFFER_SIZE - 1] = total;
        }

        if state.onset_len <= STATS_WINDOW {
            return;
        }

        let window = &state.onset_buffer[state.onset_len - STATS_WINDOW..state.onset_len];
        let mean = window.iter().sum::<f64>() / STATS_WINDOW as f64;
        let variance =
            window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / STATS_WINDOW as f64;
        let std_dev = variance.sqrt();

        let threshold = (mean + 1.5 * std_dev).max(state.onset_threshold);

        let current = state.onset_buffer[state.onset_len - 1];
        let previous = state.onset_buffer[state.onset_len - 2];

        if current > threshold && current > previous * 1.3 {
            let time_secs =
                frame_count as f64 * self.frames_per_buffer as f64 / self.sample_rate;

            // Debounce double triggers within 100 ms.
            if state.times_len > 0
                && time_secs - state.onset_times[state.times_len - 1] <= MIN_ONSET_GAP_SECS
            {
                return;
            }

            if state.times_len < ONSET_TIMES_SIZE {
                let len = state.times_len;
                state.onset_times[len] = time_secs;
                state.times_len += 1;
            } else {
                state.onset_times.copy_within(1.., 0);
                state.onset_times[ONSET_TIMES_SIZE - 1] = time_secs;
            }

            // Keep only onsets from the last 10 seconds.
            let cutoff = time_secs - ONSET_RETENTION_SECS;
            let mut valid = 0;
            for i in 0..state.times_len {
                if state.onset_times[i] > cutoff {
                    let t = state.onset_times[i];
                    state.valid_onsets[valid] = t;
                    valid += 1;
                }
            }
            if valid < state.times_len {
                for i in 0..valid {
                    let t = state.valid_onsets[i];
                    state.onset_times[i] = t;
                }
                state.times_len = valid;
            }

            if state.times_len >= 4 {
                estimate(state);
            }
        }
    }

    /// Latest `(bpm, confidence)` pair. `(0.0, 0.0)` until the detector
    /// has seen at least four onsets.
    pub fn bpm(&self) -> (f64, f64) {
        let state = self.state.read();
        (state.current_bpm, state.confidence)
    }

    /// Number of onsets currently retained.
    pub fn onset_count(&self) -> usize {
        self.state.read().times_len
    }
}

fn round_half(bpm: f64) -> f64 {
    (bpm * 2.0).round() / 2.0
}

fn estimate(state: &mut BpmState) {
    if state.times_len < 4 {
        return;
    }

    // Inter-onset intervals within the plausible tempo range.
    let mut interval_count = 0;
    for i in 1..state.times_len {
        let interval = state.onset_times[i] - state.onset_times[i - 1];
        if interval > MIN_INTERVAL_SECS && interval < MAX_INTERVAL_SECS {
            state.intervals[interval_count] = interval;
            interval_count += 1;
        }
    }
    if interval_count < 3 {
        return;
    }
    let intervals = &state.intervals[..interval_count];

    // Histogram at 0.5-BPM resolution to find recurring interval
    // clusters; handles irregular (breakbeat) patterns far better than a
    // plain average.
    state.histogram.clear();
    for &interval in intervals {
        *state.histogram.entry((interval * 200.0) as i64).or_insert(0) += 1;
    }

    state.bin_counts.clear();
    state
        .bin_counts
        .extend(state.histogram.iter().map(|(&bin, &count)| (bin, count)));
    state.bin_counts.sort_by(|a, b| b.1.cmp(&a.1));

    // Candidate tempos from the top three interval clusters, with
    // half/double-tempo interpretations for metrically ambiguous ranges.
    state.candidates.clear();
    for &(bin, _) in state.bin_counts.iter().take(3) {
        let interval = bin as f64 / 200.0;
        if interval <= 0.0 {
            continue;
        }
        let base = 60.0 / interval;
        state.candidates.push(base);

        // Dance music often reads better at half tempo, except in the
        // drum & bass band.
        if base > 130.0 && (base < 160.0 || base > 180.0) {
            state.candidates.push(base / 2.0);
        }
        if base < 80.0 {
            state.candidates.push(base * 2.0);
        }
        // Near-85 tempos are frequently half of a breaks tempo.
        if (80.0..=90.0).contains(&base) {
            let double = base * 2.0;
            if (160.0..=180.0).contains(&double) {
                state.candidates.push(double);
            }
        }
    }

    let avg_interval = intervals.iter().sum::<f64>() / interval_count as f64;
    state.candidates.push(60.0 / avg_interval);

    for c in state.candidates.iter_mut() {
        *c = round_half(*c);
    }

    // Score candidates by how well the observed intervals align to the
    // candidate's beat grid (allowing 1/4, 1/3, 1/2, 1x and 2x
    // positions), then bias toward genre-typical ranges and the current
    // estimate.
    state.scored.clear();
    for &candidate in state.candidates.iter() {
        if !(60.0..=200.0).contains(&candidate) {
            continue;
        }
        let expected = 60.0 / candidate;

        let mut alignment = 0.0;
        for &interval in intervals {
            let mut best_err = f64::MAX;
            for grid in [0.25, 0.33, 0.5, 1.0, 2.0] {
                let pos = expected * grid;
                let err = (interval - pos).abs() / pos;
                if err < best_err {
                    best_err = err;
                }
            }
            alignment += 1.0 / (1.0 + best_err * 10.0);
        }
        alignment /= interval_count as f64;

        let range_bonus = if (90.0..=110.0).contains(&candidate) {
            1.3
        } else if (160.0..=180.0).contains(&candidate) {
            1.4
        } else if (120.0..=140.0).contains(&candidate) {
            1.2
        } else {
            1.0
        };

        let stability_bonus = if state.current_bpm > 0.0
            && (candidate - state.current_bpm).abs() / state.current_bpm < 0.05
        {
            1.2
        } else {
            1.0
        };

        state
            .scored
            .push((candidate, alignment * range_bonus * stability_bonus));
    }

    // Deduplicate by the rounded 0.5-BPM key, keeping the best score.
    let mut unique: HashMap<i64, (f64, f64)> = HashMap::new();
    for &(bpm, score) in state.scored.iter() {
        let key = (bpm * 2.0).round() as i64;
        match unique.get(&key) {
            Some(&(_, existing)) if existing >= score => {}
            _ => {
                unique.insert(key, (bpm, score));
            }
        }
    }
    state.scored.clear();
    state.scored.extend(unique.into_values());
    state
        .scored
        .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    if let Some(&(best_bpm, best_score)) = state.scored.first() {
        let variance = intervals
            .iter()
            .map(|v| (v - avg_interval) * (v - avg_interval))
            .sum::<f64>()
            / interval_count as f64;
        let std_dev = variance.sqrt();

        // Coefficient of variation: tight intervals mean a trustworthy
        // estimate.
        let spread = (1.0 / (1.0 + std_dev / avg_interval * 5.0)).clamp(0.1, 1.0);

        state.current_bpm = best_bpm;
        state.confidence = spread * best_score;
    }
}
