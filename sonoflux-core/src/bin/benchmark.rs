//! Hot-path latency benchmark.
//!
//! Drives the FFT stage and BPM detector with synthetic buffers the way
//! the audio callback would, and reports per-callback latency
//! percentiles. The interesting number is p99: a 256-sample buffer at
//! 44.1 kHz gives the callback a 5.8 ms deadline.

fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use serde::Serialize;
    use sonoflux_core::analysis::{BpmDetector, FftStage, WindowKind};
    use std::f64::consts::PI;
    use std::path::PathBuf;
    use std::time::Instant;

    #[derive(Debug)]
    struct Args {
        buffer_size: usize,
        sample_rate: f64,
        callbacks: usize,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Serialize)]
    struct Summary {
        buffer_size: usize,
        sample_rate: f64,
        callbacks: usize,
        deadline_ms: f64,
        p50_latency_ms: f64,
        p95_latency_ms: f64,
        p99_latency_ms: f64,
        max_latency_ms: f64,
        avg_latency_ms: f64,
        deadline_misses: usize,
        final_bpm: f64,
        final_confidence: f64,
    }

    fn parse_args() -> Result<Args, String> {
        let mut buffer_size = 256usize;
        let mut sample_rate = 44100.0f64;
        let mut callbacks = 100_000usize;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--buffer-size" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --buffer-size".into());
                    };
                    buffer_size = v
                        .parse()
                        .map_err(|_| "invalid value for --buffer-size".to_string())?;
                }
                "--sample-rate" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --sample-rate".into());
                    };
                    sample_rate = v
                        .parse()
                        .map_err(|_| "invalid value for --sample-rate".to_string())?;
                }
                "--callbacks" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --callbacks".into());
                    };
                    callbacks = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --callbacks".to_string())?
                        .clamp(1_000, 10_000_000);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p sonoflux-core --bin benchmark -- \\
  [--buffer-size <n>] [--sample-rate <hz>] [--callbacks <n>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }

        Ok(Args {
            buffer_size,
            sample_rate,
            callbacks,
            output,
        })
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    let args = parse_args()?;
    let deadline_ms = args.buffer_size as f64 / args.sample_rate * 1000.0;

    let mut fft = FftStage::new(args.buffer_size, args.sample_rate, WindowKind::Hann)
        .map_err(|e| e.to_string())?;
    let bpm = BpmDetector::new(args.sample_rate, args.buffer_size);

    // A 440 Hz tone with a click every half second: exercises flux and
    // the onset path, not just the FFT.
    let frames_per_beat = (0.5 * args.sample_rate / args.buffer_size as f64) as usize;
    let amp = (1u64 << 30) as f64;
    let mut buffers: Vec<Vec<i32>> = Vec::with_capacity(frames_per_beat.max(1));
    for frame in 0..frames_per_beat.max(1) {
        let scale = if frame == 0 { 2.0 } else { 1.0 };
        buffers.push(
            (0..args.buffer_size)
                .map(|n| {
                    let t = (frame * args.buffer_size + n) as f64 / args.sample_rate;
                    (amp * scale * (2.0 * PI * 440.0 * t).sin()) as i32
                })
                .collect(),
        );
    }

    println!(
        "Running hot-path benchmark: buffer_size={} sample_rate={} callbacks={}",
        args.buffer_size, args.sample_rate, args.callbacks
    );

    let mut latencies_ms = Vec::with_capacity(args.callbacks);
    for i in 0..args.callbacks {
        let buffer = &buffers[i % buffers.len()];
        let started = Instant::now();

        fft.process(buffer);
        bpm.process_flux(fft.spectral_flux(), i as u64 + 1);
        let _ = bpm.bpm();

        latencies_ms.push(started.elapsed().as_secs_f64() * 1000.0);
    }

    latencies_ms.sort_by(|a, b| a.total_cmp(b));
    let (final_bpm, final_confidence) = bpm.bpm();
    let summary = Summary {
        buffer_size: args.buffer_size,
        sample_rate: args.sample_rate,
        callbacks: args.callbacks,
        deadline_ms,
        p50_latency_ms: percentile(&latencies_ms, 0.50),
        p95_latency_ms: percentile(&latencies_ms, 0.95),
        p99_latency_ms: percentile(&latencies_ms, 0.99),
        max_latency_ms: latencies_ms.last().copied().unwrap_or(0.0),
        avg_latency_ms: latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64,
        deadline_misses: latencies_ms.iter().filter(|&&l| l > deadline_ms).count(),
        final_bpm,
        final_confidence,
    };

    println!(
        "Done. p50={:.3}ms p95={:.3}ms p99={:.3}ms max={:.3}ms deadline={:.3}ms misses={} bpm={:.1}",
        summary.p50_latency_ms,
        summary.p95_latency_ms,
        summary.p99_latency_ms,
        summary.max_latency_ms,
        summary.deadline_ms,
        summary.deadline_misses,
        summary.final_bpm
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
