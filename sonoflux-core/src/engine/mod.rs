//! Engine lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Engine::new(config)            Uninitialized
//!     └─► initialize()           Initialized   (analysis, actors, transports, device)
//!         └─► run(cancel)        Running       (actors started, stream open, hot path live)
//!             └─► close()        ShuttingDown → Closed
//! ```
//!
//! ## Threading
//!
//! Audio streams are `!Send` on the platforms that matter, so the stream
//! is created, started, and dropped inside one `spawn_blocking` closure.
//! A oneshot channel reports the open outcome back to `run()`; a sync
//! channel parks the closure until `close()` releases it.
//!
//! ## Shutdown order
//!
//! 1. stop the audio stream (silences the hot path)
//! 2. stop all actors (scheduler cancellation, then per-actor stop)
//! 3. close transports in reverse registration order
//!
//! Every step's failure is collected; `close()` returns one composite
//! error instead of aborting mid-shutdown.

mod hotpath;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analysis::{BpmDetector, FftStage, WindowKind};
use crate::audio::device::{log_input_device, select_input_device};
use crate::audio::{AudioBackend, DeviceInfo, SampleCallback, StreamParams};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::pipeline::{Endpoint, Processor, Router};
use crate::stage::{Actor, FramePool, ProcessedFrame, RawFrame, Scheduler};
use crate::transport::{TransportSink, UdpSink, WebSocketServer};

use hotpath::HotPath;

/// Mailbox depth for every pipeline actor.
const MAILBOX_CAPACITY: usize = 1024;
/// Pooled records per frame kind; sized past the mailbox depth so a full
/// pipeline runs without ever reaching the allocator.
const POOL_CAPACITY: usize = MAILBOX_CAPACITY + 32;
/// Bounded wait for actors to drain during close.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

pub const PROCESSOR_ID: &str = "processor";
pub const ROUTER_ID: &str = "router";
pub const WEBSOCKET_ENDPOINT_ID: &str = "ws";
pub const UDP_ENDPOINT_ID: &str = "udp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Running,
    ShuttingDown,
    Closed,
}

/// Everything `initialize()` builds. Held as one unit so close() can
/// tear it down in order.
struct Parts {
    scheduler: Arc<Scheduler>,
    fft: Option<FftStage>,
    bpm: Arc<BpmDetector>,
    raw_pool: Arc<FramePool<RawFrame>>,
    processed_pool: Arc<FramePool<ProcessedFrame>>,
    processor: Arc<Actor>,
    /// Closed in reverse registration order.
    sinks: Vec<Arc<dyn TransportSink>>,
    device: DeviceInfo,
    channels: u16,
}

pub struct Engine {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    state: Mutex<EngineState>,
    parts: Mutex<Option<Parts>>,
    frame_count: Arc<AtomicU64>,
    stream_release: Mutex<Option<std::sync::mpsc::Sender<()>>>,
    stream_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Engine {
    /// Engine over the default cpal backend.
    #[cfg(feature = "audio-cpal")]
    pub fn new(config: Config) -> Self {
        Self::with_backend(config, Arc::new(crate::audio::CpalBackend::new()))
    }

    /// Engine over an injected backend (tests, alternative hosts).
    pub fn with_backend(config: Config, backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            config,
            backend,
            state: Mutex::new(EngineState::Uninitialized),
            parts: Mutex::new(None),
            frame_count: Arc::new(AtomicU64::new(0)),
            stream_release: Mutex::new(None),
            stream_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Monotonic count of audio callbacks seen so far.
    pub fn frames_seen(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Build analysis state, the actor system, transports, and select
    /// the input device. Fatal on the first failure.
    pub async fn initialize(&self) -> Result<()> {
        self.transition(EngineState::Uninitialized, EngineState::Initialized, "initialize")?;

        match self.build_parts().await {
            Ok(parts) => {
                *self.parts.lock() = Some(parts);
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = EngineState::Uninitialized;
                Err(err)
            }
        }
    }

    async fn build_parts(&self) -> Result<Parts> {
        let devices = self.backend.devices()?;
        if devices.is_empty() {
            return Err(EngineError::AudioInit("no audio devices found".into()));
        }

        // Analysis: the FFT stage is gated by dsp.enabled, the BPM
        // detector rides along with it.
        let fft = if self.config.dsp.enabled {
            let window = WindowKind::parse(&self.config.dsp.fft_window).unwrap_or_else(|_| {
                warn!(
                    requested = %self.config.dsp.fft_window,
                    "unknown fft window, falling back to Hann"
                );
                WindowKind::Hann
            });
            Some(FftStage::new(
                self.config.input.buffer_size,
                self.config.input.sample_rate,
                window,
            )?)
        } else {
            info!("dsp disabled, fft stage not created");
            None
        };

        let bins = self.config.input.buffer_size / 2 + 1;
        let bpm = Arc::new(BpmDetector::new(
            self.config.input.sample_rate,
            self.config.input.buffer_size,
        ));
        let raw_pool: Arc<FramePool<RawFrame>> = Arc::new(FramePool::new(POOL_CAPACITY, bins));
        let processed_pool: Arc<FramePool<ProcessedFrame>> =
            Arc::new(FramePool::new(POOL_CAPACITY, bins));

        // Actor system: processor -> router -> enabled endpoints.
        let scheduler = Arc::new(Scheduler::new());
        let mut sinks: Vec<Arc<dyn TransportSink>> = Vec::new();
        let mut router_targets = Vec::new();

        if self.config.transport.websocket_enabled {
            let server = Arc::new(
                WebSocketServer::bind(
                    &self.config.transport.websocket_address,
                    &self.config.transport.websocket_path,
                )
                .await?,
            );
            sinks.push(Arc::clone(&server) as Arc<dyn TransportSink>);
            scheduler.register(Actor::new(
                WEBSOCKET_ENDPOINT_ID,
                MAILBOX_CAPACITY,
                Endpoint::new(WEBSOCKET_ENDPOINT_ID, server as Arc<dyn TransportSink>),
            ))?;
            router_targets.push(WEBSOCKET_ENDPOINT_ID.to_string());
        }

        if self.config.transport.udp_enabled {
            let sink = Arc::new(UdpSink::connect(
                &self.config.transport.udp_send_address,
                Duration::from_millis(self.config.transport.udp_send_interval_ms),
            )?);
            sinks.push(Arc::clone(&sink) as Arc<dyn TransportSink>);
            scheduler.register(Actor::new(
                UDP_ENDPOINT_ID,
                MAILBOX_CAPACITY,
                Endpoint::new(UDP_ENDPOINT_ID, sink as Arc<dyn TransportSink>),
            ))?;
            router_targets.push(UDP_ENDPOINT_ID.to_string());
        }

        let router = Actor::new(
            ROUTER_ID,
            MAILBOX_CAPACITY,
            Router::new(Arc::clone(&scheduler), router_targets),
        );
        scheduler.register(Arc::clone(&router))?;

        let processor = Actor::new(
            PROCESSOR_ID,
            MAILBOX_CAPACITY,
            Processor::new(router, Arc::clone(&raw_pool), Arc::clone(&processed_pool)),
        );
        scheduler.register(Arc::clone(&processor))?;

        // Device selection, with channel clamping.
        let (device, channels) = select_input_device(&devices, &self.config.input)?;
        log_input_device(&device);

        Ok(Parts {
            scheduler,
            fft,
            bpm,
            raw_pool,
            processed_pool,
            processor,
            sinks,
            device,
            channels,
        })
    }

    /// Start all actors, open the input stream with the hot path bound,
    /// and wait for `cancel`.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<()> {
        self.transition(EngineState::Initialized, EngineState::Running, "run")?;

        let (hot, params) = {
            let mut parts_guard = self.parts.lock();
            let parts = parts_guard
                .as_mut()
                .ok_or_else(|| EngineError::InvalidState("run before initialize".into()))?;

            let start_errors = parts.scheduler.start_all();
            if !start_errors.is_empty() {
                let summary: Vec<String> = start_errors
                    .iter()
                    .map(|(id, e)| format!("{id}: {e}"))
                    .collect();
                return Err(EngineError::Other(anyhow::anyhow!(
                    "failed to start actor system: {}",
                    summary.join("; ")
                )));
            }

            let hot = HotPath::new(
                parts.fft.take(),
                Arc::clone(&parts.bpm),
                Arc::clone(&parts.raw_pool),
                Arc::clone(&parts.processor),
                Arc::clone(&self.frame_count),
            );

            let params = StreamParams {
                device_index: parts.device.index,
                channels: parts.channels,
                sample_rate: self.config.input.sample_rate,
                frames_per_buffer: self.config.input.buffer_size,
                low_latency: self.config.input.low_latency,
            };

            (hot, params)
        };

        self.open_stream(hot, params).await?;
        info!("engine running; waiting for cancellation");

        loop {
            if *cancel.borrow() {
                break;
            }
            if cancel.changed().await.is_err() {
                break;
            }
        }

        info!("cancellation observed, run() returning");
        Ok(())
    }

    async fn open_stream(&self, mut hot: HotPath, params: StreamParams) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let (open_tx, open_rx) = tokio::sync::oneshot::channel::<Result<()>>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        // The stream must be created, started, and dropped on one thread.
        let task = tokio::task::spawn_blocking(move || -> Result<()> {
            let callback: SampleCallback = Box::new(move |samples| hot.on_samples(samples));
            let mut stream = match backend.open_stream(&params, callback) {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = open_tx.send(Err(err));
                    return Ok(());
                }
            };
            if let Err(err) = stream.start() {
                let _ = open_tx.send(Err(err));
                return Ok(());
            }
            let _ = open_tx.send(Ok(()));

            // Park until close() releases the stream thread.
            let _ = release_rx.recv();

            let mut errs = Vec::new();
            if let Err(e) = stream.stop() {
                errs.push(format!("stop: {e}"));
            }
            if let Err(e) = stream.close() {
                errs.push(format!("close: {e}"));
            }
            if errs.is_empty() {
                Ok(())
            } else {
                Err(EngineError::AudioStream(errs.join("; ")))
            }
        });

        *self.stream_release.lock() = Some(release_tx);
        *self.stream_task.lock() = Some(task);

        match open_rx.await {
            Ok(Ok(())) => {
                info!("audio stream started");
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(EngineError::AudioStream(
                "stream task died before reporting open status".into(),
            )),
        }
    }

    /// Shut everything down: stream, actors, transports. Errors are
    /// accumulated across steps and returned as one composite failure.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Closed => return Ok(()),
                EngineState::ShuttingDown => return Ok(()),
                _ => *state = EngineState::ShuttingDown,
            }
        }

        let mut errs: Vec<String> = Vec::new();

        // 1. Stop the audio stream first; nothing else can quiesce while
        //    the hot path is still firing.
        let release = self.stream_release.lock().take();
        drop(release); // dropping the sender unparks the stream thread
        let task = self.stream_task.lock().take();
        if let Some(task) = task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errs.push(format!("audio stream: {err}")),
                Err(join_err) => errs.push(format!("stream task: {join_err}")),
            }
        }

        let parts = self.parts.lock().take();
        if let Some(parts) = parts {
            // 2. Actor system: cancellation first, then per-actor stop,
            //    all bounded by the shutdown budget.
            match tokio::time::timeout(SHUTDOWN_BUDGET, parts.scheduler.stop_all()).await {
                Ok(stop_errors) => {
                    for (id, err) in stop_errors {
                        errs.push(format!("actor {id}: {err}"));
                    }
                }
                Err(_) => {
                    errs.push(format!(
                        "actor shutdown exceeded {}s budget; mailboxes abandoned",
                        SHUTDOWN_BUDGET.as_secs()
                    ));
                }
            }
            parts.scheduler.close();

            // 3. Transports, newest first.
            for sink in parts.sinks.iter().rev() {
                if let Err(err) = sink.close() {
                    errs.push(format!("transport: {err}"));
                }
            }
        }

        *self.state.lock() = EngineState::Closed;

        if errs.is_empty() {
            info!("engine closed cleanly");
            Ok(())
        } else {
            Err(EngineError::Shutdown(errs.join("; ")))
        }
    }

    fn transition(&self, from: EngineState, to: EngineState, op: &str) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(EngineError::InvalidState(format!(
                "{op} requires {from:?}, engine is {:?}",
                *state
            )));
        }
        *state = to;
        Ok(())
    }
}
