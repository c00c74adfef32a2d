//! Endpoint actor: serializes processed frames and hands the bytes to a
//! transport sink.
//!
//! Send errors are logged and swallowed; reconnection is the
//! transport's own business. The endpoint is usually the frame's last
//! owner, so dropping it at the end of `handle` recycles the record.

use std::sync::Arc;

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::warn;

use crate::stage::{FrameMessage, Handler, ProcessedFrame};
use crate::transport::TransportSink;

/// JSON payload emitted to subscribers.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    frame_count: u64,
    start_time: String,
    magnitudes: &'a [f64],
    spectral_flux: &'a [f64],
    bpm: f64,
    bpm_confidence: f64,
}

impl<'a> WirePayload<'a> {
    fn from_frame(frame: &'a ProcessedFrame) -> Self {
        Self {
            kind: "fft_magnitudes",
            frame_count: frame.frame_count,
            start_time: frame
                .start_time
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
            magnitudes: &frame.magnitudes,
            spectral_flux: &frame.spectral_flux,
            bpm: frame.bpm,
            bpm_confidence: frame.confidence,
        }
    }
}

pub struct Endpoint {
    name: String,
    sink: Arc<dyn TransportSink>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, sink: Arc<dyn TransportSink>) -> Self {
        Self {
            name: name.into(),
            sink,
        }
    }
}

impl Handler for Endpoint {
    async fn handle(&mut self, msg: FrameMessage) {
        let frame = match msg {
            FrameMessage::Processed(frame) => frame,
            other => {
                warn!(
                    endpoint = %self.name,
                    kind = other.kind(),
                    "endpoint received unexpected message kind"
                );
                return;
            }
        };

        match serde_json::to_vec(&WirePayload::from_frame(&frame)) {
            Ok(bytes) => {
                if let Err(err) = self.sink.send_bytes(&bytes) {
                    warn!(endpoint = %self.name, %err, "transport send failed, frame dropped");
                }
            }
            Err(err) => warn!(endpoint = %self.name, %err, "frame serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, Result};
    use crate::stage::{Actor, FramePool, SharedFrame};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use tokio::sync::watch;

    /// Sink that records payloads, optionally failing every send.
    struct CaptureSink {
        payloads: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl CaptureSink {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                payloads: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    impl TransportSink for CaptureSink {
        fn send_bytes(&self, payload: &[u8]) -> Result<()> {
            if self.fail {
                return Err(EngineError::Transport("intentional test failure".into()));
            }
            self.payloads.lock().push(payload.to_vec());
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn frame(pool: &Arc<FramePool<ProcessedFrame>>) -> SharedFrame {
        let mut f = pool.acquire();
        f.magnitudes.extend_from_slice(&[0.0, 0.5, 1.0]);
        f.spectral_flux.extend_from_slice(&[0.0, 0.25, 0.0]);
        f.frame_count = 42;
        f.bpm = 174.0;
        f.confidence = 0.8;
        f.start_time = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        SharedFrame::new(f, Arc::clone(pool))
    }

    #[tokio::test]
    async fn payload_matches_the_wire_format() {
        let pool: Arc<FramePool<ProcessedFrame>> = Arc::new(FramePool::new(2, 8));
        let sink = CaptureSink::new(false);
        let endpoint = Actor::new(
            "ws",
            8,
            Endpoint::new("ws", Arc::clone(&sink) as Arc<dyn TransportSink>),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        endpoint.start(cancel_rx).unwrap();

        endpoint
            .send(FrameMessage::Processed(frame(&pool)))
            .await
            .unwrap();
        endpoint.stop().await.unwrap();

        let payloads = sink.payloads.lock();
        assert_eq!(payloads.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(json["type"], "fft_magnitudes");
        assert_eq!(json["frameCount"], 42);
        assert_eq!(json["magnitudes"], serde_json::json!([0.0, 0.5, 1.0]));
        assert_eq!(json["spectralFlux"], serde_json::json!([0.0, 0.25, 0.0]));
        assert_eq!(json["bpm"], 174.0);
        assert_eq!(json["bpmConfidence"], 0.8);
        let start = json["startTime"].as_str().unwrap();
        assert!(
            start.starts_with("2025-06-01T12:00:00.000000000"),
            "unexpected startTime {start}"
        );

        assert_eq!(pool.available(), pool.capacity(), "frame returned to pool");
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed_and_frame_recycled() {
        let pool: Arc<FramePool<ProcessedFrame>> = Arc::new(FramePool::new(2, 8));
        let sink = CaptureSink::new(true);
        let endpoint = Actor::new(
            "ws",
            8,
            Endpoint::new("ws", Arc::clone(&sink) as Arc<dyn TransportSink>),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        endpoint.start(cancel_rx).unwrap();

        endpoint
            .send(FrameMessage::Processed(frame(&pool)))
            .await
            .unwrap();
        endpoint.stop().await.unwrap();

        assert!(sink.payloads.lock().is_empty());
        assert_eq!(pool.available(), pool.capacity());
    }
}
