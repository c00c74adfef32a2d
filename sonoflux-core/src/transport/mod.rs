//! Transport adapters consumed by endpoint actors.
//!
//! Endpoints hold a sink behind `Arc<dyn TransportSink>`; the concrete
//! adapters own their sockets and background tasks. `send_bytes` must
//! never block the calling actor: slow consumers lose frames, they do
//! not stall the pipeline.

pub mod udp;
pub mod websocket;

use crate::error::Result;

/// Byte-oriented sink for encoded frames.
pub trait TransportSink: Send + Sync {
    /// Hand one encoded payload to the transport. Non-blocking; frames
    /// to slow or broken consumers are dropped.
    fn send_bytes(&self, payload: &[u8]) -> Result<()>;

    /// Release sockets and background tasks. Idempotent.
    fn close(&self) -> Result<()>;
}

pub use udp::UdpSink;
pub use websocket::WebSocketServer;
