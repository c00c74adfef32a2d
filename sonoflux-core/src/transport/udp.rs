//! Connected UDP datagram sink.
//!
//! Datagram delivery is fire-and-forget; the only policy here is a
//! minimum spacing between sends (`udp_send_interval`) so a fast FFT
//! cadence does not flood the receiver.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use super::TransportSink;
use crate::error::{EngineError, Result};

pub struct UdpSink {
    socket: UdpSocket,
    min_interval: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl UdpSink {
    /// Connect a non-blocking socket to `addr`. Frames arriving faster
    /// than `min_interval` apart are silently skipped.
    pub fn connect(addr: &str, min_interval: Duration) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| EngineError::Transport(format!("udp bind: {e}")))?;
        socket
            .connect(addr)
            .map_err(|e| EngineError::Transport(format!("udp connect {addr}: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        info!(%addr, ?min_interval, "udp sink connected");

        Ok(Self {
            socket,
            min_interval,
            last_send: Mutex::new(None),
        })
    }
}

impl TransportSink for UdpSink {
    fn send_bytes(&self, payload: &[u8]) -> Result<()> {
        {
            let mut last = self.last_send.lock();
            let now = Instant::now();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.min_interval {
                    return Ok(());
                }
            }
            *last = Some(now);
        }

        match self.socket.send(payload) {
            Ok(_) => Ok(()),
            // Socket buffer momentarily full: the frame is expendable.
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(EngineError::Transport(format!("udp send: {e}"))),
        }
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
