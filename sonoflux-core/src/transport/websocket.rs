//! WebSocket broadcast server.
//!
//! ## Fan-out model
//!
//! ```text
//! send_bytes ──try_send──► per-subscriber queue ──► writer task ──► socket
//! ```
//!
//! Each subscriber owns one bounded queue and one writer task. A full
//! queue drops the frame for that subscriber only; nothing in
//! `send_bytes` can block or slow the pipeline. Handshakes are accepted
//! only on the configured path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::TransportSink;
use crate::error::{EngineError, Result};

/// Frames buffered per subscriber before that subscriber starts losing
/// frames.
const SUBSCRIBER_QUEUE: usize = 64;

type Subscribers = Arc<RwLock<HashMap<u64, mpsc::Sender<Message>>>>;

/// Broadcasting WebSocket server; one bounded queue per subscriber.
pub struct WebSocketServer {
    subscribers: Subscribers,
    shutdown_tx: watch::Sender<bool>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    local_addr: std::net::SocketAddr,
}

impl WebSocketServer {
    /// Bind `addr` and start accepting WebSocket upgrades on `path`.
    pub async fn bind(addr: &str, path: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| EngineError::Transport(format!("websocket bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let subscribers: Subscribers = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            path.to_string(),
            Arc::clone(&subscribers),
            shutdown_rx,
        ));

        info!(%local_addr, path, "websocket server listening");

        Ok(Self {
            subscribers,
            shutdown_tx,
            accept_task: parking_lot::Mutex::new(Some(accept_task)),
            local_addr,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl TransportSink for WebSocketServer {
    fn send_bytes(&self, payload: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| EngineError::Transport(format!("payload is not UTF-8: {e}")))?;

        let mut stale = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (&id, queue) in subscribers.iter() {
                match queue.try_send(Message::text(text.to_string())) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Slow client: this frame is lost for them only.
                        debug!(subscriber = id, "queue full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => stale.push(id),
                }
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in stale {
                subscribers.remove(&id);
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        // Dropping the queue senders ends each writer task, which closes
        // its socket.
        self.subscribers.write().clear();
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    path: String,
    subscribers: Subscribers,
    mut shutdown: watch::Receiver<bool>,
) {
    let next_id = AtomicU64::new(0);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("websocket accept failed: {e}");
                        continue;
                    }
                };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let path = path.clone();
                let subscribers = Arc::clone(&subscribers);
                tokio::spawn(async move {
                    run_session(stream, peer, id, path, subscribers).await;
                });
            }
        }
    }
    debug!("websocket accept loop exited");
}

async fn run_session(
    stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    id: u64,
    path: String,
    subscribers: Subscribers,
) {
    let check_path = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() == path {
            Ok(resp)
        } else {
            Err(ErrorResponse::new(Some("not found".into())))
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, "websocket handshake rejected: {e}");
            return;
        }
    };

    info!(%peer, subscriber = id, "websocket client connected");

    let (queue_tx, mut queue_rx) = mpsc::channel::<Message>(SUBSCRIBER_QUEUE);
    subscribers.write().insert(id, queue_tx);

    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            outgoing = queue_rx.recv() => match outgoing {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        debug!(subscriber = id, "websocket write failed: {e}");
                        break;
                    }
                }
                // Queue sender dropped: server is closing.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Inbound payloads are ignored; this is a one-way feed.
                Some(Ok(_)) => {}
            },
        }
    }

    subscribers.write().remove(&id);
    info!(subscriber = id, "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn subscriber_receives_broadcast_payload() {
        let server = WebSocketServer::bind("127.0.0.1:0", "/ws").await.unwrap();
        let url = format!("ws://{}/ws", server.local_addr());

        let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_for(|| server.subscriber_count() == 1, "subscriber registration").await;

        server.send_bytes(br#"{"type":"fft_magnitudes"}"#).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), client.next())
            .await
            .expect("no frame within 1s")
            .unwrap()
            .unwrap();
        assert_eq!(msg.into_text().unwrap(), r#"{"type":"fft_magnitudes"}"#);

        server.close().unwrap();
    }

    #[tokio::test]
    async fn handshake_on_wrong_path_is_rejected() {
        let server = WebSocketServer::bind("127.0.0.1:0", "/ws").await.unwrap();
        let url = format!("ws://{}/other", server.local_addr());
        assert!(tokio_tungstenite::connect_async(url.as_str()).await.is_err());
        assert_eq!(server.subscriber_count(), 0);
        server.close().unwrap();
    }

    #[tokio::test]
    async fn send_without_subscribers_is_a_no_op() {
        let server = WebSocketServer::bind("127.0.0.1:0", "/ws").await.unwrap();
        server.send_bytes(b"{}").unwrap();
        server.close().unwrap();
        // close is idempotent
        server.close().unwrap();
    }

    #[tokio::test]
    async fn disconnected_subscriber_is_forgotten() {
        let server = WebSocketServer::bind("127.0.0.1:0", "/ws").await.unwrap();
        let url = format!("ws://{}/ws", server.local_addr());
        let (client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_for(|| server.subscriber_count() == 1, "subscriber registration").await;

        drop(client);
        wait_for(|| server.subscriber_count() == 0, "subscriber removal").await;
        server.close().unwrap();
    }
}
