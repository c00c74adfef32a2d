//! Named actors over bounded tokio mailboxes.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start()──► Started ──stop()──► Stopping ──join──► Stopped
//! ```
//!
//! `start` and `stop` are idempotent; any other transition is rejected
//! with `ActorClosed`. Each actor runs exactly one processing task that
//! consumes messages until cancellation or mailbox close, then drains
//! whatever is already queued so in-flight frames are still delivered.
//!
//! ## Ordering
//!
//! Messages from one sender to one actor arrive in send order (tokio
//! mpsc is FIFO per channel). There is no cross-actor ordering.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::message::FrameMessage;
use crate::error::EngineError;

/// Mailbox capacity used when a caller asks for zero.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Mailbox rejections carry the message back so pooled records can be
/// returned to their pool instead of leaking into the allocator.
#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("actor mailbox full")]
    Full(FrameMessage),
    #[error("actor closed or stopping")]
    Closed(FrameMessage),
}

impl MailboxError {
    /// Recover the rejected message for pool return.
    pub fn into_message(self) -> FrameMessage {
        match self {
            MailboxError::Full(msg) | MailboxError::Closed(msg) => msg,
        }
    }
}

impl From<MailboxError> for EngineError {
    fn from(err: MailboxError) -> Self {
        match err {
            MailboxError::Full(_) => EngineError::MailboxFull,
            MailboxError::Closed(_) => EngineError::ActorClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Per-message behavior of an actor. One call per message, run to
/// completion before the next message is taken; awaiting inside (for a
/// downstream `send`) yields the task cooperatively.
pub trait Handler: Send + 'static {
    fn handle(&mut self, msg: FrameMessage) -> impl Future<Output = ()> + Send;
}

type SpawnFn = Box<dyn FnOnce(watch::Receiver<bool>) -> JoinHandle<()> + Send>;

/// A named processing unit: bounded mailbox plus one processing task.
///
/// Cheap to share via `Arc`; the engine caches the handles of hot-path
/// targets so dispatch never goes through the registry lock.
pub struct Actor {
    id: String,
    tx: mpsc::Sender<FrameMessage>,
    state: Mutex<ActorState>,
    stop_tx: watch::Sender<bool>,
    spawn: Mutex<Option<SpawnFn>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Actor {
    /// Build an actor with the given mailbox capacity (0 is normalized
    /// to [`DEFAULT_MAILBOX_CAPACITY`]). The processing task is not
    /// spawned until [`start`](Self::start).
    pub fn new<H: Handler>(id: impl Into<String>, capacity: usize, handler: H) -> Arc<Self> {
        let capacity = if capacity == 0 {
            DEFAULT_MAILBOX_CAPACITY
        } else {
            capacity
        };
        let id = id.into();
        let (tx, rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        let loop_id = id.clone();
        let spawn: SpawnFn = Box::new(move |cancel| {
            tokio::spawn(process_loop(loop_id, rx, handler, cancel, stop_rx))
        });

        Arc::new(Self {
            id,
            tx,
            state: Mutex::new(ActorState::Created),
            stop_tx,
            spawn: Mutex::new(Some(spawn)),
            join: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ActorState {
        *self.state.lock()
    }

    /// Deliver `msg`, waiting cooperatively while the mailbox is full.
    /// Returns `Closed` when the actor is not started, is stopping, or
    /// begins stopping while the send is parked.
    pub async fn send(&self, msg: FrameMessage) -> Result<(), MailboxError> {
        if self.state() != ActorState::Started {
            return Err(MailboxError::Closed(msg));
        }
        self.tx
            .send(msg)
            .await
            .map_err(|e| MailboxError::Closed(e.0))
    }

    /// Deliver `msg` without ever blocking: a full mailbox rejects the
    /// message immediately. This is the only send the hot path uses.
    pub fn try_send(&self, msg: FrameMessage) -> Result<(), MailboxError> {
        if self.state() != ActorState::Started {
            return Err(MailboxError::Closed(msg));
        }
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => Err(MailboxError::Full(msg)),
            Err(mpsc::error::TrySendError::Closed(msg)) => Err(MailboxError::Closed(msg)),
        }
    }

    /// Spawn the processing task. A second call on a started actor is a
    /// no-op; starting a stopping or stopped actor is rejected.
    pub fn start(&self, cancel: watch::Receiver<bool>) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        match *state {
            ActorState::Started => return Ok(()),
            ActorState::Stopping | ActorState::Stopped => return Err(EngineError::ActorClosed),
            ActorState::Created => {}
        }

        let spawn = self
            .spawn
            .lock()
            .take()
            .ok_or(EngineError::ActorClosed)?;
        *state = ActorState::Started;
        drop(state);

        *self.join.lock() = Some(spawn(cancel));
        debug!(actor = %self.id, "started");
        Ok(())
    }

    /// Mark stopping, close mailbox intake, drain in-flight messages and
    /// join the processing task. Safe to call any number of times.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            match *state {
                ActorState::Stopping | ActorState::Stopped => return Ok(()),
                ActorState::Created => {
                    // Never started: nothing to drain or join.
                    *state = ActorState::Stopped;
                    return Ok(());
                }
                ActorState::Started => *state = ActorState::Stopping,
            }
        }

        let _ = self.stop_tx.send(true);

        let join = self.join.lock().take();
        if let Some(handle) = join {
            if handle.await.is_err() {
                warn!(actor = %self.id, "processing task panicked during stop");
            }
        }

        *self.state.lock() = ActorState::Stopped;
        debug!(actor = %self.id, "stopped");
        Ok(())
    }
}

async fn process_loop<H: Handler>(
    id: String,
    mut rx: mpsc::Receiver<FrameMessage>,
    mut handler: H,
    mut cancel: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    debug!(actor = %id, "cancellation observed");
                    break;
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            msg = rx.recv() => match msg {
                Some(msg) => handler.handle(msg).await,
                None => {
                    debug!(actor = %id, "mailbox closed, exiting process loop");
                    return;
                }
            },
        }
    }

    // Reject further intake, then deliver whatever was already queued.
    // Pending senders parked on a full mailbox wake with a closed error.
    rx.close();
    while let Some(msg) = rx.recv().await {
        handler.handle(msg).await;
    }
    debug!(actor = %id, "drained and exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::message::RawFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    /// Records the frame_count of every message it sees.
    struct Recorder {
        seen: UnboundedSender<u64>,
        delay: Option<Duration>,
        handled: Arc<AtomicUsize>,
    }

    impl Handler for Recorder {
        async fn handle(&mut self, msg: FrameMessage) {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            if let FrameMessage::Raw(frame) = msg {
                let _ = self.seen.send(frame.frame_count);
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder() -> (Recorder, tokio::sync::mpsc::UnboundedReceiver<u64>, Arc<AtomicUsize>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handled = Arc::new(AtomicUsize::new(0));
        (
            Recorder {
                seen: tx,
                delay: None,
                handled: Arc::clone(&handled),
            },
            rx,
            handled,
        )
    }

    fn raw(n: u64) -> FrameMessage {
        FrameMessage::Raw(RawFrame {
            frame_count: n,
            ..RawFrame::default()
        })
    }

    #[tokio::test]
    async fn messages_are_delivered_in_send_order() {
        let (handler, mut seen, _) = recorder();
        let actor = Actor::new("processor", 16, handler);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        actor.start(cancel_rx).unwrap();

        for n in 1..=5 {
            actor.send(raw(n)).await.unwrap();
        }
        actor.stop().await.unwrap();

        let mut order = Vec::new();
        while let Ok(n) = seen.try_recv() {
            order.push(n);
        }
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn send_before_start_is_rejected_as_closed() {
        let (handler, _seen, _) = recorder();
        let actor = Actor::new("processor", 4, handler);
        let err = actor.send(raw(1)).await.unwrap_err();
        assert!(matches!(err, MailboxError::Closed(_)));
        // The rejected message is recoverable for pool return.
        assert!(matches!(err.into_message(), FrameMessage::Raw(f) if f.frame_count == 1));
    }

    #[tokio::test]
    async fn try_send_on_full_mailbox_returns_full_without_blocking() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let handler = Recorder {
            seen: tx,
            delay: Some(Duration::from_secs(60)),
            handled: Arc::new(AtomicUsize::new(0)),
        };
        let actor = Actor::new("slow", 2, handler);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        actor.start(cancel_rx).unwrap();

        // First message is pulled into the (sleeping) handler; the next
        // two fill the mailbox; the one after that must bounce.
        actor.try_send(raw(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        actor.try_send(raw(2)).unwrap();
        actor.try_send(raw(3)).unwrap();
        let err = actor.try_send(raw(4)).unwrap_err();
        assert!(matches!(err, MailboxError::Full(_)));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (handler, _seen, _) = recorder();
        let actor = Actor::new("processor", 4, handler);
        let (_cancel_tx, cancel_tx) = watch::channel(false);
        actor.start(cancel_tx.clone()).unwrap();
        actor.start(cancel_tx).unwrap();
        assert_eq!(actor.state(), ActorState::Started);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_send_after_stop_is_closed() {
        let (handler, _seen, _) = recorder();
        let actor = Actor::new("processor", 4, handler);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        actor.start(cancel_rx).unwrap();

        actor.stop().await.unwrap();
        actor.stop().await.unwrap();
        actor.stop().await.unwrap();
        assert_eq!(actor.state(), ActorState::Stopped);

        assert!(matches!(
            actor.try_send(raw(1)),
            Err(MailboxError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn restart_after_stop_is_rejected() {
        let (handler, _seen, _) = recorder();
        let actor = Actor::new("processor", 4, handler);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        actor.start(cancel_rx.clone()).unwrap();
        actor.stop().await.unwrap();
        assert!(matches!(
            actor.start(cancel_rx),
            Err(EngineError::ActorClosed)
        ));
    }

    #[tokio::test]
    async fn stop_drains_queued_messages_before_joining() {
        let (handler, mut seen, handled) = recorder();
        let actor = Actor::new("processor", 16, handler);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        actor.start(cancel_rx).unwrap();

        for n in 1..=10 {
            actor.send(raw(n)).await.unwrap();
        }
        actor.stop().await.unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 10);
        let mut count = 0;
        while seen.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn cancellation_stops_the_processing_task() {
        let (handler, _seen, _) = recorder();
        let actor = Actor::new("processor", 4, handler);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        actor.start(cancel_rx).unwrap();

        cancel_tx.send(true).unwrap();
        // stop() joins the task; without cancellation being observed this
        // would hang past the test timeout.
        tokio::time::timeout(Duration::from_secs(1), actor.stop())
            .await
            .expect("stop timed out after cancellation")
            .unwrap();
        assert_eq!(actor.state(), ActorState::Stopped);
    }
}
