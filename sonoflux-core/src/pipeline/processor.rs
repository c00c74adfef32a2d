//! Processor actor: converts raw hot-path frames into timestamped
//! processed frames and forwards them to the router.
//!
//! Pool hygiene is the whole point of this actor: the incoming raw
//! record goes back to the raw pool on every path, and the outgoing
//! record travels as a [`SharedFrame`] whose last owner recycles it,
//! so a failed router send releases it by simply being dropped.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::stage::{
    Actor, FrameMessage, FramePool, Handler, ProcessedFrame, RawFrame, SharedFrame,
};

pub struct Processor {
    router: Arc<Actor>,
    raw_pool: Arc<FramePool<RawFrame>>,
    processed_pool: Arc<FramePool<ProcessedFrame>>,
}

impl Processor {
    pub fn new(
        router: Arc<Actor>,
        raw_pool: Arc<FramePool<RawFrame>>,
        processed_pool: Arc<FramePool<ProcessedFrame>>,
    ) -> Self {
        Self {
            router,
            raw_pool,
            processed_pool,
        }
    }
}

/// Copy `src` into `dst` reusing `dst`'s capacity; grows only when the
/// capacity is insufficient.
fn copy_into(dst: &mut Vec<f64>, src: &[f64]) {
    dst.clear();
    dst.extend_from_slice(src);
}

impl Handler for Processor {
    async fn handle(&mut self, msg: FrameMessage) {
        let raw = match msg {
            FrameMessage::Raw(frame) => frame,
            other => {
                warn!(kind = other.kind(), "processor received unexpected message kind");
                return;
            }
        };

        let mut out = self.processed_pool.acquire();
        out.frame_count = raw.frame_count;
        out.bpm = raw.bpm;
        out.confidence = raw.confidence;
        out.start_time = Utc::now();
        copy_into(&mut out.magnitudes, &raw.magnitudes);
        copy_into(&mut out.spectral_flux, &raw.spectral_flux);

        let shared = SharedFrame::new(out, Arc::clone(&self.processed_pool));
        let result = self.router.send(FrameMessage::Processed(shared)).await;

        // The raw record is done with regardless of the send outcome.
        self.raw_pool.release(raw);

        if let Err(err) = result {
            warn!(router = %self.router.id(), %err, "failed to forward processed frame");
            // Dropping the rejected message recycles the processed record.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ActorState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    struct CountingSink(Arc<AtomicUsize>);

    impl Handler for CountingSink {
        async fn handle(&mut self, msg: FrameMessage) {
            if let FrameMessage::Processed(_frame) = msg {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn pools() -> (Arc<FramePool<RawFrame>>, Arc<FramePool<ProcessedFrame>>) {
        (
            Arc::new(FramePool::new(8, 129)),
            Arc::new(FramePool::new(8, 129)),
        )
    }

    #[tokio::test]
    async fn raw_frames_become_processed_and_pools_balance() {
        let (raw_pool, processed_pool) = pools();
        let delivered = Arc::new(AtomicUsize::new(0));
        let sink = Actor::new("router", 8, CountingSink(Arc::clone(&delivered)));
        let processor_actor = Actor::new(
            "processor",
            8,
            Processor::new(Arc::clone(&sink), Arc::clone(&raw_pool), Arc::clone(&processed_pool)),
        );

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        sink.start(cancel_rx.clone()).unwrap();
        processor_actor.start(cancel_rx).unwrap();

        for n in 1..=5 {
            let mut frame = raw_pool.acquire();
            frame.magnitudes.extend_from_slice(&[0.5; 129]);
            frame.spectral_flux.extend_from_slice(&[0.25; 129]);
            frame.frame_count = n;
            frame.bpm = 128.0;
            frame.confidence = 0.9;
            processor_actor.send(FrameMessage::Raw(frame)).await.unwrap();
        }

        processor_actor.stop().await.unwrap();
        sink.stop().await.unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 5);
        // Every record found its way home.
        assert_eq!(raw_pool.available(), raw_pool.capacity());
        assert_eq!(processed_pool.available(), processed_pool.capacity());
    }

    #[tokio::test]
    async fn failed_router_send_releases_both_records() {
        let (raw_pool, processed_pool) = pools();
        let delivered = Arc::new(AtomicUsize::new(0));
        // Router is registered but never started, so sends fail Closed.
        let sink = Actor::new("router", 8, CountingSink(Arc::clone(&delivered)));
        assert_eq!(sink.state(), ActorState::Created);

        let processor_actor = Actor::new(
            "processor",
            8,
            Processor::new(Arc::clone(&sink), Arc::clone(&raw_pool), Arc::clone(&processed_pool)),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        processor_actor.start(cancel_rx).unwrap();

        let frame = raw_pool.acquire();
        processor_actor.send(FrameMessage::Raw(frame)).await.unwrap();
        processor_actor.stop().await.unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(raw_pool.available(), raw_pool.capacity());
        assert_eq!(processed_pool.available(), processed_pool.capacity());
    }

    #[tokio::test]
    async fn processed_frame_is_an_independent_copy() {
        let (raw_pool, processed_pool) = pools();

        struct Capture(tokio::sync::mpsc::UnboundedSender<SharedFrame>);
        impl Handler for Capture {
            async fn handle(&mut self, msg: FrameMessage) {
                if let FrameMessage::Processed(frame) = msg {
                    let _ = self.0.send(frame);
                }
            }
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = Actor::new("router", 8, Capture(tx));
        let processor_actor = Actor::new(
            "processor",
            8,
            Processor::new(Arc::clone(&sink), Arc::clone(&raw_pool), Arc::clone(&processed_pool)),
        );
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        sink.start(cancel_rx.clone()).unwrap();
        processor_actor.start(cancel_rx).unwrap();

        let mut frame = raw_pool.acquire();
        frame.magnitudes.extend_from_slice(&[1.0, 2.0, 3.0]);
        frame.spectral_flux.extend_from_slice(&[0.1, 0.2, 0.3]);
        frame.frame_count = 7;
        processor_actor.send(FrameMessage::Raw(frame)).await.unwrap();

        let processed = rx.recv().await.unwrap();
        assert_eq!(processed.magnitudes, vec![1.0, 2.0, 3.0]);
        assert_eq!(processed.spectral_flux, vec![0.1, 0.2, 0.3]);
        assert_eq!(processed.frame_count, 7);
        assert!(processed.start_time > chrono::DateTime::<Utc>::UNIX_EPOCH);

        // The raw record was already reset and pooled; the processed
        // copy must be unaffected.
        assert_eq!(raw_pool.available(), raw_pool.capacity());
        assert_eq!(processed.magnitudes, vec![1.0, 2.0, 3.0]);

        // Releasing the last reference recycles the record.
        drop(processed);
        assert_eq!(processed_pool.available(), processed_pool.capacity());

        processor_actor.stop().await.unwrap();
        sink.stop().await.unwrap();
    }
}
