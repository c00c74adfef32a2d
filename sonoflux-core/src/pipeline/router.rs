//! Router actor: fans one processed frame out to every named target.
//!
//! Targets are resolved through the scheduler at send time, so endpoints
//! can come and go without the router holding stale handles. A failure
//! on one target never stops delivery to the rest. The router holds the
//! frame only for the duration of the fan-out; pool return rides on the
//! shared frame's last-owner drop.

use std::sync::Arc;

use tracing::warn;

use crate::stage::{FrameMessage, Handler, Scheduler};

pub struct Router {
    scheduler: Arc<Scheduler>,
    targets: Vec<String>,
}

impl Router {
    pub fn new(scheduler: Arc<Scheduler>, targets: Vec<String>) -> Self {
        Self { scheduler, targets }
    }
}

impl Handler for Router {
    async fn handle(&mut self, msg: FrameMessage) {
        let frame = match msg {
            FrameMessage::Processed(frame) => frame,
            other => {
                warn!(kind = other.kind(), "router received unexpected message kind");
                return;
            }
        };

        for target in &self.targets {
            let share = FrameMessage::Processed(frame.clone());
            if let Err(err) = self.scheduler.send(target, share).await {
                warn!(target = %target, %err, "failed to forward frame to target");
            }
        }
    }
}
