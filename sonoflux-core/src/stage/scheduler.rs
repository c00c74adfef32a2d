//! Actor registry and cancellation root.
//!
//! The scheduler owns the cancellation channel every actor task selects
//! on. `stop_all` flips it first so all tasks begin winding down
//! concurrently, then joins each actor in turn; per-actor failures are
//! collected rather than short-circuiting the shutdown.
//!
//! Registry lookups take a read lock, which is why the engine caches the
//! `Arc<Actor>` of its hot-path target and calls it directly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::actor::Actor;
use super::message::FrameMessage;
use crate::error::{EngineError, Result};

pub struct Scheduler {
    actors: RwLock<HashMap<String, Arc<Actor>>>,
    cancel_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            actors: RwLock::new(HashMap::new()),
            cancel_tx,
        }
    }

    /// A receiver on the scheduler's cancellation channel. Flipped
    /// exactly once, by [`stop_all`](Self::stop_all).
    pub fn cancel_token(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Register `actor` under its id. Ids are unique per scheduler.
    pub fn register(&self, actor: Arc<Actor>) -> Result<()> {
        let mut actors = self.actors.write();
        let id = actor.id().to_string();
        if actors.contains_key(&id) {
            return Err(EngineError::ActorDuplicate { id });
        }
        debug!(actor = %id, "registered");
        actors.insert(id, actor);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Actor>> {
        self.actors.read().get(id).cloned()
    }

    /// Look up `id` and deliver with backpressure. A rejected message is
    /// dropped here; callers that must return records to a pool use the
    /// actor handle directly.
    pub async fn send(&self, id: &str, msg: FrameMessage) -> Result<()> {
        let actor = self.get(id).ok_or_else(|| EngineError::ActorNotFound {
            id: id.to_string(),
        })?;
        actor.send(msg).await.map_err(EngineError::from)
    }

    /// Look up `id` and deliver without blocking.
    pub fn try_send(&self, id: &str, msg: FrameMessage) -> Result<()> {
        let actor = self.get(id).ok_or_else(|| EngineError::ActorNotFound {
            id: id.to_string(),
        })?;
        actor.try_send(msg).map_err(EngineError::from)
    }

    /// Start every registered actor. Failures are collected per id, not
    /// short-circuited; an empty map means every actor started.
    pub fn start_all(&self) -> HashMap<String, EngineError> {
        let actors: Vec<Arc<Actor>> = self.actors.read().values().cloned().collect();
        let mut errors = HashMap::new();
        for actor in actors {
            match actor.start(self.cancel_tx.subscribe()) {
                Ok(()) => info!(actor = %actor.id(), "actor started"),
                Err(err) => {
                    warn!(actor = %actor.id(), %err, "failed to start actor");
                    errors.insert(actor.id().to_string(), err);
                }
            }
        }
        errors
    }

    /// Set the cancellation flag, then stop each actor (close intake,
    /// drain, join). Failures are collected per id.
    pub async fn stop_all(&self) -> HashMap<String, EngineError> {
        let _ = self.cancel_tx.send(true);

        let actors: Vec<Arc<Actor>> = self.actors.read().values().cloned().collect();
        let mut errors = HashMap::new();
        for actor in actors {
            match actor.stop().await {
                Ok(()) => info!(actor = %actor.id(), "actor stopped"),
                Err(err) => {
                    warn!(actor = %actor.id(), %err, "failed to stop actor");
                    errors.insert(actor.id().to_string(), err);
                }
            }
        }
        errors
    }

    /// Forget all registrations. Subsequent operations on released ids
    /// report `ActorNotFound`.
    pub fn close(&self) {
        self.actors.write().clear();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
