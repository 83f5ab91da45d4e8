//! Broadcast Hub: fan-out of observer events to every attached observer.
//!
//! Each observer owns a bounded queue. Delivery is a `try_send`, so the
//! observer set lock is never held across a wait: an observer whose queue is
//! full or closed is detached on the spot and the others are unaffected.
//! Snapshot payloads are built while the set lock is held, which keeps every
//! observer's stream in the order the snapshots were taken.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ObserverEvent, Snapshot};
use crate::state::{new_state, Shared};

pub type ObserverId = Uuid;

/// Serialized event, shared by every observer queue.
pub type HubMessage = Arc<str>;

pub const DEFAULT_OBSERVER_QUEUE: usize = 64;

/// Receiving end handed to an attached observer.
pub struct Observer {
    pub id: ObserverId,
    pub rx: mpsc::Receiver<HubMessage>,
}

#[derive(Clone)]
pub struct BroadcastHub {
    observers: Shared<HashMap<ObserverId, mpsc::Sender<HubMessage>>>,
    queue_size: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_QUEUE)
    }
}

impl BroadcastHub {
    pub fn new(queue_size: usize) -> Self {
        Self {
            observers: new_state(HashMap::new()),
            queue_size: queue_size.max(1),
        }
    }

    /// Attaches an observer whose first message is the snapshot built by
    /// `current`.
    pub fn attach(&self, current: impl FnOnce() -> Snapshot) -> Observer {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let id = Uuid::new_v4();

        let mut observers = self.observers.lock();
        if let Some(message) = encode(&ObserverEvent::UpdateStatus(current())) {
            // Fresh queue with capacity >= 1, cannot be full.
            let _ = tx.try_send(message);
        }
        observers.insert(id, tx);
        info!("[hub] observer {} attached ({} total)", id, observers.len());

        Observer { id, rx }
    }

    /// Idempotent.
    pub fn detach(&self, id: ObserverId) -> bool {
        let removed = self.observers.lock().remove(&id).is_some();
        if removed {
            info!("[hub] observer {} detached", id);
        }
        removed
    }

    /// Publishes the snapshot built by `current` to every observer.
    pub fn publish_snapshot(&self, current: impl FnOnce() -> Snapshot) -> usize {
        let mut observers = self.observers.lock();
        let Some(message) = encode(&ObserverEvent::UpdateStatus(current())) else {
            return 0;
        };
        deliver(&mut observers, message)
    }

    /// Publishes a discrete event (speedtest results) to every observer.
    pub fn publish(&self, event: &ObserverEvent) -> usize {
        let Some(message) = encode(event) else {
            return 0;
        };
        let mut observers = self.observers.lock();
        deliver(&mut observers, message)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

fn encode(event: &ObserverEvent) -> Option<HubMessage> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!("[hub] failed to serialize observer event: {}", e);
            None
        }
    }
}

/// Returns the number of observers the message was queued for.
fn deliver(observers: &mut HashMap<ObserverId, mpsc::Sender<HubMessage>>, message: HubMessage) -> usize {
    let mut delivered = 0;
    observers.retain(|id, tx| match tx.try_send(message.clone()) {
        Ok(()) => {
            delivered += 1;
            true
        }
        Err(TrySendError::Full(_)) => {
            warn!("[hub] observer {} is not keeping up, detaching", id);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("[hub] observer {} went away, detaching", id);
            false
        }
    });
    delivered
}
