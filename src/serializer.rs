//! Single-flight ordered executor keyed by channel id.
//!
//! Events for one key run one at a time in arrival order. Events for
//! different keys run concurrently with no ordering between them.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

#[async_trait]
pub trait TurnHandler<E>: Send + Sync + 'static {
    async fn handle(&self, event: E);
}

type Queues<E> = Arc<Mutex<HashMap<String, VecDeque<E>>>>;

/// A key is draining while it has an entry in `queues`; the entry is removed
/// by the drain task once it finds the queue empty.
pub struct ChannelSerializer<E, H> {
    handler: Arc<H>,
    queues: Queues<E>,
}

impl<E, H> ChannelSerializer<E, H>
where
    E: Send + 'static,
    H: TurnHandler<E>,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queues `event` behind earlier events for `key`, starting a drain task if
    /// the key was idle.
    pub fn enqueue(&self, key: impl Into<String>, event: E) {
        let key = key.into();
        {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(queue) = queues.get_mut(&key) {
                queue.push_back(event);
                debug!("Queued event for {} ({} waiting)", key, queue.len());
                return;
            }
            queues.insert(key.clone(), VecDeque::new());
        }

        let handler = self.handler.clone();
        let queues = self.queues.clone();
        tokio::spawn(drain(key, event, handler, queues));
    }

    #[cfg(test)]
    fn is_draining(&self, key: &str) -> bool {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Events waiting behind the one currently running for `key`.
    #[cfg(test)]
    fn pending(&self, key: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, VecDeque::len)
    }
}

async fn drain<E, H>(key: String, first: E, handler: Arc<H>, queues: Queues<E>)
where
    E: Send + 'static,
    H: TurnHandler<E>,
{
    let mut next = Some(first);
    while let Some(event) = next {
        let handler = handler.clone();
        // A panicking turn must not stall the rest of the queue.
        if let Err(e) = tokio::spawn(async move { handler.handle(event).await }).await {
            error!("Turn for {} aborted: {}", key, e);
        }

        let mut guard = queues.lock().unwrap_or_else(PoisonError::into_inner);
        next = guard.get_mut(&key).and_then(VecDeque::pop_front);
        if next.is_none() {
            guard.remove(&key);
        }
    }
    debug!("Queue for {} drained", key);
}
