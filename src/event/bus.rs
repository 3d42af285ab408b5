//! Broadcast bus for [`NodeEvent`]s.
//!
//! Publishing never blocks. Subscribers only observe events sent after they
//! subscribe; a subscriber that falls more than the channel capacity behind
//! skips the oldest events. Dropping an [`EventStream`] ends the subscription.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::NodeEvent;

/// Default number of buffered events per bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody is subscribed.
    pub fn publish(&self, event: NodeEvent) {
        tracing::debug!(event = event.name(), "Publishing node event");
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A live subscription to an [`EventBus`].
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<NodeEvent>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<NodeEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Adapt into a [`Stream`], skipping lag notifications.
    pub fn into_stream(self) -> impl Stream<Item = NodeEvent> {
        BroadcastStream::new(self.rx).filter_map(Result::ok)
    }
}
