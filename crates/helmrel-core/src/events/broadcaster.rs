//! Event broadcaster for store change notifications.
//!
//! Stores publish every committed write here. It uses tokio's broadcast
//! channel, so any number of informers can follow the same store.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::StoreEvent;
use crate::release::ReleaseRecord;

/// Default buffer size for the broadcast channel.
/// Slow receivers beyond this limit observe a lag and must relist.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for store events.
///
/// Cheap to clone; every clone sends on the same channel.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new broadcaster wrapped in an Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, 0 if none.
    pub fn send(&self, event: StoreEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Send a "record written" event.
    pub fn send_put(&self, record: Arc<ReleaseRecord>) -> usize {
        self.send(StoreEvent::Put(record))
    }

    /// Send a "record deleted" event.
    pub fn send_deleted(&self, record: Arc<ReleaseRecord>) -> usize {
        self.send(StoreEvent::Deleted(record))
    }

    /// Subscribe to events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
