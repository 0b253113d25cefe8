//! Event bus for state notifications
//!
//! State transitions, capture results and stream session ends are broadcast
//! to any number of subscribers (the `/events` endpoint, tests).

pub mod types;

pub use types::{SessionOutcome, SystemEvent};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for [`SystemEvent`]s
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: SystemEvent) {
        tracing::trace!(event = event.event_name(), "Publishing event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    ///
    /// A subscriber that falls more than the channel capacity behind receives
    /// `Lagged` and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
