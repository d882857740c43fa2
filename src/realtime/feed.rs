use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

const FEED_CAPACITY: usize = 256;

/// One message on the in-process event feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEvent {
    pub topic: String,
    pub payload: Value,
}

/// Fan-out of accepted push messages and raised alerts to SSE clients.
///
/// Slow subscribers lag and lose messages; nothing is replayed.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<FeedEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, topic: &str, payload: Value) {
        let event = FeedEvent {
            topic: topic.to_owned(),
            payload,
        };
        // No subscribers is not an error.
        if self.tx.send(event).is_err() {
            trace!(topic, "Event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }
}
