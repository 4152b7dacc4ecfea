//! Broadcast bus for arbiter events
//!
//! Publishing never blocks the arbitration loop and a bus nobody listens
//! to is not an error. Slow subscribers lose the oldest events rather than
//! holding the loop back.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::types::ArbiterEvent;

/// Backlog each subscriber may fall behind by before events are dropped
const DEFAULT_BACKLOG: usize = 256;

pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<ArbiterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BACKLOG)
    }

    pub fn with_capacity(backlog: usize) -> Self {
        let (sender, _) = broadcast::channel(backlog.max(1));
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    pub fn publish(&self, event: ArbiterEvent) {
        let kind = event.event_type();
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(kind, receivers, "Arbiter event");
    }

    /// Every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.sender.subscribe()
    }

    /// Only events accepted by `filter`.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver {
            inner: self.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects events by requester and/or kind. An empty filter accepts all.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    requester: Option<String>,
    kinds: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only events concerning `requester_id`.
    pub fn requester(mut self, requester_id: &str) -> Self {
        self.requester = Some(requester_id.to_string());
        self
    }

    /// Only these kinds, as named by [`ArbiterEvent::event_type`].
    pub fn types(mut self, kinds: Vec<&str>) -> Self {
        self.kinds = Some(kinds.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &ArbiterEvent) -> bool {
        let requester_ok = self
            .requester
            .as_deref()
            .map_or(true, |wanted| event.requester_id() == Some(wanted));
        let kind_ok = self
            .kinds
            .as_ref()
            .map_or(true, |kinds| kinds.iter().any(|k| k == event.event_type()));
        requester_ok && kind_ok
    }
}

/// Receiver that skips non-matching events and rides over lag.
pub struct FilteredReceiver {
    inner: broadcast::Receiver<ArbiterEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Next matching event. Errors only once the bus is gone.
    pub async fn recv(&mut self) -> Result<ArbiterEvent, RecvError> {
        loop {
            match self.inner.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber fell behind; oldest events dropped")
                }
                Err(closed) => return Err(closed),
            }
        }
    }
}
