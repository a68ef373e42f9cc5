//! In-process typed publish/subscribe.
//!
//! Publishers fire and forget; each subscriber owns a broadcast receiver and
//! filters by [`EventKind`]. Events published by a single publisher are
//! observed in publication order; across publishers no ordering is promised.
//! Listeners must not block the receive loop.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::live::LiveHandle;
use crate::task::Task;

#[derive(Clone)]
pub enum Event {
    LiveStart(LiveHandle),
    LiveEnd(LiveHandle),
    ListenStop(LiveHandle),
    RoomNameChanged(LiveHandle),
    RecorderStart(LiveHandle),
    RecorderStop(LiveHandle),
    TaskUpdate(Task),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventKind {
    LiveStart,
    LiveEnd,
    ListenStop,
    RoomNameChanged,
    RecorderStart,
    RecorderStop,
    TaskUpdate,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LiveStart => "LiveStart",
            Self::LiveEnd => "LiveEnd",
            Self::ListenStop => "ListenStop",
            Self::RoomNameChanged => "RoomNameChanged",
            Self::RecorderStart => "RecorderStart",
            Self::RecorderStop => "RecorderStop",
            Self::TaskUpdate => "TaskUpdate",
        }
    }
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LiveStart(_) => EventKind::LiveStart,
            Self::LiveEnd(_) => EventKind::LiveEnd,
            Self::ListenStop(_) => EventKind::ListenStop,
            Self::RoomNameChanged(_) => EventKind::RoomNameChanged,
            Self::RecorderStart(_) => EventKind::RecorderStart,
            Self::RecorderStop(_) => EventKind::RecorderStop,
            Self::TaskUpdate(_) => EventKind::TaskUpdate,
        }
    }

    /// The driver handle carried by lifecycle events, if any.
    #[must_use]
    pub fn live(&self) -> Option<&LiveHandle> {
        match self {
            Self::LiveStart(l)
            | Self::LiveEnd(l)
            | Self::ListenStop(l)
            | Self::RoomNameChanged(l)
            | Self::RecorderStart(l)
            | Self::RecorderStop(l) => Some(l),
            Self::TaskUpdate(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A send with no live subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = kind.as_str(), "event dropped, no subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockLive;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let live: LiveHandle = Arc::new(MockLive::new("https://live.example.com/1"));

        bus.publish(Event::LiveStart(live.clone()));
        bus.publish(Event::LiveEnd(live));

        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::LiveStart);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::LiveEnd);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        let live: LiveHandle = Arc::new(MockLive::new("https://live.example.com/1"));
        // Must not panic or error.
        bus.publish(Event::ListenStop(live));
    }
}
