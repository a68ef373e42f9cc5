//! Server-Sent-Events fan-out.
//!
//! The hub subscribes to the event bus and to the recorder manager's
//! 3-second status snapshot, and pushes `{event_type, payload, timestamp}`
//! records to connected clients. Dispatch is list-size adaptive: above the
//! configured `sse_list_threshold`, room-scoped events are delivered only
//! to clients subscribed to that room's detail channel.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use livecap_core::bootstrap::Services;
use livecap_core::events::Event;
use livecap_core::live::LiveId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SseMessage {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SseMessage {
    fn new(event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

struct Client {
    tx: mpsc::UnboundedSender<SseMessage>,
    /// Detail-channel subscription; `None` receives list-level events.
    room: Option<LiveId>,
}

pub struct SseHub {
    services: Arc<Services>,
    clients: DashMap<u64, Client>,
    next_id: AtomicU64,
}

impl SseHub {
    #[must_use]
    pub fn new(services: Arc<Services>) -> Arc<Self> {
        Arc::new(Self {
            services,
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribe to the bus and install the recorder status sink.
    pub fn start(self: &Arc<Self>) {
        let hub = self.clone();
        let mut rx = self.services.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = hub.services.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => hub.handle_event(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "sse hub lagged behind the event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        let hub = self.clone();
        self.services
            .recorder_manager
            .set_status_sink(Box::new(move |live_id, status| {
                hub.broadcast_recorder_status(live_id, status);
            }));
    }

    /// Register a client connection, optionally scoped to one room.
    pub fn subscribe(&self, room: Option<LiveId>) -> (u64, mpsc::UnboundedReceiver<SseMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(id, Client { tx, room });
        debug!(client = id, "sse client connected");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.clients.remove(&id).is_some() {
            debug!(client = id, "sse client disconnected");
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Tear down all connections; called before server shutdown proceeds.
    pub fn close(&self) {
        self.clients.clear();
    }

    fn handle_event(&self, event: &Event) {
        let kind = event.kind().as_str();
        match event {
            Event::TaskUpdate(task) => {
                let payload = serde_json::to_value(task).unwrap_or_default();
                self.dispatch(SseMessage::new(kind, payload), None);
            }
            _ => {
                let Some(live) = event.live() else { return };
                let id = live.live_id();
                let payload = self
                    .services
                    .cache
                    .get(&id)
                    .and_then(|info| serde_json::to_value(info).ok())
                    .unwrap_or_else(|| {
                        serde_json::json!({
                            "live_id": id.to_string(),
                            "url": live.raw_url(),
                        })
                    });
                self.dispatch(SseMessage::new(kind, payload), Some(&id));
            }
        }
    }

    fn broadcast_recorder_status(&self, live_id: &LiveId, status: &HashMap<String, String>) {
        let payload = serde_json::json!({
            "live_id": live_id.to_string(),
            "status": status,
        });
        self.dispatch(SseMessage::new("RecorderStatus", payload), Some(live_id));
    }

    /// Deliver a message, applying the adaptive list/detail policy.
    fn dispatch(&self, message: SseMessage, room: Option<&LiveId>) {
        let list_suppressed = match room {
            Some(_) => {
                let threshold = self
                    .services
                    .store
                    .snapshot()
                    .rpc
                    .sse_list_threshold;
                self.services.listener_manager.len() > threshold
            }
            None => false,
        };

        let mut dead = Vec::new();
        for entry in &self.clients {
            let client = entry.value();
            let deliver = match (room, &client.room) {
                // Room-scoped event to a detail subscriber of that room.
                (Some(event_room), Some(client_room)) => event_room == client_room,
                // Room-scoped event to a list client: only below threshold.
                (Some(_), None) => !list_suppressed,
                // Global event goes everywhere.
                (None, _) => true,
            };
            if deliver && client.tx.send(message.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.unsubscribe(id);
        }
    }
}

/// Build the axum SSE response for one client.
pub fn sse_response(
    hub: &Arc<SseHub>,
    room: Option<LiveId>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (id, rx) = hub.subscribe(room);
    let hub = hub.clone();
    let stream = UnboundedReceiverStream::new(rx).map(move |message| {
        // Keep the hub handle alive for the lifetime of the stream; dead
        // clients are reaped on send failure.
        let _ = (&hub, id);
        let data = serde_json::to_string(&message).unwrap_or_else(|_| "{}".to_string());
        Ok(SseEvent::default().event(message.event_type).data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
