//! Per-room poll loops.
//!
//! The [`ListenerManager`] owns one long-running poller per active room.
//! Each poll goes through the platform rate limiter, writes the fresh
//! [`RoomInfo`] into the cache, and publishes transitions against the
//! previous snapshot: `LiveStart`, `LiveEnd`, `RoomNameChanged`. A stopping
//! listener publishes `ListenStop` on the way out.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::InfoCache;
use crate::config::ConfigStore;
use crate::events::{Event, EventBus};
use crate::live::{LiveHandle, LiveId, RoomInfo};
use crate::ratelimit::PlatformRateLimiter;
use crate::{Error, Result};

struct ListenerEntry {
    live: LiveHandle,
    token: CancellationToken,
    join: JoinHandle<()>,
}

pub struct ListenerManager {
    listeners: DashMap<LiveId, ListenerEntry>,
    store: Arc<ConfigStore>,
    cache: Arc<InfoCache>,
    bus: EventBus,
    limiter: Arc<PlatformRateLimiter>,
    shutdown: CancellationToken,
}

impl ListenerManager {
    #[must_use]
    pub fn new(
        store: Arc<ConfigStore>,
        cache: Arc<InfoCache>,
        bus: EventBus,
        limiter: Arc<PlatformRateLimiter>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listeners: DashMap::new(),
            store,
            cache,
            bus,
            limiter,
            shutdown,
        }
    }

    /// Spawn a poller for a room. Fails if one is already running.
    pub fn add(&self, live: LiveHandle) -> Result<()> {
        let id = live.live_id();
        if self.listeners.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "listener for {id} already exists"
            )));
        }

        let token = self.shutdown.child_token();
        let join = tokio::spawn(poll_loop(
            live.clone(),
            self.store.clone(),
            self.cache.clone(),
            self.bus.clone(),
            self.limiter.clone(),
            token.clone(),
        ));
        self.listeners.insert(id.clone(), ListenerEntry { live, token, join });
        info!(live_id = %id, "listener started");
        Ok(())
    }

    /// Stop a room's poller and wait for it to unwind.
    pub async fn remove(&self, id: &LiveId) -> Result<()> {
        let Some((_, entry)) = self.listeners.remove(id) else {
            return Err(Error::NotFound(format!("listener for {id} doesn't exist")));
        };
        entry.token.cancel();
        if let Err(err) = entry.join.await {
            warn!(live_id = %id, error = %err, "listener task join failed");
        }
        info!(live_id = %id, "listener stopped");
        Ok(())
    }

    #[must_use]
    pub fn has(&self, id: &LiveId) -> bool {
        self.listeners.contains_key(id)
    }

    #[must_use]
    pub fn live(&self, id: &LiveId) -> Option<LiveHandle> {
        self.listeners.get(id).map(|e| e.live.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Stop every poller. Called once at shutdown.
    pub async fn close(&self) {
        let ids: Vec<LiveId> = self.listeners.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.remove(&id).await;
        }
    }
}

async fn poll_loop(
    live: LiveHandle,
    store: Arc<ConfigStore>,
    cache: Arc<InfoCache>,
    bus: EventBus,
    limiter: Arc<PlatformRateLimiter>,
    token: CancellationToken,
) {
    let id = live.live_id();
    let platform_key = live.platform_key().to_string();

    loop {
        if token.is_cancelled() {
            break;
        }

        tokio::select! {
            () = token.cancelled() => break,
            () = limiter.acquire(&platform_key) => {}
        }

        let interval = Duration::from_secs(
            store
                .snapshot()
                .effective_for_url(live.raw_url())
                .interval
                .max(1),
        );

        match live.get_info().await {
            Ok(info) => {
                let prev = cache.get(&id);
                cache.put(info.clone());
                publish_transitions(&bus, &live, prev.as_ref(), &info);
            }
            Err(err) => {
                warn!(live_id = %id, error = %err, "failed to poll room info");
            }
        }

        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    bus.publish(Event::ListenStop(live));
}

fn publish_transitions(
    bus: &EventBus,
    live: &LiveHandle,
    prev: Option<&RoomInfo>,
    info: &RoomInfo,
) {
    // No transitions until the driver has produced real data.
    if info.initializing {
        return;
    }
    let prev_status = prev.filter(|p| !p.initializing).map_or(false, |p| p.status);

    if !prev_status && info.status {
        info!(live_id = %info.live_id, room = %info.room_name, "live started");
        bus.publish(Event::LiveStart(live.clone()));
    } else if prev_status && !info.status {
        info!(live_id = %info.live_id, "live ended");
        bus.publish(Event::LiveEnd(live.clone()));
    } else if prev_status && info.status {
        if let Some(prev) = prev {
            if prev.room_name != info.room_name {
                info!(
                    live_id = %info.live_id,
                    from = %prev.room_name,
                    to = %info.room_name,
                    "room name changed"
                );
                bus.publish(Event::RoomNameChanged(live.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventKind;
    use crate::live::Live;
    use crate::test_support::MockLive;

    fn manager(bus: &EventBus) -> (ListenerManager, Arc<InfoCache>) {
        let limiter = Arc::new(PlatformRateLimiter::new());
        let store = Arc::new(ConfigStore::new(Config::new(), limiter.clone()));
        let cache = Arc::new(InfoCache::new());
        let manager = ListenerManager::new(
            store,
            cache.clone(),
            bus.clone(),
            limiter,
            CancellationToken::new(),
        );
        (manager, cache)
    }

    async fn next_kind(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> EventKind {
        rx.recv().await.unwrap().kind()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_sequence() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let (manager, cache) = manager(&bus);

        let mock = MockLive::new("https://live.example.com/1");
        for _ in 0..3 {
            mock.push_info(false, "A");
        }
        mock.push_info(true, "A");
        mock.push_info(true, "B");
        mock.push_info(false, "B");
        let id = mock.live_id();

        manager.add(Arc::new(mock)).unwrap();

        // Paused time: sleeps auto-advance, the script drains quickly.
        assert_eq!(next_kind(&mut rx).await, EventKind::LiveStart);
        assert_eq!(next_kind(&mut rx).await, EventKind::RoomNameChanged);
        assert_eq!(next_kind(&mut rx).await, EventKind::LiveEnd);

        manager.remove(&id).await.unwrap();
        assert_eq!(next_kind(&mut rx).await, EventKind::ListenStop);

        // The cache holds the last poll.
        let info = cache.get(&id).unwrap();
        assert!(!info.status);
        assert_eq!(info.room_name, "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initializing_suppresses_transitions() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let (manager, _cache) = manager(&bus);

        let mock = MockLive::new("https://live.example.com/2");
        mock.push_info_error("not ready");
        mock.push_info(true, "A");
        let id = mock.live_id();
        let wrapped = crate::live::InitializingLive::new(Arc::new(mock));

        manager.add(Arc::new(wrapped)).unwrap();

        // The initializing poll emits nothing; the first real poll with
        // status=true emits LiveStart.
        assert_eq!(next_kind(&mut rx).await, EventKind::LiveStart);

        manager.remove(&id).await.unwrap();
        assert_eq!(next_kind(&mut rx).await, EventKind::ListenStop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_retries() {
        let bus = EventBus::default();
        let (manager, cache) = manager(&bus);

        let mock = Arc::new(MockLive::new("https://live.example.com/3"));
        mock.push_info_error("http 502");
        mock.push_info(false, "A");
        let id = mock.live_id();

        manager.add(mock.clone()).unwrap();

        // Wait until the second poll landed in the cache.
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if cache.get(&id).is_some() {
                break;
            }
        }
        assert!(cache.get(&id).is_some());
        assert!(mock.info_polls() >= 2);

        manager.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let bus = EventBus::default();
        let (manager, _cache) = manager(&bus);

        let mock = Arc::new(MockLive::new("https://live.example.com/4"));
        mock.push_info(false, "A");
        let id = mock.live_id();

        manager.add(mock.clone()).unwrap();
        assert!(matches!(
            manager.add(mock.clone()),
            Err(Error::AlreadyExists(_))
        ));
        manager.remove(&id).await.unwrap();
        assert!(!manager.has(&id));
    }
}
