use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cache::InfoCache;
use crate::config::ConfigStore;
use crate::events::{Event, EventBus};
use crate::live::{LiveHandle, LiveId};
use crate::parser::ParserResolver;
use crate::task::QueueManager;
use crate::{Error, Result};

use super::Recorder;

/// Receives every recorder's status snapshot; the SSE hub installs itself
/// here.
pub type StatusSink = Box<dyn Fn(&LiveId, &HashMap<String, String>) + Send + Sync>;

const STATUS_BROADCAST_INTERVAL: Duration = Duration::from_secs(3);
const ROTATION_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Owns one [`Recorder`] per live stream, driven by bus events:
/// `LiveStart` creates, `LiveEnd`/`ListenStop` removes, `RoomNameChanged`
/// restarts when split-on-title-change is enabled. A background poller
/// rotates recordings past the configured `max_duration`.
pub struct RecorderManager {
    inner: Arc<Inner>,
}

struct Inner {
    recorders: DashMap<LiveId, Arc<Recorder>>,
    store: Arc<ConfigStore>,
    cache: Arc<InfoCache>,
    bus: EventBus,
    resolver: Arc<ParserResolver>,
    queue: Option<Arc<QueueManager>>,
    status_sink: RwLock<Option<StatusSink>>,
    shutdown: CancellationToken,
}

impl RecorderManager {
    #[must_use]
    pub fn new(
        store: Arc<ConfigStore>,
        cache: Arc<InfoCache>,
        bus: EventBus,
        resolver: Arc<ParserResolver>,
        queue: Option<Arc<QueueManager>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                recorders: DashMap::new(),
                store,
                cache,
                bus,
                resolver,
                queue,
                status_sink: RwLock::new(None),
                shutdown,
            }),
        }
    }

    /// Install the status broadcast sink. Replaces any previous sink.
    pub fn set_status_sink(&self, sink: StatusSink) {
        *self.inner.status_sink.write() = Some(sink);
    }

    /// Subscribe to the bus and start the background pollers.
    pub fn start(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.event_loop().await });

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.status_broadcast_loop().await });

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.rotation_loop().await });
    }

    pub async fn add_recorder(&self, live: LiveHandle) -> Result<()> {
        self.inner.add_recorder(live).await
    }

    pub async fn remove_recorder(&self, id: &LiveId) -> Result<()> {
        self.inner.remove_recorder(id).await
    }

    pub async fn restart_recorder(&self, live: LiveHandle) -> Result<()> {
        self.inner.restart_recorder(live).await
    }

    #[must_use]
    pub fn has_recorder(&self, id: &LiveId) -> bool {
        self.inner.recorders.contains_key(id)
    }

    #[must_use]
    pub fn recorder_status(&self, id: &LiveId) -> Option<HashMap<String, String>> {
        self.inner.recorders.get(id).map(|r| r.get_status())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.recorders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.recorders.is_empty()
    }

    /// Close every recorder. Called once at shutdown.
    pub async fn close(&self) {
        let ids: Vec<LiveId> = self
            .inner
            .recorders
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            let _ = self.inner.remove_recorder(&id).await;
        }
    }
}

impl Inner {
    async fn event_loop(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        loop {
            let event = tokio::select! {
                () = self.shutdown.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(Event::LiveStart(live)) => {
                    if let Err(err) = self.add_recorder(live.clone()).await {
                        if !matches!(err, Error::AlreadyExists(_)) {
                            error!(live_id = %live.live_id(), error = %err, "failed to add recorder");
                        }
                    }
                }
                Ok(Event::LiveEnd(live) | Event::ListenStop(live)) => {
                    let id = live.live_id();
                    if self.recorders.contains_key(&id) {
                        if let Err(err) = self.remove_recorder(&id).await {
                            error!(live_id = %id, error = %err, "failed to remove recorder");
                        }
                    }
                }
                Ok(Event::RoomNameChanged(live)) => {
                    let id = live.live_id();
                    if !self.recorders.contains_key(&id) {
                        continue;
                    }
                    let split = self
                        .store
                        .snapshot()
                        .effective_for_url(live.raw_url())
                        .video_split_strategies
                        .on_room_name_changed;
                    if split {
                        if let Err(err) = self.restart_recorder(live.clone()).await {
                            error!(live_id = %id, error = %err, "failed to restart recorder");
                        }
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "recorder manager lagged behind the event bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn add_recorder(self: &Arc<Self>, live: LiveHandle) -> Result<()> {
        let id = live.live_id();
        if self.recorders.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "recorder for {id} already exists"
            )));
        }
        let recorder = Recorder::new(
            live,
            self.bus.clone(),
            self.cache.clone(),
            self.store.clone(),
            self.resolver.clone(),
            self.queue.clone(),
        );
        self.recorders.insert(id.clone(), recorder.clone());
        recorder.start();

        // Supervise the loop task: a panicking driver must not leave a
        // zombie entry behind; it tears down only its own recorder.
        let join = recorder.take_join();
        let inner = self.clone();
        tokio::spawn(async move {
            if let Some(join) = join {
                if let Err(err) = join.await {
                    error!(live_id = %id, error = %err, "recorder task panicked");
                    inner
                        .recorders
                        .remove_if(&id, |_, entry| Arc::ptr_eq(entry, &recorder));
                    recorder.close().await;
                }
            }
            recorder.mark_finished();
        });
        Ok(())
    }

    async fn remove_recorder(&self, id: &LiveId) -> Result<()> {
        let Some((_, recorder)) = self.recorders.remove(id) else {
            return Err(Error::NotFound(format!("recorder for {id} doesn't exist")));
        };
        recorder.close().await;
        // The supervisor owns the join handle; wait for the loop to unwind.
        recorder.wait_finished().await;
        Ok(())
    }

    async fn restart_recorder(self: &Arc<Self>, live: LiveHandle) -> Result<()> {
        self.remove_recorder(&live.live_id()).await?;
        self.add_recorder(live).await
    }

    async fn status_broadcast_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(STATUS_BROADCAST_INTERVAL);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let sink = self.status_sink.read();
            let Some(sink) = sink.as_ref() else {
                continue;
            };
            for entry in &self.recorders {
                let status = entry.value().get_status();
                if !status.is_empty() {
                    sink(entry.key(), &status);
                }
            }
        }
    }

    async fn rotation_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(ROTATION_POLL_INTERVAL);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let due: Vec<LiveHandle> = self
                .recorders
                .iter()
                .filter_map(|entry| {
                    let recorder = entry.value();
                    let max_duration = self
                        .store
                        .snapshot()
                        .effective_for_url(recorder.live().raw_url())
                        .video_split_strategies
                        .max_duration;
                    if max_duration == 0 {
                        return None;
                    }
                    let max_duration = Duration::from_secs(max_duration.max(60));
                    (recorder.start_time().elapsed() > max_duration)
                        .then(|| recorder.live().clone())
                })
                .collect();

            for live in due {
                debug!(live_id = %live.live_id(), "max duration reached, rotating recording");
                if let Err(err) = self.restart_recorder(live.clone()).await {
                    error!(live_id = %live.live_id(), error = %err, "failed to rotate recording");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::EventKind;
    use crate::parser::{ParserHandle, ParserKind};
    use crate::ratelimit::PlatformRateLimiter;
    use crate::test_support::{MockLive, MockParser};
    use crate::live::{Live, StreamUrlInfo};

    fn resolver_with_holding_parser() -> Arc<ParserResolver> {
        let mut resolver = ParserResolver::new();
        resolver.register(
            ParserKind::Ffmpeg,
            || true,
            |_cfg| {
                Ok(Arc::new(MockParser::holding("ffmpeg", b"payload".to_vec())) as ParserHandle)
            },
        );
        Arc::new(resolver)
    }

    fn manager_fixture(out_dir: &std::path::Path) -> (RecorderManager, EventBus) {
        let bus = EventBus::default();
        let limiter = Arc::new(PlatformRateLimiter::new());
        let mut config = Config::new();
        config.out_put_path = out_dir.to_string_lossy().into_owned();
        let store = Arc::new(ConfigStore::new(config, limiter));
        let cache = Arc::new(InfoCache::new());
        let manager = RecorderManager::new(
            store,
            cache,
            bus.clone(),
            resolver_with_holding_parser(),
            None,
            CancellationToken::new(),
        );
        (manager, bus)
    }

    fn flv_live(url: &str) -> Arc<MockLive> {
        let live = Arc::new(MockLive::new(url));
        live.set_streams(vec![StreamUrlInfo {
            url: "https://cdn.example.com/stream.flv".to_string(),
            format: "flv".to_string(),
            ..Default::default()
        }]);
        live
    }

    #[tokio::test]
    async fn test_live_start_creates_recorder_and_live_end_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, bus) = manager_fixture(dir.path());
        manager.start();
        let mut rx = bus.subscribe();

        let live = flv_live("https://live.example.com/1");
        let id = live.live_id();
        bus.publish(Event::LiveStart(live.clone()));

        // RecorderStart confirms the manager picked the event up.
        loop {
            let event = rx.recv().await.unwrap();
            if event.kind() == EventKind::RecorderStart {
                break;
            }
        }
        assert!(manager.has_recorder(&id));

        bus.publish(Event::LiveEnd(live.clone()));
        loop {
            let event = rx.recv().await.unwrap();
            if event.kind() == EventKind::RecorderStop {
                break;
            }
        }
        // The event loop removes asynchronously; wait for it to settle.
        for _ in 0..50 {
            if !manager.has_recorder(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!manager.has_recorder(&id));
    }

    struct PanickingLive {
        id: crate::live::LiveId,
        url: String,
        options: crate::live::Options,
    }

    impl PanickingLive {
        fn new(url: &str) -> Self {
            Self {
                id: crate::live::LiveId::from_string(url),
                url: url.to_string(),
                options: crate::live::Options::default(),
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::live::Live for PanickingLive {
        fn live_id(&self) -> crate::live::LiveId {
            self.id.clone()
        }

        fn raw_url(&self) -> &str {
            &self.url
        }

        fn platform_key(&self) -> &str {
            "mock"
        }

        fn platform_name(&self) -> &str {
            "Mock"
        }

        fn options(&self) -> &crate::live::Options {
            &self.options
        }

        async fn get_info(&self) -> crate::Result<crate::live::RoomInfo> {
            Ok(crate::live::RoomInfo::initializing(
                self.id.clone(),
                &self.url,
            ))
        }

        async fn get_stream_infos(&self) -> crate::Result<Vec<StreamUrlInfo>> {
            panic!("driver bug");
        }
    }

    #[tokio::test]
    async fn test_panicking_driver_tears_down_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, bus) = manager_fixture(dir.path());
        let mut rx = bus.subscribe();

        let live = Arc::new(PanickingLive::new("https://live.example.com/9"));
        let id = live.live_id();
        manager.add_recorder(live).await.unwrap();

        // The supervisor observes the panic, closes the recorder, and the
        // RecorderStop event goes out.
        loop {
            let event = rx.recv().await.unwrap();
            if event.kind() == EventKind::RecorderStop {
                break;
            }
        }
        for _ in 0..50 {
            if !manager.has_recorder(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!manager.has_recorder(&id));
    }

    #[tokio::test]
    async fn test_direct_add_remove() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _bus) = manager_fixture(dir.path());

        let live = flv_live("https://live.example.com/2");
        let id = live.live_id();
        manager.add_recorder(live.clone()).await.unwrap();
        assert!(manager.has_recorder(&id));
        assert!(matches!(
            manager.add_recorder(live.clone()).await,
            Err(Error::AlreadyExists(_))
        ));

        // The holding parser reports status once running.
        for _ in 0..50 {
            if manager
                .recorder_status(&id)
                .is_some_and(|s| s.contains_key("parser"))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        manager.remove_recorder(&id).await.unwrap();
        assert!(!manager.has_recorder(&id));
        assert!(matches!(
            manager.remove_recorder(&id).await,
            Err(Error::NotFound(_))
        ));
    }
}
