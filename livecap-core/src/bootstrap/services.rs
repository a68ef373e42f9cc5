//! Service initialization and dependency wiring.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::InfoCache;
use crate::config::{Config, ConfigStore};
use crate::events::EventBus;
use crate::listener::ListenerManager;
use crate::live::{DriverRegistry, InitializingLive, LiveHandle, LiveId, Options};
use crate::parser::ParserResolver;
use crate::ratelimit::PlatformRateLimiter;
use crate::recorder::RecorderManager;
use crate::task::{
    ConvertMp4Executor, FixFlvExecutor, QueueConfig, QueueManager, TaskStore,
    TASK_TYPE_CONVERT_MP4, TASK_TYPE_FIX_FLV,
};
use crate::{Error, Result};

/// Everything the HTTP surface and the binary need, wired together.
pub struct Services {
    pub store: Arc<ConfigStore>,
    pub bus: EventBus,
    pub cache: Arc<InfoCache>,
    pub limiter: Arc<PlatformRateLimiter>,
    pub registry: Arc<DriverRegistry>,
    pub queue: Arc<QueueManager>,
    pub listener_manager: Arc<ListenerManager>,
    pub recorder_manager: Arc<RecorderManager>,
    pub shutdown: CancellationToken,
}

/// Construct and start all core services.
pub async fn init_services(
    config: Config,
    registry: Arc<DriverRegistry>,
    resolver: Arc<ParserResolver>,
    shutdown: CancellationToken,
) -> Result<Arc<Services>> {
    let ffmpeg_path = (!config.ffmpeg_path.is_empty()).then(|| config.ffmpeg_path.clone());
    let delete_original_default = config.on_record_finished.delete_flv_after_convert;
    let db_path = config.app_data_dir().join("tasks.db");

    let limiter = Arc::new(PlatformRateLimiter::new());
    let store = Arc::new(ConfigStore::new(config, limiter.clone()));
    let bus = EventBus::default();
    let cache = Arc::new(InfoCache::new());

    let task_store = TaskStore::open(&db_path).await?;
    let queue = QueueManager::new(
        task_store,
        QueueConfig::default(),
        bus.clone(),
        shutdown.child_token(),
    );
    queue.register_executor(
        TASK_TYPE_FIX_FLV,
        Arc::new(FixFlvExecutor::new(
            std::env::var("LIVECAP_DOTNET").ok(),
            std::env::var("LIVECAP_FLV_FIX_TOOL").ok(),
        )),
    );
    queue.register_executor(
        TASK_TYPE_CONVERT_MP4,
        Arc::new(ConvertMp4Executor::new(
            ffmpeg_path,
            delete_original_default,
        )),
    );
    queue.start().await?;

    let listener_manager = Arc::new(ListenerManager::new(
        store.clone(),
        cache.clone(),
        bus.clone(),
        limiter.clone(),
        shutdown.child_token(),
    ));
    let recorder_manager = Arc::new(RecorderManager::new(
        store.clone(),
        cache.clone(),
        bus.clone(),
        resolver,
        Some(queue.clone()),
        shutdown.child_token(),
    ));
    recorder_manager.start();

    let services = Arc::new(Services {
        store,
        bus,
        cache,
        limiter,
        registry,
        queue,
        listener_manager,
        recorder_manager,
        shutdown,
    });

    // Bring up a listener for every room marked as listening.
    let rooms: Vec<String> = services
        .store
        .snapshot()
        .live_rooms
        .iter()
        .filter(|room| room.is_listening)
        .map(|room| room.url.clone())
        .collect();
    for url in rooms {
        if let Err(err) = services.start_listening(&url) {
            warn!(url = %url, error = %err, "failed to start listening");
        }
    }

    info!(
        rooms = services.listener_manager.len(),
        "core services initialized"
    );
    Ok(services)
}

impl Services {
    /// Build a driver for a configured room and start its listener.
    pub fn start_listening(&self, url: &str) -> Result<LiveId> {
        let snapshot = self.store.snapshot();
        let room = snapshot
            .room_by_url(url)
            .ok_or_else(|| Error::NotFound(format!("room {url} doesn't exist")))?;

        let mut options = Options {
            quality: room.quality,
            audio_only: room.audio_only,
            nickname: room.nick_name.clone(),
            ..Default::default()
        };
        if let Ok(parsed) = url.parse::<reqwest::Url>() {
            if let Some(host) = parsed.host_str() {
                if let Some(cookie) = snapshot.cookies.get(host) {
                    options
                        .cookies
                        .insert(host.to_string(), cookie.clone());
                }
            }
        }

        let inner = self.registry.create(url, options)?;
        let live: LiveHandle = Arc::new(InitializingLive::new(inner));
        let id = live.live_id();
        self.listener_manager.add(live)?;
        Ok(id)
    }

    /// Stop a room's listener; the recorder manager reacts to `ListenStop`.
    pub async fn stop_listening(&self, id: &LiveId) -> Result<()> {
        self.listener_manager.remove(id).await
    }

    /// Orderly shutdown: listeners, recorders, then the queue.
    pub async fn close(&self) {
        self.listener_manager.close().await;
        self.recorder_manager.close().await;
        self.queue.close().await;
        self.shutdown.cancel();
    }
}
