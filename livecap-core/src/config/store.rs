use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;

use crate::live::LiveId;
use crate::ratelimit::PlatformRateLimiter;
use crate::{Error, Result};

use super::comments::render_with_comments;
use super::model::{Config, LiveRoom};

/// Versioned, copy-on-write configuration store.
///
/// Readers take an O(1) snapshot and never lock against writers. All
/// mutations are serialized through a single writer lock: the mutator runs
/// on a deep copy, the version is bumped, the YAML file is written (when
/// persisting), and only then is the new snapshot atomically published.
/// Any mutator or persistence error leaves the published snapshot unchanged.
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
    update_lock: Mutex<()>,
    rate_limiter: Arc<PlatformRateLimiter>,
}

impl ConfigStore {
    pub fn new(mut config: Config, rate_limiter: Arc<PlatformRateLimiter>) -> Self {
        config.refresh_room_index();
        rate_limiter.sync_limits(&config.platform_rate_limits());
        Self {
            current: RwLock::new(Arc::new(config)),
            update_lock: Mutex::new(()),
            rate_limiter,
        }
    }

    /// The current immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Mutate a copy of the snapshot and publish it, persisting to file.
    pub fn update<F>(&self, mutator: F) -> Result<Arc<Config>>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        self.update_impl(mutator, true)
    }

    /// Like [`Self::update`] but memory-only: transient fields such as
    /// derived live ids don't deserve a file write.
    pub fn update_transient<F>(&self, mutator: F) -> Result<Arc<Config>>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        self.update_impl(mutator, false)
    }

    fn update_impl<F>(&self, mutator: F, persist: bool) -> Result<Arc<Config>>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let _guard = self.update_lock.lock();
        let old = self.snapshot();
        self.commit(&old, old.version, mutator, persist)
    }

    /// Compare-and-swap update: fails with [`Error::VersionConflict`] when
    /// the current version differs from `expected_version`. Persists.
    pub fn update_cas<F>(&self, expected_version: u64, mutator: F) -> Result<Arc<Config>>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        self.update_cas_impl(expected_version, mutator, true)
    }

    fn update_cas_impl<F>(
        &self,
        expected_version: u64,
        mutator: F,
        persist: bool,
    ) -> Result<Arc<Config>>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let _guard = self.update_lock.lock();
        let old = self.snapshot();
        if old.version != expected_version {
            return Err(Error::VersionConflict);
        }
        self.commit(&old, expected_version, mutator, persist)
    }

    fn commit<F>(
        &self,
        old: &Arc<Config>,
        base_version: u64,
        mutator: F,
        persist: bool,
    ) -> Result<Arc<Config>>
    where
        F: FnOnce(&mut Config) -> Result<()>,
    {
        let mut next = (**old).clone();
        mutator(&mut next)?;
        next.refresh_room_index();
        next.version = base_version + 1;

        if persist {
            if let Some(file) = next.file.clone() {
                let rendered = render_with_comments(&next)?;
                std::fs::write(&file, rendered).map_err(|e| {
                    Error::Internal(format!("failed to save config to {}: {e}", file.display()))
                })?;
            }
        }

        let published = Arc::new(next);
        *self.current.write() = published.clone();
        self.rate_limiter.sync_limits(&published.platform_rate_limits());
        Ok(published)
    }

    /// Snapshot → CAS loop. `backoff` is the base delay between conflicts;
    /// the actual delay grows exponentially with jitter.
    pub async fn update_with_retry<F>(
        &self,
        mutator: F,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<Arc<Config>>
    where
        F: Fn(&mut Config) -> Result<()>,
    {
        self.update_with_retry_impl(&mutator, max_retries, backoff, true)
            .await
    }

    pub async fn update_with_retry_transient<F>(
        &self,
        mutator: F,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<Arc<Config>>
    where
        F: Fn(&mut Config) -> Result<()>,
    {
        self.update_with_retry_impl(&mutator, max_retries, backoff, false)
            .await
    }

    async fn update_with_retry_impl<F>(
        &self,
        mutator: &F,
        max_retries: u32,
        backoff: Duration,
        persist: bool,
    ) -> Result<Arc<Config>>
    where
        F: Fn(&mut Config) -> Result<()>,
    {
        let mut attempt: u32 = 0;
        loop {
            let version = self.snapshot().version;
            match self.update_cas_impl(version, mutator, persist) {
                Ok(config) => return Ok(config),
                Err(Error::VersionConflict) if attempt < max_retries => {
                    // Exponential backoff with jitter: base * 2^attempt + random(0..base)
                    let base_ms = (backoff.as_millis() as u64).max(1);
                    let delay = base_ms * (1 << attempt.min(10))
                        + rand::rng().random_range(0..base_ms);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Persist the current snapshot as-is (used for self-heal after load).
    pub fn save(&self) -> Result<()> {
        let snapshot = self.snapshot();
        if let Some(file) = &snapshot.file {
            let rendered = render_with_comments(&snapshot)?;
            std::fs::write(file, rendered).map_err(|e| {
                Error::Internal(format!("failed to save config to {}: {e}", file.display()))
            })?;
        }
        Ok(())
    }

    // Convenience mutators, all retrying on version conflicts.

    pub async fn set_debug(&self, debug: bool) -> Result<Arc<Config>> {
        self.update_with_retry(
            |c| {
                c.debug = debug;
                Ok(())
            },
            3,
            Duration::from_millis(10),
        )
        .await
    }

    pub async fn set_cookie(&self, host: &str, cookie: &str) -> Result<Arc<Config>> {
        self.update_with_retry(
            |c| {
                c.cookies.insert(host.to_string(), cookie.to_string());
                Ok(())
            },
            3,
            Duration::from_millis(10),
        )
        .await
    }

    pub async fn append_live_room(&self, room: LiveRoom) -> Result<Arc<Config>> {
        self.update_with_retry(
            |c| {
                if c.room_by_url(&room.url).is_some() {
                    return Err(Error::AlreadyExists(format!(
                        "room {} is already configured",
                        room.url
                    )));
                }
                c.live_rooms.push(room.clone());
                Ok(())
            },
            3,
            Duration::from_millis(10),
        )
        .await
    }

    pub async fn remove_live_room_by_url(&self, url: &str) -> Result<Arc<Config>> {
        self.update_with_retry(
            |c| c.remove_room_by_url(url),
            3,
            Duration::from_millis(10),
        )
        .await
    }

    pub async fn set_live_room_listening(
        &self,
        url: &str,
        listening: bool,
    ) -> Result<Arc<Config>> {
        self.update_with_retry(
            |c| {
                if let Some(room) = c.room_by_url_mut(url) {
                    room.is_listening = listening;
                }
                Ok(())
            },
            3,
            Duration::from_millis(10),
        )
        .await
    }

    #[must_use]
    pub fn room_url_by_live_id(&self, id: &LiveId) -> Option<String> {
        self.snapshot()
            .room_by_live_id(id)
            .map(|room| room.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigStore {
        ConfigStore::new(Config::new(), Arc::new(PlatformRateLimiter::new()))
    }

    #[test]
    fn test_version_increments_on_success() {
        let store = store();
        let before = store.snapshot().version;

        let after = store
            .update_transient(|c| {
                c.debug = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(after.version, before + 1);
        assert!(store.snapshot().debug);
    }

    #[test]
    fn test_mutator_error_leaves_snapshot_unchanged() {
        let store = store();
        let before = store.snapshot();

        let err = store
            .update_transient(|c| {
                c.debug = true;
                Err(Error::InvalidInput("nope".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let after = store.snapshot();
        assert_eq!(after.version, before.version);
        assert!(!after.debug);
    }

    #[test]
    fn test_cas_conflict() {
        let store = store();
        let v = store.snapshot().version;

        // Client B wins the race.
        store
            .update_cas_impl(
                v,
                |c| {
                    c.interval = 10;
                    Ok(())
                },
                false,
            )
            .unwrap();

        // Client A commits against the stale version.
        let err = store
            .update_cas_impl(
                v,
                |c| {
                    c.interval = 99;
                    Ok(())
                },
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict));

        let current = store.snapshot();
        assert_eq!(current.version, v + 1);
        assert_eq!(current.interval, 10);
    }

    #[tokio::test]
    async fn test_update_with_retry_survives_conflicts() {
        let store = Arc::new(store());

        let mut handles = Vec::new();
        for i in 0..8_u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_with_retry_transient(
                        move |c| {
                            c.cookies.insert(format!("host{i}"), "x".to_string());
                            Ok(())
                        },
                        10,
                        Duration::from_millis(1),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.cookies.len(), 8);
        assert_eq!(snapshot.version, 8);
    }

    #[test]
    fn test_persistence_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = Config::new();
        config.file = Some(path.clone());
        let store = ConfigStore::new(config, Arc::new(PlatformRateLimiter::new()));

        store
            .update(|c| {
                c.interval = 12;
                Ok(())
            })
            .unwrap();

        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.interval, 12);
    }

    #[test]
    fn test_append_room_updates_index() {
        let store = store();
        store
            .update_transient(|c| {
                c.live_rooms
                    .push(LiveRoom::from_url("https://live.bilibili.com/42"));
                Ok(())
            })
            .unwrap();
        let snapshot = store.snapshot();
        let room = snapshot.room_by_url("https://live.bilibili.com/42").unwrap();
        assert!(room.live_id.is_some());
    }

    #[test]
    fn test_publish_syncs_rate_limits() {
        let limiter = Arc::new(PlatformRateLimiter::new());
        let store = ConfigStore::new(Config::new(), limiter.clone());

        store
            .update_transient(|c| {
                c.platform_configs.insert(
                    "bilibili".to_string(),
                    crate::config::PlatformConfig {
                        name: "Bilibili".to_string(),
                        min_access_interval_sec: 4,
                        overrides: Default::default(),
                    },
                );
                Ok(())
            })
            .unwrap();
        assert_eq!(limiter.platform_limits()["bilibili"], 4);

        store
            .update_transient(|c| {
                c.platform_configs.remove("bilibili");
                Ok(())
            })
            .unwrap();
        assert!(limiter.platform_limits().is_empty());
    }
}
