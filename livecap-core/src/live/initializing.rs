use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::Result;

use super::{Live, LiveHandle, LiveId, Options, RoomInfo, StreamUrlInfo};

/// Wraps a freshly created driver until its first successful poll.
///
/// While the inner driver keeps failing (site unreachable, room not yet
/// resolvable) `get_info` answers with an `initializing` placeholder instead
/// of an error, so listeners keep polling without emitting transitions.
/// After the first success the wrapper permanently delegates.
pub struct InitializingLive {
    inner: LiveHandle,
    finished: AtomicBool,
}

impl InitializingLive {
    #[must_use]
    pub fn new(inner: LiveHandle) -> Self {
        Self {
            inner,
            finished: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Live for InitializingLive {
    fn live_id(&self) -> LiveId {
        self.inner.live_id()
    }

    fn raw_url(&self) -> &str {
        self.inner.raw_url()
    }

    fn platform_key(&self) -> &str {
        self.inner.platform_key()
    }

    fn platform_name(&self) -> &str {
        self.inner.platform_name()
    }

    fn options(&self) -> &Options {
        self.inner.options()
    }

    async fn get_info(&self) -> Result<RoomInfo> {
        if self.finished.load(Ordering::Acquire) {
            return self.inner.get_info().await;
        }
        match self.inner.get_info().await {
            Ok(info) => {
                self.finished.store(true, Ordering::Release);
                Ok(info)
            }
            Err(err) => {
                tracing::debug!(
                    live_id = %self.live_id(),
                    error = %err,
                    "room still initializing"
                );
                Ok(RoomInfo::initializing(self.live_id(), self.raw_url()))
            }
        }
    }

    async fn get_stream_infos(&self) -> Result<Vec<StreamUrlInfo>> {
        self.inner.get_stream_infos().await
    }
}
