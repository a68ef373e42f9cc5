//! The platform driver capability.
//!
//! A [`Live`] is one watched room on one streaming platform. Drivers answer
//! `get_info` (is the room live, what is it called) and `get_stream_infos`
//! (playable stream variants). The core never knows platform specifics; it
//! creates drivers through the [`registry::DriverRegistry`] host table.

pub mod initializing;
pub mod registry;
pub mod selector;
pub mod stream;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Result;

pub use initializing::InitializingLive;
pub use registry::DriverRegistry;
pub use selector::StreamSelector;
pub use stream::{StreamPreference, StreamUrlInfo};

/// Stable identifier of a room, derived from the URL's host + path.
///
/// Never persisted to the config file; recomputed at load time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiveId(String);

impl LiveId {
    /// Derive an id from a parsed room URL (host + path, stable hash).
    #[must_use]
    pub fn from_url(url: &reqwest::Url) -> Self {
        Self::from_string(&format!("{}{}", url.host_str().unwrap_or(""), url.path()))
    }

    #[must_use]
    pub fn from_string(value: &str) -> Self {
        let digest = Sha256::digest(value.as_bytes());
        let mut hex = String::with_capacity(32);
        for b in &digest[..16] {
            hex.push_str(&format!("{b:02x}"));
        }
        Self(hex)
    }

    /// Wrap an id received over the API; no hashing is applied.
    #[must_use]
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-room options handed to the driver at construction.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub cookies: HashMap<String, String>,
    pub quality: i32,
    pub audio_only: bool,
    pub nickname: String,
}

/// One successful poll of a room, as written into the info cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub live_id: LiveId,
    pub host_name: String,
    pub room_name: String,
    /// Whether the room is currently broadcasting.
    pub status: bool,
    /// True until the first successful poll of this room.
    pub initializing: bool,
    pub audio_only: bool,
    /// Overlay flags filled in when the info is served, not by the poller.
    #[serde(default)]
    pub listening: bool,
    #[serde(default)]
    pub recording: bool,
}

impl RoomInfo {
    /// Placeholder info served while a driver has never answered a poll.
    #[must_use]
    pub fn initializing(live_id: LiveId, url: &str) -> Self {
        Self {
            live_id,
            host_name: String::new(),
            room_name: url.to_string(),
            status: false,
            initializing: true,
            audio_only: false,
            listening: false,
            recording: false,
        }
    }
}

/// A platform driver bound to one room.
#[async_trait]
pub trait Live: Send + Sync {
    fn live_id(&self) -> LiveId;
    fn raw_url(&self) -> &str;
    /// Config/rate-limit key for this room's platform (see `platform_key_from_url`).
    fn platform_key(&self) -> &str;
    /// Human-readable platform name for filenames and the API.
    fn platform_name(&self) -> &str;
    fn options(&self) -> &Options;

    async fn get_info(&self) -> Result<RoomInfo>;
    async fn get_stream_infos(&self) -> Result<Vec<StreamUrlInfo>>;
}

pub type LiveHandle = Arc<dyn Live>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_id_stable() {
        let url: reqwest::Url = "https://live.bilibili.com/42?x=1".parse().unwrap();
        let a = LiveId::from_url(&url);
        let url2: reqwest::Url = "https://live.bilibili.com/42?other=2".parse().unwrap();
        let b = LiveId::from_url(&url2);
        // Query strings do not participate in the id.
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_live_id_differs_by_path() {
        let a = LiveId::from_string("live.bilibili.com/42");
        let b = LiveId::from_string("live.bilibili.com/43");
        assert_ne!(a, b);
    }
}
