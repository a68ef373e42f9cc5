use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::live::{LiveId, StreamPreference};
use crate::{Error, Result};

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RpcConfig {
    pub enable: bool,
    pub bind: String,
    /// Above this many watched rooms the SSE hub stops pushing list-level
    /// events and only serves per-room detail subscriptions.
    pub sse_list_threshold: usize,
    pub authentication: AuthenticationConfig,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enable: true,
            bind: ":8080".to_string(),
            sse_list_threshold: 50,
            authentication: AuthenticationConfig::default(),
        }
    }
}

/// Optional HTTP authentication; disabled unless configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthenticationConfig {
    pub enable: bool,
    pub web_username: String,
    pub web_password: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Prefer the native FLV downloader over ffmpeg where possible.
    pub use_native_flv_parser: bool,
    /// Strip non-alphanumeric symbols from rendered filename components.
    pub remove_symbol_other_character: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoSplitStrategies {
    pub on_room_name_changed: bool,
    /// Segment length in seconds; 0 disables, otherwise minimum 60.
    pub max_duration: u64,
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OnRecordFinished {
    pub convert_to_mp4: bool,
    pub delete_flv_after_convert: bool,
    /// When set, runs under `sh -c` / `cmd /C` instead of the task queue.
    pub custom_commandline: String,
    pub fix_flv_at_first: bool,
}

impl Default for OnRecordFinished {
    fn default() -> Self {
        Self {
            convert_to_mp4: false,
            delete_flv_after_convert: false,
            custom_commandline: String::new(),
            fix_flv_at_first: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub out_put_folder: String,
    pub save_last_log: bool,
    pub save_every_log: bool,
    /// Days of rolled logs to keep, <= 0 keeps everything.
    pub rotate_days: i32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            out_put_folder: "./".to_string(),
            save_last_log: true,
            save_every_log: false,
            rotate_days: 7,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram: TelegramConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub enable: bool,
    pub with_notification: bool,
    pub bot_token: String,
    pub chat_id: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enable: false,
            with_notification: true,
            bot_token: String::new(),
            chat_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmailConfig {
    pub enable: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub recipient_email: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enable: false,
            smtp_host: "smtp.qq.com".to_string(),
            smtp_port: 465,
            sender_email: String::new(),
            sender_password: String::new(),
            recipient_email: String::new(),
        }
    }
}

/// Settings that may be overridden at platform and room level.
///
/// Every field is presence-tagged: `None` means "inherit", which is distinct
/// from any explicit value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverridableConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_put_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_put_tmpl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_split_strategies: Option<VideoSplitStrategies>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_record_finished: Option<OnRecordFinished>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_in_us: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_preference: Option<StreamPreference>,
}

impl OverridableConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Copy every present field of `other` over this config.
    pub fn merge_from(&mut self, other: &Self) {
        if other.interval.is_some() {
            self.interval = other.interval;
        }
        if other.out_put_path.is_some() {
            self.out_put_path.clone_from(&other.out_put_path);
        }
        if other.ffmpeg_path.is_some() {
            self.ffmpeg_path.clone_from(&other.ffmpeg_path);
        }
        if other.log.is_some() {
            self.log.clone_from(&other.log);
        }
        if other.feature.is_some() {
            self.feature.clone_from(&other.feature);
        }
        if other.out_put_tmpl.is_some() {
            self.out_put_tmpl.clone_from(&other.out_put_tmpl);
        }
        if other.video_split_strategies.is_some() {
            self.video_split_strategies
                .clone_from(&other.video_split_strategies);
        }
        if other.on_record_finished.is_some() {
            self.on_record_finished.clone_from(&other.on_record_finished);
        }
        if other.timeout_in_us.is_some() {
            self.timeout_in_us = other.timeout_in_us;
        }
        if other.stream_preference.is_some() {
            self.stream_preference.clone_from(&other.stream_preference);
        }
    }
}

fn default_true() -> bool {
    true
}

/// One watched room.
///
/// YAML accepts either a bare URL string (implies `is_listening: true`) or
/// the full object form; serialization always emits the object form.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LiveRoom {
    pub url: String,
    pub is_listening: bool,
    /// Derived from the URL; never persisted.
    #[serde(skip)]
    pub live_id: Option<LiveId>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub quality: i32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub audio_only: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nick_name: String,
    #[serde(flatten)]
    pub overrides: OverridableConfig,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

impl LiveRoom {
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let live_id = url
            .parse::<reqwest::Url>()
            .ok()
            .map(|u| LiveId::from_url(&u));
        Self {
            url,
            is_listening: true,
            live_id,
            quality: 0,
            audio_only: false,
            nick_name: String::new(),
            overrides: OverridableConfig::default(),
        }
    }

    pub(crate) fn refresh_live_id(&mut self) {
        self.live_id = self
            .url
            .parse::<reqwest::Url>()
            .ok()
            .map(|u| LiveId::from_url(&u));
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct LiveRoomObject {
    url: String,
    #[serde(default = "default_true")]
    is_listening: bool,
    quality: i32,
    audio_only: bool,
    nick_name: String,
    #[serde(flatten)]
    overrides: OverridableConfig,
}

impl Default for LiveRoomObject {
    fn default() -> Self {
        Self {
            url: String::new(),
            is_listening: true,
            quality: 0,
            audio_only: false,
            nick_name: String::new(),
            overrides: OverridableConfig::default(),
        }
    }
}

impl<'de> Deserialize<'de> for LiveRoom {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Url(String),
            Object(LiveRoomObject),
        }

        let mut room = match Repr::deserialize(deserializer)? {
            Repr::Url(url) => Self::from_url(url),
            Repr::Object(obj) => Self {
                url: obj.url,
                is_listening: obj.is_listening,
                live_id: None,
                quality: obj.quality,
                audio_only: obj.audio_only,
                nick_name: obj.nick_name,
                overrides: obj.overrides,
            },
        };
        room.refresh_live_id();
        Ok(room)
    }
}

/// Platform-specific settings, keyed by platform key in the root config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlatformConfig {
    /// Display name of the platform.
    pub name: String,
    /// Minimum seconds between any two API accesses to this platform.
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub min_access_interval_sec: u64,
    #[serde(flatten)]
    pub overrides: OverridableConfig,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub file: Option<PathBuf>,
    /// Monotonically increasing snapshot version; never serialized.
    #[serde(skip)]
    pub version: u64,

    pub rpc: RpcConfig,
    pub debug: bool,
    /// Default poll interval in seconds.
    pub interval: u64,
    pub out_put_path: String,
    pub ffmpeg_path: String,
    pub log: LogConfig,
    pub feature: FeatureConfig,
    pub live_rooms: Vec<LiveRoom>,
    pub out_put_tmpl: String,
    pub video_split_strategies: VideoSplitStrategies,
    pub cookies: HashMap<String, String>,
    pub on_record_finished: OnRecordFinished,
    /// Platform HTTP request timeout, microseconds.
    pub timeout_in_us: u64,
    pub notify: NotifyConfig,
    pub app_data_path: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub platform_configs: HashMap<String, PlatformConfig>,

    #[serde(skip)]
    pub(crate) room_index: HashMap<String, usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file: None,
            version: 0,
            rpc: RpcConfig::default(),
            debug: false,
            interval: 30,
            out_put_path: "./".to_string(),
            ffmpeg_path: String::new(),
            log: LogConfig::default(),
            feature: FeatureConfig::default(),
            live_rooms: Vec::new(),
            out_put_tmpl: String::new(),
            video_split_strategies: VideoSplitStrategies::default(),
            cookies: HashMap::new(),
            on_record_finished: OnRecordFinished::default(),
            timeout_in_us: 60_000_000,
            notify: NotifyConfig::default(),
            app_data_path: String::new(),
            platform_configs: HashMap::new(),
            room_index: HashMap::new(),
        }
    }
}

impl Config {
    /// A default config with derived fields filled in.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Self::default();
        config.post_process();
        config
    }

    /// Parse a YAML document onto the defaults.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut config: Self = serde_yaml::from_slice(bytes)?;
        config.post_process();
        Ok(config)
    }

    /// Read and parse a config file. The caller is expected to write the
    /// document back once (self-heal: missing keys gain defaults).
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::InvalidInput(format!("can't open file {}: {e}", path.display())))?;
        let mut config = Self::from_bytes(&bytes)?;
        config.file = Some(path);
        Ok(config)
    }

    fn post_process(&mut self) {
        if self.app_data_path.is_empty() {
            self.app_data_path = PathBuf::from(&self.out_put_path)
                .join(".appdata")
                .to_string_lossy()
                .into_owned();
        }
        self.refresh_room_index();
    }

    /// Rebuild the url → index cache and the derived live ids.
    pub fn refresh_room_index(&mut self) {
        self.room_index.clear();
        for (index, room) in self.live_rooms.iter_mut().enumerate() {
            room.refresh_live_id();
            self.room_index.insert(room.url.clone(), index);
        }
    }

    #[must_use]
    pub fn room_by_url(&self, url: &str) -> Option<&LiveRoom> {
        self.room_index
            .get(url)
            .and_then(|&i| self.live_rooms.get(i))
            .filter(|r| r.url == url)
            .or_else(|| self.live_rooms.iter().find(|r| r.url == url))
    }

    pub fn room_by_url_mut(&mut self, url: &str) -> Option<&mut LiveRoom> {
        let index = match self.room_index.get(url) {
            Some(&i) if self.live_rooms.get(i).is_some_and(|r| r.url == url) => Some(i),
            _ => self.live_rooms.iter().position(|r| r.url == url),
        };
        index.and_then(|i| self.live_rooms.get_mut(i))
    }

    #[must_use]
    pub fn room_by_live_id(&self, id: &LiveId) -> Option<&LiveRoom> {
        self.live_rooms
            .iter()
            .find(|r| r.live_id.as_ref() == Some(id))
    }

    pub fn remove_room_by_url(&mut self, url: &str) -> Result<()> {
        let before = self.live_rooms.len();
        self.live_rooms.retain(|r| r.url != url);
        if self.live_rooms.len() == before {
            return Err(Error::NotFound(format!("room {url} doesn't exist")));
        }
        self.refresh_room_index();
        Ok(())
    }

    /// Validate the whole document. Called at load and before every publish
    /// triggered by the HTTP surface.
    pub fn verify(&self) -> Result<()> {
        if self.rpc.enable {
            verify_bind(&self.rpc.bind)?;
        }
        if self.interval == 0 {
            return Err(Error::InvalidInput(
                "the interval can not be 0".to_string(),
            ));
        }
        if !std::path::Path::new(&self.out_put_path).exists() {
            return Err(Error::InvalidInput(format!(
                "the output path \"{}\" does not exist",
                self.out_put_path
            )));
        }
        let max_dur = self.video_split_strategies.max_duration;
        if max_dur > 0 && max_dur < 60 {
            return Err(Error::InvalidInput(
                "the minimum value of max_duration is one minute".to_string(),
            ));
        }
        if !self.rpc.enable && self.live_rooms.is_empty() {
            return Err(Error::InvalidInput(
                "RPC is disabled and no live room is set; the program has nothing to do"
                    .to_string(),
            ));
        }
        self.verify_platform_configs()
    }

    fn verify_platform_configs(&self) -> Result<()> {
        for (key, platform) in &self.platform_configs {
            if let Some(interval) = platform.overrides.interval {
                if interval == 0 {
                    return Err(Error::InvalidInput(format!(
                        "platform '{key}': poll interval must be greater than 0"
                    )));
                }
            }
            if let Some(path) = &platform.overrides.out_put_path {
                if !std::path::Path::new(path).exists() {
                    return Err(Error::InvalidInput(format!(
                        "platform '{key}': output path '{path}' does not exist"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Effective minimum access interval for a platform, never below 1 s.
    #[must_use]
    pub fn platform_min_access_interval(&self, platform: &str) -> u64 {
        self.platform_configs
            .get(platform)
            .map(|p| p.min_access_interval_sec)
            .filter(|&v| v >= 1)
            .unwrap_or(1)
    }

    /// Platform key → configured minimum interval, for rate limiter sync.
    #[must_use]
    pub fn platform_rate_limits(&self) -> HashMap<String, u64> {
        self.platform_configs
            .iter()
            .filter(|(_, p)| p.min_access_interval_sec > 0)
            .map(|(k, p)| (k.clone(), p.min_access_interval_sec))
            .collect()
    }

    /// Resolved data directory (task database and friends).
    #[must_use]
    pub fn app_data_dir(&self) -> PathBuf {
        if self.app_data_path.is_empty() {
            PathBuf::from(&self.out_put_path).join(".appdata")
        } else {
            PathBuf::from(&self.app_data_path)
        }
    }
}

fn verify_bind(bind: &str) -> Result<()> {
    let candidate = if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_string()
    };
    candidate
        .parse::<std::net::SocketAddr>()
        .map(|_| ())
        .map_err(|e| Error::InvalidInput(format!("invalid rpc bind address {bind}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.interval, 30);
        assert_eq!(config.timeout_in_us, 60_000_000);
        assert!(config.rpc.enable);
        assert_eq!(config.rpc.sse_list_threshold, 50);
        assert!(config.on_record_finished.fix_flv_at_first);
    }

    #[test]
    fn test_bare_string_room_form() {
        let yaml = r"
live_rooms:
  - https://live.bilibili.com/42
  - url: https://www.douyu.com/100
    is_listening: false
    quality: 2
";
        let config = Config::from_bytes(yaml.as_bytes()).unwrap();
        assert_eq!(config.live_rooms.len(), 2);
        assert!(config.live_rooms[0].is_listening);
        assert!(config.live_rooms[0].live_id.is_some());
        assert!(!config.live_rooms[1].is_listening);
        assert_eq!(config.live_rooms[1].quality, 2);
    }

    #[test]
    fn test_object_form_defaults_listening() {
        let yaml = r"
live_rooms:
  - url: https://live.bilibili.com/42
";
        let config = Config::from_bytes(yaml.as_bytes()).unwrap();
        assert!(config.live_rooms[0].is_listening);
    }

    #[test]
    fn test_room_lookup() {
        let mut config = Config::default();
        config
            .live_rooms
            .push(LiveRoom::from_url("https://live.bilibili.com/42"));
        config.refresh_room_index();

        assert!(config.room_by_url("https://live.bilibili.com/42").is_some());
        assert!(config.room_by_url("https://live.bilibili.com/43").is_none());

        config
            .remove_room_by_url("https://live.bilibili.com/42")
            .unwrap();
        assert!(config.room_by_url("https://live.bilibili.com/42").is_none());
    }

    #[test]
    fn test_verify_rejects_short_max_duration() {
        let mut config = Config {
            out_put_path: std::env::temp_dir().to_string_lossy().into_owned(),
            ..Default::default()
        };
        config.video_split_strategies.max_duration = 30;
        assert!(config.verify().is_err());
        config.video_split_strategies.max_duration = 60;
        assert!(config.verify().is_ok());
    }

    #[test]
    fn test_verify_rejects_idle_config() {
        let mut config = Config {
            out_put_path: std::env::temp_dir().to_string_lossy().into_owned(),
            ..Default::default()
        };
        config.rpc.enable = false;
        assert!(config.verify().is_err());
        config
            .live_rooms
            .push(LiveRoom::from_url("https://live.bilibili.com/42"));
        assert!(config.verify().is_ok());
    }

    #[test]
    fn test_platform_min_access_interval_clamped() {
        let mut config = Config::default();
        config.platform_configs.insert(
            "bilibili".to_string(),
            PlatformConfig {
                name: "Bilibili".to_string(),
                min_access_interval_sec: 5,
                overrides: OverridableConfig::default(),
            },
        );
        assert_eq!(config.platform_min_access_interval("bilibili"), 5);
        assert_eq!(config.platform_min_access_interval("unknown"), 1);
    }
}
