use serde::Serialize;

use crate::live::StreamPreference;

use super::model::{
    Config, FeatureConfig, LiveRoom, LogConfig, OnRecordFinished, OverridableConfig,
    VideoSplitStrategies,
};

/// The effective overridable settings for one room after the
/// global ← platform ← room merge.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedConfig {
    pub interval: u64,
    pub out_put_path: String,
    pub ffmpeg_path: String,
    pub log: LogConfig,
    pub feature: FeatureConfig,
    pub out_put_tmpl: String,
    pub video_split_strategies: VideoSplitStrategies,
    pub on_record_finished: OnRecordFinished,
    pub timeout_in_us: u64,
    pub stream_preference: StreamPreference,
}

impl ResolvedConfig {
    fn apply_overrides(&mut self, overrides: &OverridableConfig) {
        if let Some(v) = overrides.interval {
            self.interval = v;
        }
        if let Some(v) = &overrides.out_put_path {
            self.out_put_path = v.clone();
        }
        if let Some(v) = &overrides.ffmpeg_path {
            self.ffmpeg_path = v.clone();
        }
        if let Some(v) = &overrides.log {
            self.log = v.clone();
        }
        if let Some(v) = &overrides.feature {
            self.feature = v.clone();
        }
        if let Some(v) = &overrides.out_put_tmpl {
            self.out_put_tmpl = v.clone();
        }
        if let Some(v) = &overrides.video_split_strategies {
            self.video_split_strategies = v.clone();
        }
        if let Some(v) = &overrides.on_record_finished {
            self.on_record_finished = v.clone();
        }
        if let Some(v) = overrides.timeout_in_us {
            self.timeout_in_us = v;
        }
        if let Some(v) = &overrides.stream_preference {
            self.stream_preference = v.clone();
        }
    }
}

impl Config {
    /// Merge the override chain for one room: global ← platform ← room,
    /// later presence winning.
    #[must_use]
    pub fn resolve_for_room(&self, room: &LiveRoom, platform_key: &str) -> ResolvedConfig {
        let mut resolved = ResolvedConfig {
            interval: self.interval,
            out_put_path: self.out_put_path.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            log: self.log.clone(),
            feature: self.feature.clone(),
            out_put_tmpl: self.out_put_tmpl.clone(),
            video_split_strategies: self.video_split_strategies.clone(),
            on_record_finished: self.on_record_finished.clone(),
            timeout_in_us: self.timeout_in_us,
            stream_preference: StreamPreference::default(),
        };

        if let Some(platform) = self.platform_configs.get(platform_key) {
            resolved.apply_overrides(&platform.overrides);
        }
        resolved.apply_overrides(&room.overrides);

        resolved
    }

    /// Resolve the effective settings for a room URL; a URL without a config
    /// entry resolves against an empty room.
    #[must_use]
    pub fn effective_for_url(&self, url: &str) -> ResolvedConfig {
        let platform_key = platform_key_from_url(url);
        match self.room_by_url(url) {
            Some(room) => self.resolve_for_room(room, &platform_key),
            None => self.resolve_for_room(&LiveRoom::from_url(url), &platform_key),
        }
    }
}

/// Map a room URL's host to its platform key.
///
/// Total: unknown hosts map to the host itself (empty string for an
/// unparsable URL).
#[must_use]
pub fn platform_key_from_url(url: &str) -> String {
    let Ok(parsed) = url.parse::<reqwest::Url>() else {
        return String::new();
    };
    let Some(host) = parsed.host_str() else {
        return String::new();
    };
    let key = match host {
        "live.bilibili.com" => "bilibili",
        "live.douyin.com" | "v.douyin.com" => "douyin",
        "www.douyu.com" => "douyu",
        "www.huya.com" => "huya",
        "live.kuaishou.com" => "kuaishou",
        "www.yy.com" => "yy",
        "live.acfun.cn" => "acfun",
        "www.lang.live" => "lang",
        "fm.missevan.com" => "missevan",
        "www.openrec.tv" => "openrec",
        "weibo.com" | "live.weibo.com" => "weibolive",
        "www.xiaohongshu.com" | "xhslink.com" => "xiaohongshu",
        "www.yizhibo.com" => "yizhibo",
        "www.hongdoufm.com" | "live.kilakila.cn" => "hongdoufm",
        "www.zhanqi.tv" => "zhanqi",
        "cc.163.com" => "cc",
        "www.twitch.tv" => "twitch",
        "egame.qq.com" => "qq",
        "www.huajiao.com" => "huajiao",
        other => other,
    };
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::PlatformConfig;

    fn config_with_hierarchy() -> Config {
        let mut config = Config {
            interval: 30,
            ..Default::default()
        };
        config.platform_configs.insert(
            "bilibili".to_string(),
            PlatformConfig {
                name: "Bilibili".to_string(),
                min_access_interval_sec: 0,
                overrides: OverridableConfig {
                    interval: Some(10),
                    ..Default::default()
                },
            },
        );
        let mut room = LiveRoom::from_url("https://live.bilibili.com/42");
        room.overrides.interval = Some(5);
        config.live_rooms.push(room);
        config.refresh_room_index();
        config
    }

    #[test]
    fn test_hierarchical_override() {
        let mut config = config_with_hierarchy();

        // Room override wins.
        let resolved = config.effective_for_url("https://live.bilibili.com/42");
        assert_eq!(resolved.interval, 5);

        // Remove the room override: platform wins.
        config.live_rooms[0].overrides.interval = None;
        let resolved = config.effective_for_url("https://live.bilibili.com/42");
        assert_eq!(resolved.interval, 10);

        // Remove the platform override: global wins.
        config
            .platform_configs
            .get_mut("bilibili")
            .unwrap()
            .overrides
            .interval = None;
        let resolved = config.effective_for_url("https://live.bilibili.com/42");
        assert_eq!(resolved.interval, 30);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let config = config_with_hierarchy();
        let room = config.room_by_url("https://live.bilibili.com/42").unwrap();
        let a = config.resolve_for_room(room, "bilibili");
        let b = config.resolve_for_room(room, "bilibili");
        assert_eq!(a, b);
    }

    #[test]
    fn test_platform_key_known_hosts() {
        assert_eq!(
            platform_key_from_url("https://live.bilibili.com/42"),
            "bilibili"
        );
        assert_eq!(platform_key_from_url("https://v.douyin.com/abc"), "douyin");
        assert_eq!(
            platform_key_from_url("https://www.twitch.tv/somebody"),
            "twitch"
        );
    }

    #[test]
    fn test_platform_key_is_total() {
        // Unknown hosts fall back to the raw host.
        assert_eq!(
            platform_key_from_url("https://stream.example.org/1"),
            "stream.example.org"
        );
        assert_eq!(platform_key_from_url("not a url"), "");
    }
}
