use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One playable variant of a live stream as reported by a driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamUrlInfo {
    pub url: String,
    /// Container format: "flv", "hls", "rtmp", ...
    #[serde(default)]
    pub format: String,
    /// Platform quality label: "1080p", "720p", "原画", ...
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Bitrate in kbps, 0 when unknown.
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub frame_rate: f64,
    /// Video codec: "h264", "h265".
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub description: String,
    /// Extra request headers the parser must send when pulling this URL.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl StreamUrlInfo {
    #[must_use]
    pub fn is_flv(&self) -> bool {
        self.format.eq_ignore_ascii_case("flv") || self.url.contains(".flv")
    }

    #[must_use]
    pub fn is_hls(&self) -> bool {
        self.format.eq_ignore_ascii_case("hls") || self.url.contains("m3u8")
    }
}

/// User stream preference, consumed by [`super::StreamSelector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamPreference {
    /// Format priority, first wins: `["flv", "hls"]`.
    pub formats: Vec<String>,
    /// Quality priority, first wins: `["1080p", "720p", "original"]`.
    pub qualities: Vec<String>,
    /// Maximum bitrate in kbps, 0 = unlimited.
    pub max_bitrate: u32,
    /// Minimum bitrate in kbps, 0 = unlimited.
    pub min_bitrate: u32,
    pub allow_h265: bool,
    pub prefer_60fps: bool,
}

impl Default for StreamPreference {
    fn default() -> Self {
        Self {
            formats: vec!["flv".to_string(), "hls".to_string()],
            qualities: vec![
                "1080p".to_string(),
                "720p".to_string(),
                "480p".to_string(),
            ],
            max_bitrate: 0,
            min_bitrate: 0,
            allow_h265: true,
            prefer_60fps: false,
        }
    }
}

/// Normalize a platform quality label to a canonical key.
#[must_use]
pub fn normalize_quality(quality: &str) -> &str {
    match quality {
        "原画" | "OD" => "original",
        "4K" => "4k",
        "蓝光" | "1920x1080" => "1080p",
        "超清" | "1280x720" => "720p",
        "高清" | "854x480" => "480p",
        "流畅" | "640x360" => "360p",
        other => other,
    }
}

/// Resolve a canonical quality key to pixel dimensions, (0, 0) when unknown.
#[must_use]
pub fn parse_resolution(quality: &str) -> (u32, u32) {
    match normalize_quality(quality) {
        "4k" => (3840, 2160),
        // Original footage is assumed 1080p for closeness scoring.
        "original" | "1080p" => (1920, 1080),
        "720p" => (1280, 720),
        "480p" => (854, 480),
        "360p" => (640, 360),
        _ => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_quality() {
        assert_eq!(normalize_quality("原画"), "original");
        assert_eq!(normalize_quality("蓝光"), "1080p");
        assert_eq!(normalize_quality("1080p"), "1080p");
        assert_eq!(normalize_quality("weird"), "weird");
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("720p"), (1280, 720));
        assert_eq!(parse_resolution("原画"), (1920, 1080));
        assert_eq!(parse_resolution("unknown"), (0, 0));
    }

    #[test]
    fn test_format_detection() {
        let flv = StreamUrlInfo {
            url: "https://cdn.example.com/live/1.flv?sign=x".to_string(),
            ..Default::default()
        };
        assert!(flv.is_flv());
        let hls = StreamUrlInfo {
            url: "https://cdn.example.com/live/1/index.m3u8".to_string(),
            format: "hls".to_string(),
            ..Default::default()
        };
        assert!(hls.is_hls());
        assert!(!hls.is_flv());
    }
}
