use crate::Result;

use super::model::Config;

/// Documentation comments injected above known top-level keys on every
/// rewrite. The document is rendered from the value model, then decorated,
/// so user edits to values survive while the key comments are kept stable.
const KEY_COMMENTS: &[(&str, &str)] = &[
    ("rpc", "HTTP API and web interface"),
    ("debug", "verbose logging and diagnostics endpoints"),
    ("interval", "default poll interval in seconds"),
    ("out_put_path", "root directory for recordings"),
    ("ffmpeg_path", "explicit ffmpeg binary, empty uses PATH"),
    ("log", "log file settings"),
    ("feature", "feature switches"),
    ("live_rooms", "watched rooms, bare URL or object form"),
    ("out_put_tmpl", "output filename template"),
    (
        "video_split_strategies",
        "segment rotation, max_duration in seconds (0 = off, minimum 60)",
    ),
    ("cookies", "per-host cookie strings"),
    ("on_record_finished", "post-processing pipeline"),
    ("timeout_in_us", "platform request timeout in microseconds"),
    ("notify", "notification channels"),
    ("app_data_path", "data directory, defaults to <out_put_path>/.appdata"),
    ("platform_configs", "per-platform overrides and access throttling"),
];

/// Serialize the config to YAML with the documented key comments.
pub fn render_with_comments(config: &Config) -> Result<String> {
    let rendered = serde_yaml::to_string(config)?;
    let mut out = String::with_capacity(rendered.len() + 512);
    for line in rendered.lines() {
        if let Some((key, _)) = line.split_once(':') {
            // Only top-level keys (no indentation) are decorated.
            if !line.starts_with([' ', '-']) {
                if let Some((_, comment)) =
                    KEY_COMMENTS.iter().find(|(k, _)| *k == key.trim())
                {
                    out.push_str("# ");
                    out.push_str(comment);
                    out.push('\n');
                }
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::LiveRoom;

    #[test]
    fn test_render_round_trip() {
        let mut config = Config::new();
        config
            .live_rooms
            .push(LiveRoom::from_url("https://live.bilibili.com/42"));
        config
            .cookies
            .insert("live.bilibili.com".to_string(), "a=b".to_string());
        config.refresh_room_index();

        let rendered = render_with_comments(&config).unwrap();
        let mut parsed = Config::from_bytes(rendered.as_bytes()).unwrap();
        // Transient fields do not round-trip.
        parsed.file.clone_from(&config.file);
        parsed.version = config.version;
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_comments_present_and_survive_reparse() {
        let config = Config::new();
        let rendered = render_with_comments(&config).unwrap();
        assert!(rendered.contains("# default poll interval in seconds"));
        assert!(rendered.contains("# root directory for recordings"));

        // A re-render of the re-parsed document keeps the same comments.
        let parsed = Config::from_bytes(rendered.as_bytes()).unwrap();
        let rerendered = render_with_comments(&parsed).unwrap();
        assert_eq!(rendered, rerendered);
    }
}
