//! Configuration loading for process startup.

use crate::config::{Config, LiveRoom};
use crate::Result;

/// Command-line level inputs that seed or override the config file.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<String>,
    pub output_dir: Option<String>,
    pub input_urls: Vec<String>,
    pub debug: bool,
}

/// Build the initial config from a file and/or command-line inputs.
///
/// Without a config file the process runs from defaults plus the `--input`
/// rooms; with one, command-line inputs are appended to the file's rooms.
pub fn load_config(options: &LoadOptions) -> Result<Config> {
    let mut config = match &options.config_file {
        Some(path) => Config::from_file(path)?,
        None => Config::new(),
    };

    if let Some(output) = &options.output_dir {
        config.out_put_path.clone_from(output);
    }
    for url in &options.input_urls {
        if config.room_by_url(url).is_none() {
            config.live_rooms.push(LiveRoom::from_url(url.clone()));
        }
    }
    if options.debug {
        config.debug = true;
    }
    config.refresh_room_index();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_with_inputs() {
        let options = LoadOptions {
            input_urls: vec!["https://live.bilibili.com/42".to_string()],
            output_dir: Some("/tmp".to_string()),
            debug: true,
            ..Default::default()
        };
        let config = load_config(&options).unwrap();
        assert_eq!(config.live_rooms.len(), 1);
        assert!(config.live_rooms[0].is_listening);
        assert_eq!(config.out_put_path, "/tmp");
        assert!(config.debug);
    }

    #[test]
    fn test_duplicate_inputs_ignored() {
        let options = LoadOptions {
            input_urls: vec![
                "https://live.bilibili.com/42".to_string(),
                "https://live.bilibili.com/42".to_string(),
            ],
            ..Default::default()
        };
        let config = load_config(&options).unwrap();
        assert_eq!(config.live_rooms.len(), 1);
    }
}
