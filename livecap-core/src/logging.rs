use std::path::PathBuf;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LogConfig;

/// Initialize structured logging.
///
/// Console output is always enabled (pretty in debug, compact otherwise).
/// File output follows the log settings: `save_last_log` truncates a single
/// `livecap.log` per run, `save_every_log` writes one stamped file per run.
pub fn init_logging(debug: bool, log: &LogConfig) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let fmt_layer = if debug {
        fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
    };

    if let Some(path) = log_file_path(log) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(log.save_every_log)
            .truncate(!log.save_every_log)
            .write(true)
            .open(&path)?;
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Arc::new(file));
        registry.with(fmt_layer).with(file_layer).init();
    } else {
        registry.with(fmt_layer).init();
    }

    Ok(())
}

fn log_file_path(log: &LogConfig) -> Option<PathBuf> {
    if !log.save_last_log && !log.save_every_log {
        return None;
    }
    let folder = if log.out_put_folder.is_empty() {
        "."
    } else {
        log.out_put_folder.as_str()
    };
    let name = if log.save_every_log {
        format!("livecap-{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S"))
    } else {
        "livecap.log".to_string()
    };
    Some(PathBuf::from(folder).join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_disabled() {
        let log = LogConfig {
            out_put_folder: "./logs".to_string(),
            save_last_log: false,
            save_every_log: false,
            rotate_days: 7,
        };
        assert!(log_file_path(&log).is_none());
    }

    #[test]
    fn test_log_file_path_last_log() {
        let log = LogConfig {
            out_put_folder: "./logs".to_string(),
            save_last_log: true,
            save_every_log: false,
            rotate_days: 7,
        };
        let path = log_file_path(&log).unwrap();
        assert_eq!(path, PathBuf::from("./logs/livecap.log"));
    }
}
