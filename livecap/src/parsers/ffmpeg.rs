use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use livecap_core::live::{LiveHandle, StreamUrlInfo};
use livecap_core::parser::{ParserConfig, StreamParser};
use livecap_core::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Pulls a stream by handing the URL to an ffmpeg child process with stream
/// copy. Works for every input format ffmpeg understands.
pub struct FfmpegParser {
    ffmpeg_path: String,
    timeout_in_us: u64,
    audio_only: bool,
    stop_token: CancellationToken,
}

impl FfmpegParser {
    #[must_use]
    pub fn new(default_path: &str, cfg: &ParserConfig) -> Self {
        let ffmpeg_path = if cfg.ffmpeg_path.is_empty() {
            default_path.to_string()
        } else {
            cfg.ffmpeg_path.clone()
        };
        Self {
            ffmpeg_path,
            timeout_in_us: cfg.timeout_in_us,
            audio_only: cfg.audio_only,
            stop_token: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl StreamParser for FfmpegParser {
    async fn parse_live_stream(
        &self,
        token: CancellationToken,
        stream: &StreamUrlInfo,
        _live: &LiveHandle,
        output: &Path,
    ) -> Result<()> {
        let mut args: Vec<String> = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "warning".to_string(),
        ];
        if !stream.headers.is_empty() {
            let mut header_block = String::new();
            for (name, value) in &stream.headers {
                header_block.push_str(&format!("{name}: {value}\r\n"));
            }
            args.push("-headers".to_string());
            args.push(header_block);
        }
        if self.timeout_in_us > 0 {
            args.push("-rw_timeout".to_string());
            args.push(self.timeout_in_us.to_string());
        }
        args.push("-i".to_string());
        args.push(stream.url.clone());
        if self.audio_only {
            args.push("-vn".to_string());
            args.push("-c:a".to_string());
            args.push("copy".to_string());
        } else {
            args.push("-c".to_string());
            args.push("copy".to_string());
        }
        args.push(output.to_string_lossy().into_owned());

        debug!(path = %output.display(), "spawning ffmpeg");
        let mut child = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn ffmpeg: {e}")))?;

        let status = tokio::select! {
            () = token.cancelled() => {
                let _ = child.start_kill();
                child.wait().await?
            }
            () = self.stop_token.cancelled() => {
                let _ = child.start_kill();
                child.wait().await?
            }
            status = child.wait() => status?,
        };

        // A killed pull is a normal stop, not a failure.
        if !status.success() && !token.is_cancelled() && !self.stop_token.is_cancelled() {
            return Err(Error::Internal(format!("ffmpeg exited with {status}")));
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stop_token.cancel();
    }

    fn status(&self) -> Option<HashMap<String, String>> {
        Some(HashMap::from([(
            "parser".to_string(),
            "ffmpeg".to_string(),
        )]))
    }
}
