use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use livecap_core::live::{LiveHandle, StreamUrlInfo};
use livecap_core::parser::{ParserConfig, StreamParser};
use livecap_core::{Error, Result};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Plain HTTP byte-stream downloader for FLV streams; no demuxing, the
/// container is written to disk as received. The last-resort parser when
/// neither the repair tool nor ffmpeg is available.
pub struct NativeFlvParser {
    client: reqwest::Client,
    read_timeout: Duration,
    stop_token: CancellationToken,
    downloaded_bytes: AtomicU64,
}

impl NativeFlvParser {
    #[must_use]
    pub fn new(client: reqwest::Client, cfg: &ParserConfig) -> Self {
        let read_timeout = if cfg.timeout_in_us > 0 {
            Duration::from_micros(cfg.timeout_in_us)
        } else {
            Duration::from_secs(60)
        };
        Self {
            client,
            read_timeout,
            stop_token: CancellationToken::new(),
            downloaded_bytes: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl StreamParser for NativeFlvParser {
    async fn parse_live_stream(
        &self,
        token: CancellationToken,
        stream: &StreamUrlInfo,
        _live: &LiveHandle,
        output: &Path,
    ) -> Result<()> {
        let mut request = self.client.get(&stream.url);
        for (name, value) in &stream.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(output).await?;
        let mut body = response.bytes_stream();
        debug!(path = %output.display(), "native flv download started");

        loop {
            let chunk = tokio::select! {
                () = token.cancelled() => break,
                () = self.stop_token.cancelled() => break,
                chunk = tokio::time::timeout(self.read_timeout, body.next()) => chunk,
            };
            match chunk {
                Ok(Some(Ok(bytes))) => {
                    file.write_all(&bytes).await?;
                    self.downloaded_bytes
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                Ok(Some(Err(err))) => {
                    file.flush().await?;
                    return Err(Error::Request(err));
                }
                // Stream ended or read timed out: the broadcast is over.
                Ok(None) | Err(_) => break,
            }
        }
        file.flush().await?;
        Ok(())
    }

    async fn stop(&self) {
        self.stop_token.cancel();
    }

    fn status(&self) -> Option<HashMap<String, String>> {
        Some(HashMap::from([
            ("parser".to_string(), "native-flv".to_string()),
            (
                "downloaded_bytes".to_string(),
                self.downloaded_bytes.load(Ordering::Relaxed).to_string(),
            ),
        ]))
    }
}
