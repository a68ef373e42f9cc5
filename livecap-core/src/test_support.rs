//! Scripted doubles for the driver and parser capabilities.
//!
//! Used by the crate's own tests and by downstream integration tests; no
//! production code path constructs these.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::platform_key_from_url;
use crate::live::{Live, LiveHandle, LiveId, Options, RoomInfo, StreamUrlInfo};
use crate::parser::StreamParser;
use crate::{Error, Result};

enum InfoStep {
    Info { status: bool, room_name: String },
    Error(String),
}

/// A driver that replays a scripted sequence of poll results.
///
/// When the script is exhausted the last produced info is repeated; polling
/// before any info was scripted is an error.
pub struct MockLive {
    url: String,
    id: LiveId,
    platform_key: String,
    options: Options,
    infos: Mutex<VecDeque<InfoStep>>,
    last_info: Mutex<Option<RoomInfo>>,
    streams: Mutex<Vec<StreamUrlInfo>>,
    info_polls: AtomicUsize,
}

impl MockLive {
    #[must_use]
    pub fn new(url: &str) -> Self {
        let id = url
            .parse::<reqwest::Url>()
            .map(|u| LiveId::from_url(&u))
            .unwrap_or_else(|_| LiveId::from_string(url));
        Self {
            url: url.to_string(),
            id,
            platform_key: platform_key_from_url(url),
            options: Options::default(),
            infos: Mutex::new(VecDeque::new()),
            last_info: Mutex::new(None),
            streams: Mutex::new(Vec::new()),
            info_polls: AtomicUsize::new(0),
        }
    }

    pub fn push_info(&self, status: bool, room_name: &str) {
        self.infos.lock().push_back(InfoStep::Info {
            status,
            room_name: room_name.to_string(),
        });
    }

    pub fn push_info_error(&self, message: &str) {
        self.infos
            .lock()
            .push_back(InfoStep::Error(message.to_string()));
    }

    pub fn set_streams(&self, streams: Vec<StreamUrlInfo>) {
        *self.streams.lock() = streams;
    }

    #[must_use]
    pub fn info_polls(&self) -> usize {
        self.info_polls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Live for MockLive {
    fn live_id(&self) -> LiveId {
        self.id.clone()
    }

    fn raw_url(&self) -> &str {
        &self.url
    }

    fn platform_key(&self) -> &str {
        &self.platform_key
    }

    fn platform_name(&self) -> &str {
        "Mock"
    }

    fn options(&self) -> &Options {
        &self.options
    }

    async fn get_info(&self) -> Result<RoomInfo> {
        self.info_polls.fetch_add(1, Ordering::Relaxed);
        let step = self.infos.lock().pop_front();
        match step {
            Some(InfoStep::Info { status, room_name }) => {
                let info = RoomInfo {
                    live_id: self.id.clone(),
                    host_name: "mock-host".to_string(),
                    room_name,
                    status,
                    initializing: false,
                    audio_only: self.options.audio_only,
                    listening: false,
                    recording: false,
                };
                *self.last_info.lock() = Some(info.clone());
                Ok(info)
            }
            Some(InfoStep::Error(message)) => Err(Error::Internal(message)),
            None => self
                .last_info
                .lock()
                .clone()
                .ok_or_else(|| Error::NotFound("no scripted info".to_string())),
        }
    }

    async fn get_stream_infos(&self) -> Result<Vec<StreamUrlInfo>> {
        Ok(self.streams.lock().clone())
    }
}

/// A parser that writes fixed bytes to the output file, then either returns
/// or holds the "stream" open until cancelled.
pub struct MockParser {
    name: String,
    payload: Vec<u8>,
    hold_until_cancelled: bool,
    parse_calls: AtomicUsize,
}

impl MockParser {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            payload: b"flvdata".to_vec(),
            hold_until_cancelled: false,
            parse_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn holding(name: &str, payload: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            payload,
            hold_until_cancelled: true,
            parse_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn parse_calls(&self) -> usize {
        self.parse_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StreamParser for MockParser {
    async fn parse_live_stream(
        &self,
        token: CancellationToken,
        _stream: &StreamUrlInfo,
        _live: &LiveHandle,
        output: &Path,
    ) -> Result<()> {
        self.parse_calls.fetch_add(1, Ordering::Relaxed);
        tokio::fs::write(output, &self.payload).await?;
        if self.hold_until_cancelled {
            token.cancelled().await;
        }
        Ok(())
    }

    async fn stop(&self) {}

    fn status(&self) -> Option<HashMap<String, String>> {
        let mut status = HashMap::new();
        status.insert("parser".to_string(), self.name.clone());
        Some(status)
    }
}
