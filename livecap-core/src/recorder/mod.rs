//! Per-stream recorders.
//!
//! A [`Recorder`] owns the record loop for one live stream: resolve the
//! room's config, pick a stream variant, pick a parser, write the file,
//! then hand the result to post-processing. The loop repeats until closed,
//! so a dropped connection simply starts the next file.

pub mod filename;
pub mod manager;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::InfoCache;
use crate::config::{ConfigStore, ResolvedConfig};
use crate::events::{Event, EventBus};
use crate::live::{LiveHandle, RoomInfo, StreamSelector, StreamUrlInfo};
use crate::parser::{ParserConfig, ParserHandle, ParserResolver};
use crate::task::QueueManager;

pub use manager::{RecorderManager, StatusSink};

const STATE_BEGIN: u32 = 0;
const STATE_PENDING: u32 = 1;
const STATE_RUNNING: u32 = 2;
const STATE_STOPPED: u32 = 3;

const STREAM_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct Recorder {
    live: LiveHandle,
    bus: EventBus,
    cache: Arc<InfoCache>,
    store: Arc<ConfigStore>,
    resolver: Arc<ParserResolver>,
    queue: Option<Arc<QueueManager>>,

    state: AtomicU32,
    stop: CancellationToken,
    /// Fires once the loop task has fully exited, normally or by panic.
    done: CancellationToken,
    start_time: RwLock<Instant>,
    parser: RwLock<Option<ParserHandle>>,
    current_file: RwLock<Option<PathBuf>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    #[must_use]
    pub fn new(
        live: LiveHandle,
        bus: EventBus,
        cache: Arc<InfoCache>,
        store: Arc<ConfigStore>,
        resolver: Arc<ParserResolver>,
        queue: Option<Arc<QueueManager>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            live,
            bus,
            cache,
            store,
            resolver,
            queue,
            state: AtomicU32::new(STATE_BEGIN),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            start_time: RwLock::new(Instant::now()),
            parser: RwLock::new(None),
            current_file: RwLock::new(None),
            join: Mutex::new(None),
        })
    }

    /// Start the record loop. Only legal once; re-entry returns silently.
    pub fn start(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(STATE_BEGIN, STATE_PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run().await });
        *self.join.lock() = Some(handle);
        info!(live_id = %self.live.live_id(), "record start");
        self.bus.publish(Event::RecorderStart(self.live.clone()));
        let _ = self.state.compare_exchange(
            STATE_PENDING,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Stop the record loop and the active parser. Idempotent.
    pub async fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_RUNNING, STATE_STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.stop.cancel();
        let parser = self.parser.read().clone();
        if let Some(parser) = parser {
            parser.stop().await;
        }
        info!(live_id = %self.live.live_id(), "record end");
        self.bus.publish(Event::RecorderStop(self.live.clone()));
    }

    /// The loop task's join handle; taken once by the manager's supervisor.
    pub(crate) fn take_join(&self) -> Option<JoinHandle<()>> {
        self.join.lock().take()
    }

    /// Marked by the supervisor once the loop task has exited.
    pub(crate) fn mark_finished(&self) {
        self.done.cancel();
    }

    /// Resolves once the loop task has exited.
    pub(crate) async fn wait_finished(&self) {
        self.done.cancelled().await;
    }

    #[must_use]
    pub fn start_time(&self) -> Instant {
        *self.start_time.read()
    }

    #[must_use]
    pub fn live(&self) -> &LiveHandle {
        &self.live
    }

    /// Parser counters plus the current file path and size.
    #[must_use]
    pub fn get_status(&self) -> HashMap<String, String> {
        let mut status = self
            .parser
            .read()
            .as_ref()
            .and_then(|p| p.status())
            .unwrap_or_default();
        if let Some(path) = self.current_file.read().clone() {
            status.insert("file_path".to_string(), path.to_string_lossy().into_owned());
            if let Ok(meta) = std::fs::metadata(&path) {
                status.insert("file_size".to_string(), meta.len().to_string());
            }
        }
        status
    }

    /// Roll the current file at the next keyframe, when the parser can.
    #[must_use]
    pub fn request_segment(&self) -> bool {
        self.parser
            .read()
            .as_ref()
            .is_some_and(|p| p.request_segment())
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.stop.is_cancelled() {
                return;
            }
            self.try_record().await;
        }
    }

    async fn cancellable_sleep(&self, duration: Duration) {
        tokio::select! {
            () = self.stop.cancelled() => {}
            () = tokio::time::sleep(duration) => {}
        }
    }

    fn resolved(&self) -> ResolvedConfig {
        self.store
            .snapshot()
            .effective_for_url(self.live.raw_url())
    }

    async fn try_record(&self) {
        let resolved = self.resolved();

        let streams = match self.live.get_stream_infos().await {
            Ok(streams) if !streams.is_empty() => streams,
            Ok(_) => {
                warn!(live_id = %self.live.live_id(), "no stream urls, will retry after 5s");
                self.cancellable_sleep(STREAM_RETRY_DELAY).await;
                return;
            }
            Err(err) => {
                warn!(
                    live_id = %self.live.live_id(),
                    error = %err,
                    "failed to get stream urls, will retry after 5s"
                );
                self.cancellable_sleep(STREAM_RETRY_DELAY).await;
                return;
            }
        };

        let selector = StreamSelector::new(resolved.stream_preference.clone());
        let Some((stream, reason)) = selector.select_best(&streams) else {
            self.cancellable_sleep(STREAM_RETRY_DELAY).await;
            return;
        };
        debug!(live_id = %self.live.live_id(), reason = %reason, "stream selected");
        let stream = stream.clone();

        let info = self
            .cache
            .get(&self.live.live_id())
            .unwrap_or_else(|| RoomInfo::initializing(self.live.live_id(), self.live.raw_url()));

        let file_name = self.output_file_for(&resolved, &info, &stream);
        if let Some(parent) = file_name.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                error!(
                    live_id = %self.live.live_id(),
                    path = %parent.display(),
                    error = %err,
                    "failed to create output path"
                );
                self.cancellable_sleep(STREAM_RETRY_DELAY).await;
                return;
            }
        }

        let parser_cfg = ParserConfig {
            timeout_in_us: resolved.timeout_in_us,
            audio_only: info.audio_only,
            ffmpeg_path: resolved.ffmpeg_path.clone(),
        };
        let parser = match self.resolver.resolve(
            stream.is_flv(),
            resolved.feature.use_native_flv_parser,
            &parser_cfg,
        ) {
            Ok(parser) => parser,
            Err(err) => {
                error!(live_id = %self.live.live_id(), error = %err, "failed to init parser");
                self.cancellable_sleep(STREAM_RETRY_DELAY).await;
                return;
            }
        };
        self.swap_parser(Some(parser.clone())).await;
        *self.start_time.write() = Instant::now();
        *self.current_file.write() = Some(file_name.clone());

        debug!(
            live_id = %self.live.live_id(),
            file = %file_name.display(),
            "start pulling stream"
        );
        let result = parser
            .parse_live_stream(self.stop.child_token(), &stream, &self.live, &file_name)
            .await;
        *self.current_file.write() = None;

        if let Err(err) = result {
            error!(live_id = %self.live.live_id(), error = %err, "failed to parse live stream");
            return;
        }
        remove_empty_file(&file_name);

        self.post_process(&resolved, &info, &file_name).await;
    }

    fn output_file_for(
        &self,
        resolved: &ResolvedConfig,
        info: &RoomInfo,
        stream: &StreamUrlInfo,
    ) -> PathBuf {
        let mut file_name = filename::render_output_path(
            &resolved.out_put_path,
            &resolved.out_put_tmpl,
            self.live.platform_name(),
            &self.live.options().nickname,
            info,
            resolved.feature.remove_symbol_other_character,
        );
        if stream.is_hls() {
            file_name = filename::with_extension(&file_name, "ts");
        } else if !stream.format.is_empty() && !stream.is_flv() {
            // Driver-supplied container; the template default stays .flv.
            file_name = filename::with_extension(&file_name, &stream.format);
        }
        if info.audio_only {
            file_name = filename::with_extension(&file_name, "aac");
        }
        file_name
    }

    async fn swap_parser(&self, next: Option<ParserHandle>) {
        let prev = {
            let mut guard = self.parser.write();
            std::mem::replace(&mut *guard, next)
        };
        if let Some(prev) = prev {
            prev.stop().await;
        }
    }

    async fn post_process(&self, resolved: &ResolvedConfig, info: &RoomInfo, file_name: &Path) {
        let actions = &resolved.on_record_finished;

        let command = actions.custom_commandline.trim();
        if !command.is_empty() {
            self.run_custom_command(resolved, info, file_name, command)
                .await;
            return;
        }

        let output_files =
            resolve_output_files(file_name, actions.fix_flv_at_first);
        if output_files.is_empty() {
            debug!(live_id = %self.live.live_id(), "no output file, skipping post-processing");
            return;
        }

        let Some(queue) = &self.queue else {
            return;
        };
        for file in &output_files {
            let file = file.to_string_lossy().into_owned();
            let mut fix_task_id = None;
            if actions.fix_flv_at_first {
                match queue.enqueue_fix_flv(&file, &self.live, info).await {
                    Ok(task) => fix_task_id = Some(task.id),
                    Err(err) => {
                        error!(live_id = %self.live.live_id(), error = %err, "failed to enqueue fix task");
                    }
                }
            }
            if actions.convert_to_mp4 {
                if let Err(err) = queue
                    .enqueue_convert_mp4(
                        &file,
                        actions.delete_flv_after_convert,
                        fix_task_id,
                        &self.live,
                        info,
                    )
                    .await
                {
                    error!(live_id = %self.live.live_id(), error = %err, "failed to enqueue convert task");
                }
            }
        }
    }

    async fn run_custom_command(
        &self,
        resolved: &ResolvedConfig,
        info: &RoomInfo,
        file_name: &Path,
        template: &str,
    ) {
        let rendered = template
            .replace("{file_name}", &file_name.to_string_lossy())
            .replace("{ffmpeg_path}", &resolved.ffmpeg_path)
            .replace("{platform}", self.live.platform_name())
            .replace("{host_name}", &info.host_name)
            .replace("{room_name}", &info.room_name);

        debug!(command = %rendered, "running custom command");
        let mut command = shell_command(&rendered);
        match command.status().await {
            Ok(status) if status.success() => {
                if resolved.on_record_finished.delete_flv_after_convert {
                    if let Err(err) = tokio::fs::remove_file(file_name).await {
                        warn!(error = %err, "failed to remove recording after custom command");
                    }
                }
            }
            Ok(status) => {
                warn!(command = %rendered, code = ?status.code(), "custom command failed");
            }
            Err(err) => {
                warn!(command = %rendered, error = %err, "failed to run custom command");
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

fn remove_empty_file(file: &Path) {
    if let Ok(meta) = std::fs::metadata(file) {
        if meta.len() == 0 {
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Discover the repair tool's `_PARTNNN` segment files for an expected
/// output name. `video.flv` → `video_PART000.flv`, `video_PART001.flv`, ...
#[must_use]
pub fn find_part_files(expected: &Path) -> Vec<PathBuf> {
    let Some(dir) = expected.parent() else {
        return Vec::new();
    };
    let Some(stem) = expected.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let ext = expected
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let prefix = format!("{stem}_PART");

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut parts: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let no_ext = name.strip_suffix(&format!(".{ext}"))?;
            let suffix = no_ext.strip_prefix(&prefix)?;
            (suffix.len() == 3 && suffix.chars().all(|c| c.is_ascii_digit()))
                .then(|| entry.path())
        })
        .collect();
    parts.sort();
    parts
}

/// Determine the files handed to post-processing: the repair tool may have
/// produced `_PARTNNN` segments; a single segment is renamed back to the
/// expected name when the repair step is disabled.
fn resolve_output_files(expected: &Path, fix_at_first: bool) -> Vec<PathBuf> {
    let parts = find_part_files(expected);
    if parts.len() == 1 && !fix_at_first {
        if std::fs::rename(&parts[0], expected).is_ok() {
            info!(
                from = %parts[0].display(),
                to = %expected.display(),
                "renamed single segment to expected name"
            );
            return vec![expected.to_path_buf()];
        }
        return parts;
    }
    if !parts.is_empty() {
        return parts;
    }
    if expected.exists() {
        vec![expected.to_path_buf()]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_part_files() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("video.flv");
        std::fs::write(dir.path().join("video_PART000.flv"), b"a").unwrap();
        std::fs::write(dir.path().join("video_PART001.flv"), b"b").unwrap();
        std::fs::write(dir.path().join("video_PARTxyz.flv"), b"c").unwrap();
        std::fs::write(dir.path().join("other_PART000.flv"), b"d").unwrap();
        std::fs::write(dir.path().join("video_PART000.mp4"), b"e").unwrap();

        let parts = find_part_files(&expected);
        assert_eq!(
            parts,
            vec![
                dir.path().join("video_PART000.flv"),
                dir.path().join("video_PART001.flv"),
            ]
        );
    }

    #[test]
    fn test_single_part_renamed_when_fix_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("video.flv");
        std::fs::write(dir.path().join("video_PART000.flv"), b"a").unwrap();

        let files = resolve_output_files(&expected, false);
        assert_eq!(files, vec![expected.clone()]);
        assert!(expected.exists());
        assert!(!dir.path().join("video_PART000.flv").exists());
    }

    #[test]
    fn test_single_part_kept_when_fix_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("video.flv");
        let part = dir.path().join("video_PART000.flv");
        std::fs::write(&part, b"a").unwrap();

        // The repair tool re-segments anyway; keep the part name.
        let files = resolve_output_files(&expected, true);
        assert_eq!(files, vec![part.clone()]);
        assert!(part.exists());
    }

    #[test]
    fn test_plain_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("video.flv");
        std::fs::write(&expected, b"a").unwrap();
        assert_eq!(resolve_output_files(&expected, true), vec![expected]);
    }

    #[test]
    fn test_missing_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("video.flv");
        assert!(resolve_output_files(&expected, true).is_empty());
    }

    #[test]
    fn test_remove_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.flv");
        let full = dir.path().join("full.flv");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"data").unwrap();

        remove_empty_file(&empty);
        remove_empty_file(&full);
        assert!(!empty.exists());
        assert!(full.exists());
    }
}
