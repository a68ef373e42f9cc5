use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{Error, Result};

use super::types::{ProgressSender, Task, TaskExecutor};

static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap());
static OUT_TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"out_time_us=(\d+)").unwrap());

/// Remuxes a recording into MP4 with stream copy and `+faststart`.
///
/// Writes to a `.converting_<name>` temp file and renames on success; the
/// source is deleted when `metadata.delete_original` (or the executor
/// default) says so. Progress is parsed from ffmpeg's `-progress` stream
/// against the duration read from its banner.
pub struct ConvertMp4Executor {
    ffmpeg_path: String,
    delete_original: bool,
}

impl ConvertMp4Executor {
    #[must_use]
    pub fn new(ffmpeg_path: Option<String>, delete_original: bool) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.unwrap_or_else(|| "ffmpeg".to_string()),
            delete_original,
        }
    }

    async fn video_duration_seconds(&self, input: &str) -> Option<f64> {
        let output = tokio::process::Command::new(&self.ffmpeg_path)
            .args(["-i", input, "-hide_banner"])
            .output()
            .await
            .ok()?;
        // ffmpeg exits non-zero for `-i` without an output; the banner on
        // stderr still carries the duration.
        let text = String::from_utf8_lossy(&output.stderr);
        parse_duration(&text)
    }
}

fn parse_duration(banner: &str) -> Option<f64> {
    let captures = DURATION_RE.captures(banner)?;
    let hours: f64 = captures[1].parse().ok()?;
    let minutes: f64 = captures[2].parse().ok()?;
    let seconds: f64 = captures[3].parse().ok()?;
    let centis: f64 = captures[4].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds + centis / 100.0)
}

fn progress_from_line(line: &str, total_seconds: f64) -> Option<i32> {
    let captures = OUT_TIME_RE.captures(line)?;
    let out_time_us: f64 = captures[1].parse().ok()?;
    if total_seconds <= 0.0 {
        return None;
    }
    let current = out_time_us / 1_000_000.0;
    // Map into the 5–90% band; the rename and cleanup fill the rest.
    Some((((current / total_seconds) * 85.0) as i32 + 5).min(90))
}

fn temp_file_for(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.mp4".to_string());
    output.with_file_name(format!(".converting_{name}"))
}

#[async_trait]
impl TaskExecutor for ConvertMp4Executor {
    async fn execute(
        &self,
        token: CancellationToken,
        task: &mut Task,
        progress: ProgressSender,
    ) -> Result<()> {
        if task.input_file.is_empty() {
            return Err(Error::InvalidInput("input file is required".to_string()));
        }
        let input = Path::new(&task.input_file);
        if !input.exists() {
            return Err(Error::InvalidInput(format!(
                "input file does not exist: {}",
                task.input_file
            )));
        }

        if task.output_file.is_empty() {
            task.output_file = input.with_extension("mp4").to_string_lossy().into_owned();
        }
        let output = PathBuf::from(&task.output_file);
        let temp_file = temp_file_for(&output);
        task.temp_files = vec![temp_file.to_string_lossy().into_owned()];

        info!(
            task_id = task.id,
            input = %task.input_file,
            output = %task.output_file,
            "starting MP4 conversion"
        );

        let duration = self
            .video_duration_seconds(&task.input_file)
            .await
            .unwrap_or_else(|| {
                warn!(task_id = task.id, "could not read duration, progress will be coarse");
                0.0
            });

        let args: Vec<String> = vec![
            "-i".to_string(),
            task.input_file.clone(),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            temp_file.to_string_lossy().into_owned(),
        ];
        task.commands
            .push(format!("{} {}", self.ffmpeg_path, args.join(" ")));

        let mut child = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Internal(format!("ffmpeg not available: {e}")))?;

        let _ = progress.send(5);
        let stdout = child.stdout.take();
        let progress_reader = {
            let progress = progress.clone();
            tokio::spawn(async move {
                let Some(stdout) = stdout else { return };
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(pct) = progress_from_line(&line, duration) {
                        let _ = progress.send(pct);
                    }
                }
            })
        };

        let status = tokio::select! {
            () = token.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                progress_reader.abort();
                let _ = tokio::fs::remove_file(&temp_file).await;
                return Err(Error::Internal("cancelled".to_string()));
            }
            status = child.wait() => status?,
        };
        let _ = progress_reader.await;

        if !status.success() {
            let _ = tokio::fs::remove_file(&temp_file).await;
            return Err(Error::Internal(format!(
                "ffmpeg conversion failed with {status}"
            )));
        }
        let _ = progress.send(90);

        if !temp_file.exists() {
            return Err(Error::Internal("temp file was not created".to_string()));
        }
        tokio::fs::rename(&temp_file, &output).await.map_err(|e| {
            Error::Internal(format!("failed to rename temp file: {e}"))
        })?;

        let delete_original = task
            .metadata
            .get("delete_original")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(self.delete_original);
        if delete_original && task.input_file != task.output_file {
            match tokio::fs::remove_file(&task.input_file).await {
                Ok(()) => {
                    info!(file = %task.input_file, "deleted original file after conversion");
                }
                Err(err) => {
                    warn!(file = %task.input_file, error = %err, "failed to delete original file");
                }
            }
        }

        let _ = progress.send(100);
        info!(task_id = task.id, output = %task.output_file, "MP4 conversion completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        let banner = "Input #0, flv, from 'x.flv':\n  Duration: 01:02:03.45, start: 0.0";
        let secs = parse_duration(banner).unwrap();
        assert!((secs - (3600.0 + 120.0 + 3.45)).abs() < 0.001);
        assert!(parse_duration("no duration here").is_none());
    }

    #[test]
    fn test_progress_from_line() {
        // 50 of 100 seconds → 5 + 42 = 47.
        assert_eq!(progress_from_line("out_time_us=50000000", 100.0), Some(47));
        // Clamped to 90 near the end.
        assert_eq!(progress_from_line("out_time_us=100000000", 100.0), Some(90));
        assert_eq!(progress_from_line("frame=10", 100.0), None);
        assert_eq!(progress_from_line("out_time_us=1", 0.0), None);
    }

    #[test]
    fn test_temp_file_name() {
        assert_eq!(
            temp_file_for(Path::new("/rec/video.mp4")),
            PathBuf::from("/rec/.converting_video.mp4")
        );
    }
}
