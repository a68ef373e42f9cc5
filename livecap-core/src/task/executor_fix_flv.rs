use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::recorder::find_part_files;
use crate::{Error, Result};

use super::types::{ProgressSender, Task, TaskExecutor, TaskStatus};

/// Repairs a recorded FLV file with the external repair tool.
///
/// The tool may split a broken file into multiple `_PARTNNN.flv` segments;
/// all of them are reported through `output_file` / `metadata.output_files`.
/// Non-FLV input terminates the task as `skipped`.
pub struct FixFlvExecutor {
    dotnet_path: Option<String>,
    tool_path: Option<String>,
}

impl FixFlvExecutor {
    #[must_use]
    pub fn new(dotnet_path: Option<String>, tool_path: Option<String>) -> Self {
        Self {
            dotnet_path,
            tool_path,
        }
    }

    fn build_command(&self, input: &str) -> Option<(String, Vec<String>)> {
        let dotnet = self.dotnet_path.as_ref()?;
        let tool = self.tool_path.as_ref()?;
        Some((
            dotnet.clone(),
            vec![
                tool.clone(),
                "tool".to_string(),
                "fix".to_string(),
                input.to_string(),
                input.to_string(),
                "--json-indented".to_string(),
            ],
        ))
    }
}

#[async_trait]
impl TaskExecutor for FixFlvExecutor {
    async fn execute(
        &self,
        token: CancellationToken,
        task: &mut Task,
        progress: ProgressSender,
    ) -> Result<()> {
        if task.input_file.is_empty() {
            task.logs = "input file path is empty".to_string();
            return Err(Error::InvalidInput("input file is required".to_string()));
        }
        let input = Path::new(&task.input_file);
        if !input.exists() {
            task.logs = format!("input file does not exist: {}", task.input_file);
            return Err(Error::InvalidInput(task.logs.clone()));
        }

        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if ext != "flv" {
            task.logs = format!("input is not FLV (extension: {ext}), skipping repair");
            task.output_file.clone_from(&task.input_file);
            task.status = TaskStatus::Skipped;
            info!(task_id = task.id, input = %task.input_file, "skipping FLV fix: not a FLV file");
            let _ = progress.send(100);
            return Ok(());
        }

        info!(task_id = task.id, input = %task.input_file, "starting FLV fix");
        let _ = progress.send(10);

        let Some((program, args)) = self.build_command(&task.input_file) else {
            task.logs = "FLV repair tool is not available".to_string();
            return Err(Error::Internal(task.logs.clone()));
        };
        task.commands
            .push(format!("{program} {}", args.join(" ")));

        let mut child = tokio::process::Command::new(&program)
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to start repair tool: {e}")))?;

        let status = tokio::select! {
            () = token.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(Error::Internal("cancelled".to_string()));
            }
            status = child.wait() => status?,
        };
        if !status.success() {
            task.logs = format!("repair tool exited with {status}");
            return Err(Error::Internal(task.logs.clone()));
        }

        let _ = progress.send(90);

        let parts = find_part_files(input);
        match parts.len() {
            0 => {
                // The tool repaired in place.
                task.output_file.clone_from(&task.input_file);
                task.logs = "repair completed".to_string();
            }
            1 => {
                task.output_file = parts[0].to_string_lossy().into_owned();
                task.logs = "repair completed".to_string();
            }
            n => {
                task.output_file = parts[0].to_string_lossy().into_owned();
                task.metadata.insert(
                    "output_files".to_string(),
                    serde_json::json!(parts
                        .iter()
                        .map(|p| p.to_string_lossy().into_owned())
                        .collect::<Vec<_>>()),
                );
                task.logs = format!("repair completed, produced {n} segments");
            }
        }

        let _ = progress.send(100);
        info!(task_id = task.id, output = %task.output_file, "FLV fix completed");
        Ok(())
    }

    fn cleanup(&self, task: &Task) {
        for temp in &task.temp_files {
            if temp.is_empty() {
                continue;
            }
            if let Err(err) = std::fs::remove_file(temp) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %temp, error = %err, "failed to cleanup temp file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_non_flv_input_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("video.mp4");
        std::fs::write(&input, b"data").unwrap();

        let executor = FixFlvExecutor::new(None, None);
        let mut task = Task::new(super::super::TASK_TYPE_FIX_FLV, &input.to_string_lossy());
        let (tx, mut rx) = mpsc::unbounded_channel();

        executor
            .execute(CancellationToken::new(), &mut task, tx)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Skipped);
        assert_eq!(task.output_file, task.input_file);
        assert_eq!(rx.recv().await, Some(100));
    }

    #[tokio::test]
    async fn test_missing_input_fails() {
        let executor = FixFlvExecutor::new(None, None);
        let mut task = Task::new(super::super::TASK_TYPE_FIX_FLV, "/nonexistent/video.flv");
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = executor
            .execute(CancellationToken::new(), &mut task, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_flv_without_tool_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("video.flv");
        std::fs::write(&input, b"FLV").unwrap();

        let executor = FixFlvExecutor::new(None, None);
        let mut task = Task::new(super::super::TASK_TYPE_FIX_FLV, &input.to_string_lossy());
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = executor
            .execute(CancellationToken::new(), &mut task, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
