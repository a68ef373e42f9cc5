use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Task type registered against an executor. An open set: the two built-in
/// types are `fix_flv` and `convert_mp4`, more may be registered.
pub const TASK_TYPE_FIX_FLV: &str = "fix_flv";
pub const TASK_TYPE_CONVERT_MP4: &str = "convert_mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Terminal states release the in-memory cancel handle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// One persisted unit of post-processing work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    /// Higher wins; ties break on id (insertion order).
    pub priority: i64,
    pub input_file: String,
    pub output_file: String,
    pub temp_files: Vec<String>,
    pub live_id: String,
    pub room_name: String,
    pub host_name: String,
    pub platform: String,
    pub pre_task_id: Option<i64>,
    pub post_task_id: Option<i64>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: String,
    /// 0–100.
    pub progress: i32,
    pub can_requeue: bool,
    pub commands: Vec<String>,
    pub logs: String,
}

impl Task {
    #[must_use]
    pub fn new(task_type: &str, input_file: &str) -> Self {
        Self {
            id: 0,
            task_type: task_type.to_string(),
            status: TaskStatus::Pending,
            priority: 0,
            input_file: input_file.to_string(),
            output_file: String::new(),
            temp_files: Vec::new(),
            live_id: String::new(),
            room_name: String::new(),
            host_name: String::new(),
            platform: String::new(),
            pre_task_id: None,
            post_task_id: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: String::new(),
            progress: 0,
            can_requeue: true,
            commands: Vec::new(),
            logs: String::new(),
        }
    }
}

/// Progress reports flow over a channel so executors never touch the store.
pub type ProgressSender = mpsc::UnboundedSender<i32>;

/// Runs one task to completion.
///
/// Implementations must obey cancellation promptly, report progress as
/// 0–100, and leave their temp files listed in `task.temp_files` so
/// [`TaskExecutor::cleanup`] can remove them after success or failure.
/// Cleanup is not invoked for cancelled tasks; they may be requeued.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        token: CancellationToken,
        task: &mut Task,
        progress: ProgressSender,
    ) -> Result<()>;

    fn cleanup(&self, task: &Task) {
        for temp in &task.temp_files {
            if temp.is_empty() {
                continue;
            }
            if let Err(err) = std::fs::remove_file(temp) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(file = %temp, error = %err, "failed to cleanup temp file");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub live_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub running_count: usize,
    pub pending_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub cancelled_count: i64,
    pub skipped_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Skipped,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
    }
}
