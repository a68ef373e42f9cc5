use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::{Error, Result};

use super::types::{Task, TaskFilter, TaskStatus};

/// Application version stamped into `system_meta`. Opening fails with
/// [`Error::IncompatibleDatabase`] when the stored `min_compatible_version`
/// is newer than the running app (the database was written by a newer
/// release that this one cannot read).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const MIN_COMPATIBLE_VERSION: &str = "0.4.0";

/// Durable task storage over an embedded SQLite database.
///
/// All access goes through one pooled handle; long executor work runs
/// outside any store call.
#[derive(Debug)]
pub struct TaskStore {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl TaskStore {
    /// Open (or create) the task database, running schema migrations.
    ///
    /// On a failed migration the database file is restored from the
    /// timestamped backup taken just before migrating, and the migration is
    /// retried once. A second failure is fatal.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let backup = backup_database(db_path)?;

        let pool = connect(db_path).await?;
        match sqlx::migrate!("./migrations").run(&pool).await {
            Ok(()) => {}
            Err(err) => {
                warn!(error = %err, "task database migration failed");
                pool.close().await;
                let Some(backup) = &backup else {
                    return Err(err.into());
                };
                info!(backup = %backup.display(), "restoring task database from backup");
                std::fs::copy(backup, db_path)?;
                let pool = connect(db_path).await?;
                sqlx::migrate!("./migrations").run(&pool).await?;
                let store = Self {
                    pool,
                    db_path: Some(db_path.to_path_buf()),
                };
                store.update_version_info().await?;
                return Ok(store);
            }
        }

        let store = Self {
            pool,
            db_path: Some(db_path.to_path_buf()),
        };
        store.update_version_info().await?;
        Ok(store)
    }

    /// An in-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        // One long-lived connection: the in-memory database dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        let store = Self {
            pool,
            db_path: None,
        };
        store.update_version_info().await?;
        Ok(store)
    }

    async fn update_version_info(&self) -> Result<()> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT value FROM system_meta WHERE key = 'app_version'")
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO system_meta (key, value, updated_at) VALUES \
                     ('app_version', ?1, ?3), ('min_compatible_version', ?2, ?3)",
                )
                .bind(APP_VERSION)
                .bind(MIN_COMPATIBLE_VERSION)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
                info!(version = APP_VERSION, "initialized task database version info");
            }
            Some(old) => {
                // Refuse databases stamped by a release we cannot read.
                let required: Option<String> = sqlx::query_scalar(
                    "SELECT value FROM system_meta WHERE key = 'min_compatible_version'",
                )
                .fetch_optional(&self.pool)
                .await?;
                if let Some(required) = required {
                    if version_lt(APP_VERSION, &required) {
                        return Err(Error::IncompatibleDatabase {
                            required,
                            current: APP_VERSION.to_string(),
                        });
                    }
                }

                sqlx::query(
                    "UPDATE system_meta SET value = ?1, updated_at = ?2 WHERE key = 'app_version'",
                )
                .bind(APP_VERSION)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
                if old != APP_VERSION {
                    info!(
                        old_version = %old,
                        new_version = APP_VERSION,
                        "updated task database version info"
                    );
                }
            }
        }
        Ok(())
    }

    pub async fn create_task(&self, task: &mut Task) -> Result<()> {
        task.created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO tasks (type, status, priority, input_file, output_file, temp_files, \
             live_id, room_name, host_name, platform, pre_task_id, post_task_id, metadata, \
             created_at, error_message, progress, can_requeue, commands, logs) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.task_type)
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(&task.input_file)
        .bind(&task.output_file)
        .bind(serde_json::to_string(&task.temp_files)?)
        .bind(&task.live_id)
        .bind(&task.room_name)
        .bind(&task.host_name)
        .bind(&task.platform)
        .bind(task.pre_task_id)
        .bind(task.post_task_id)
        .bind(serde_json::to_string(&task.metadata)?)
        .bind(task.created_at)
        .bind(&task.error_message)
        .bind(task.progress)
        .bind(task.can_requeue)
        .bind(serde_json::to_string(&task.commands)?)
        .bind(&task.logs)
        .execute(&self.pool)
        .await?;
        task.id = result.last_insert_rowid();
        Ok(())
    }

    pub async fn get_task(&self, id: i64) -> Result<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id} not found")))?;
        scan_task(&row)
    }

    pub async fn update_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status = ?, priority = ?, output_file = ?, temp_files = ?, \
             metadata = ?, started_at = ?, completed_at = ?, error_message = ?, progress = ?, \
             can_requeue = ?, post_task_id = ?, commands = ?, logs = ? WHERE id = ?",
        )
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(&task.output_file)
        .bind(serde_json::to_string(&task.temp_files)?)
        .bind(serde_json::to_string(&task.metadata)?)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error_message)
        .bind(task.progress)
        .bind(task.can_requeue)
        .bind(task.post_task_id)
        .bind(serde_json::to_string(&task.commands)?)
        .bind(&task.logs)
        .bind(task.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_progress(&self, id: i64, progress: i32) -> Result<()> {
        sqlx::query("UPDATE tasks SET progress = ? WHERE id = ?")
            .bind(progress)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_priority(&self, id: i64, priority: i64) -> Result<()> {
        sqlx::query("UPDATE tasks SET priority = ? WHERE id = ?")
            .bind(priority)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
        if filter.status.is_some() {
            query.push_str(" AND status = ?");
        }
        if filter.task_type.is_some() {
            query.push_str(" AND type = ?");
        }
        if filter.live_id.is_some() {
            query.push_str(" AND live_id = ?");
        }
        query.push_str(" ORDER BY priority DESC, id ASC");
        if filter.limit > 0 {
            query.push_str(" LIMIT ?");
        }
        if filter.offset > 0 {
            query.push_str(" OFFSET ?");
        }

        let mut q = sqlx::query(&query);
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(task_type) = &filter.task_type {
            q = q.bind(task_type);
        }
        if let Some(live_id) = &filter.live_id {
            q = q.bind(live_id);
        }
        if filter.limit > 0 {
            q = q.bind(filter.limit);
        }
        if filter.offset > 0 {
            q = q.bind(filter.offset);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(scan_task).collect()
    }

    /// Pending tasks in scheduling order: priority DESC, then id ASC.
    pub async fn pending_tasks(&self, limit: i64) -> Result<Vec<Task>> {
        self.list_tasks(&TaskFilter {
            status: Some(TaskStatus::Pending),
            limit,
            ..Default::default()
        })
        .await
    }

    /// Crash recovery: every `running` row goes back to `pending` before the
    /// scheduler starts dispatching.
    pub async fn reset_running_tasks(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, started_at = NULL, progress = 0 WHERE status = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE status = ?")
            .bind(TaskStatus::Completed.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_by_status(&self, status: TaskStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

async fn connect(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?)
}

/// Copy the database file aside before touching the schema. Returns the
/// backup path, or `None` when there is nothing to back up yet.
fn backup_database(db_path: &Path) -> Result<Option<PathBuf>> {
    if !db_path.exists() {
        return Ok(None);
    }
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let backup_path = db_path.with_file_name(format!(
        "{}.backup_{timestamp}",
        db_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tasks.db".to_string())
    ));
    std::fs::copy(db_path, &backup_path)?;
    info!(backup_path = %backup_path.display(), "task database backed up");
    Ok(Some(backup_path))
}

/// Dotted-numeric version comparison, missing segments read as zero.
fn version_lt(a: &str, b: &str) -> bool {
    let segment = |v: &str, i: usize| {
        v.split('.')
            .nth(i)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let len = a.split('.').count().max(b.split('.').count());
    for i in 0..len {
        let (left, right) = (segment(a, i), segment(b, i));
        if left != right {
            return left < right;
        }
    }
    false
}

fn scan_task(row: &SqliteRow) -> Result<Task> {
    let status: String = row.try_get("status")?;
    let temp_files: String = row.try_get("temp_files")?;
    let metadata: String = row.try_get("metadata")?;
    let commands: String = row.try_get("commands")?;

    Ok(Task {
        id: row.try_get("id")?,
        task_type: row.try_get("type")?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("unknown task status in database: {status}")))?,
        priority: row.try_get("priority")?,
        input_file: row.try_get("input_file")?,
        output_file: row.try_get("output_file")?,
        temp_files: serde_json::from_str(&temp_files).unwrap_or_default(),
        live_id: row.try_get("live_id")?,
        room_name: row.try_get("room_name")?,
        host_name: row.try_get("host_name")?,
        platform: row.try_get("platform")?,
        pre_task_id: row.try_get("pre_task_id")?,
        post_task_id: row.try_get("post_task_id")?,
        metadata: serde_json::from_str::<HashMap<String, serde_json::Value>>(&metadata)
            .unwrap_or_default(),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        error_message: row.try_get("error_message")?,
        progress: row.try_get("progress")?,
        can_requeue: row.try_get("can_requeue")?,
        commands: serde_json::from_str(&commands).unwrap_or_default(),
        logs: row.try_get("logs")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let mut task = Task::new(super::super::TASK_TYPE_FIX_FLV, "/tmp/video.flv");
        task.live_id = "abc".to_string();
        task.metadata
            .insert("delete_original".to_string(), serde_json::json!(true));
        store.create_task(&mut task).await.unwrap();
        assert!(task.id > 0);

        let loaded = store.get_task(task.id).await.unwrap();
        assert_eq!(loaded.task_type, super::super::TASK_TYPE_FIX_FLV);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.live_id, "abc");
        assert_eq!(loaded.metadata["delete_original"], serde_json::json!(true));
        assert!(loaded.can_requeue);
    }

    #[tokio::test]
    async fn test_get_missing_task() {
        let store = TaskStore::open_in_memory().await.unwrap();
        assert!(matches!(
            store.get_task(12345).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_order_priority_then_id() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let mut low = Task::new("t", "a");
        low.priority = 1;
        let mut high = Task::new("t", "b");
        high.priority = 5;
        let mut high_later = Task::new("t", "c");
        high_later.priority = 5;
        store.create_task(&mut low).await.unwrap();
        store.create_task(&mut high).await.unwrap();
        store.create_task(&mut high_later).await.unwrap();

        let pending = store.pending_tasks(10).await.unwrap();
        let ids: Vec<i64> = pending.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![high.id, high_later.id, low.id]);
    }

    #[tokio::test]
    async fn test_reset_running_tasks() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let mut task = Task::new("t", "a");
        store.create_task(&mut task).await.unwrap();
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.progress = 40;
        store.update_task(&task).await.unwrap();

        let reset = store.reset_running_tasks().await.unwrap();
        assert_eq!(reset, 1);
        let loaded = store.get_task(task.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert!(loaded.started_at.is_none());
        assert_eq!(loaded.progress, 0);
    }

    #[tokio::test]
    async fn test_filters_and_clear_completed() {
        let store = TaskStore::open_in_memory().await.unwrap();
        let mut done = Task::new("t", "a");
        store.create_task(&mut done).await.unwrap();
        done.status = TaskStatus::Completed;
        store.update_task(&done).await.unwrap();
        let mut pending = Task::new("u", "b");
        pending.live_id = "room1".to_string();
        store.create_task(&mut pending).await.unwrap();

        let completed = store
            .list_tasks(&TaskFilter {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);

        let by_live = store
            .list_tasks(&TaskFilter {
                live_id: Some("room1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_live.len(), 1);

        assert_eq!(store.clear_completed().await.unwrap(), 1);
        assert_eq!(store.count_by_status(TaskStatus::Completed).await.unwrap(), 0);
        assert_eq!(store.count_by_status(TaskStatus::Pending).await.unwrap(), 1);
    }

    #[test]
    fn test_version_lt() {
        assert!(version_lt("0.3.9", "0.4.0"));
        assert!(version_lt("0.4", "0.4.1"));
        assert!(!version_lt("0.4.0", "0.4"));
        assert!(!version_lt("0.4.0", "0.4.0"));
        assert!(!version_lt("1.0.0", "0.9.9"));
        assert!(version_lt("0.4.0", "10.0.0"));
    }

    #[tokio::test]
    async fn test_incompatible_database_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");
        {
            let store = TaskStore::open(&db_path).await.unwrap();
            // Pretend a newer release raised the floor past this build.
            sqlx::query(
                "UPDATE system_meta SET value = '99.0.0' WHERE key = 'min_compatible_version'",
            )
            .execute(&store.pool)
            .await
            .unwrap();
            store.close().await;
        }

        let err = TaskStore::open(&db_path).await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleDatabase { .. }));
    }

    #[tokio::test]
    async fn test_open_on_disk_and_version_info() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");
        let store = TaskStore::open(&db_path).await.unwrap();
        let mut task = Task::new("t", "a");
        store.create_task(&mut task).await.unwrap();
        store.close().await;

        // Reopen: schema is current, data survives, a backup was taken.
        let store = TaskStore::open(&db_path).await.unwrap();
        assert!(store.get_task(task.id).await.is_ok());
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup_"))
            .collect();
        assert!(!backups.is_empty());
    }
}
