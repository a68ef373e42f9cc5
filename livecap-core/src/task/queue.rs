use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventBus};
use crate::live::{LiveHandle, RoomInfo};
use crate::{Error, Result};

use super::store::TaskStore;
use super::types::{
    QueueConfig, QueueStats, Task, TaskExecutor, TaskFilter, TaskStatus, TASK_TYPE_CONVERT_MP4,
    TASK_TYPE_FIX_FLV,
};

/// Priority-ordered post-processing scheduler over the durable store.
///
/// Dispatch rules: at most `max_concurrent` tasks run at once; candidates
/// are taken in priority-then-id order; a task with a `pre_task_id` is
/// skipped until that task is `completed`. Cancel handles for running tasks
/// live only here and are released on every terminal transition.
pub struct QueueManager {
    store: TaskStore,
    config: QueueConfig,
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
    running: Mutex<HashMap<i64, CancellationToken>>,
    bus: EventBus,
    shutdown: CancellationToken,
    wakeup: Notify,
}

impl QueueManager {
    #[must_use]
    pub fn new(
        store: TaskStore,
        config: QueueConfig,
        bus: EventBus,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            executors: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            bus,
            shutdown,
            wakeup: Notify::new(),
        })
    }

    pub fn register_executor(&self, task_type: &str, executor: Arc<dyn TaskExecutor>) {
        self.executors
            .write()
            .insert(task_type.to_string(), executor);
    }

    /// Crash-recover `running` rows, then start the polling scheduler.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let reset = self.store.reset_running_tasks().await?;
        if reset > 0 {
            info!(count = reset, "reset interrupted running tasks to pending");
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.poll_loop().await;
        });
        info!("task queue manager started");
        Ok(())
    }

    async fn poll_loop(self: Arc<Self>) {
        self.schedule_next_tasks().await;
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = self.wakeup.notified() => {}
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
            self.schedule_next_tasks().await;
        }
    }

    async fn schedule_next_tasks(self: &Arc<Self>) {
        let available = {
            let running = self.running.lock();
            self.config.max_concurrent.saturating_sub(running.len())
        };
        if available == 0 {
            return;
        }

        let candidates = match self.store.pending_tasks(available as i64).await {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "failed to get pending tasks");
                return;
            }
        };

        for task in candidates {
            if let Some(pre_id) = task.pre_task_id {
                match self.store.get_task(pre_id).await {
                    Ok(pre) if pre.status == TaskStatus::Completed => {}
                    // Predecessor missing or not finished: leave it pending.
                    _ => continue,
                }
            }
            self.start_task(task).await;
        }
    }

    async fn start_task(self: &Arc<Self>, mut task: Task) {
        let executor = self.executors.read().get(&task.task_type).cloned();
        let Some(executor) = executor else {
            error!(task_type = %task.task_type, "no executor registered for task type");
            return;
        };

        let token = self.shutdown.child_token();
        {
            let mut running = self.running.lock();
            if running.contains_key(&task.id) {
                return;
            }
            running.insert(task.id, token.clone());
        }

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        if let Err(err) = self.store.update_task(&task).await {
            error!(task_id = task.id, error = %err, "failed to update task status");
        }
        self.broadcast(&task);

        let this = self.clone();
        tokio::spawn(async move {
            this.execute_task(token, task, executor).await;
        });
    }

    async fn execute_task(
        self: Arc<Self>,
        token: CancellationToken,
        mut task: Task,
        executor: Arc<dyn TaskExecutor>,
    ) {
        info!(
            task_id = task.id,
            task_type = %task.task_type,
            input = %task.input_file,
            "starting task execution"
        );

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<i32>();
        let pump = {
            let this = self.clone();
            let task_id = task.id;
            let mut snapshot = task.clone();
            tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    let progress = progress.clamp(0, 100);
                    if let Err(err) = this.store.update_progress(task_id, progress).await {
                        warn!(task_id, error = %err, "failed to persist task progress");
                    }
                    snapshot.progress = progress;
                    this.broadcast(&snapshot);
                }
            })
        };

        let result = executor.execute(token.clone(), &mut task, progress_tx).await;
        let _ = pump.await;

        task.completed_at = Some(Utc::now());
        match result {
            Err(err) if token.is_cancelled() => {
                task.status = TaskStatus::Cancelled;
                debug!(task_id = task.id, error = %err, "task cancelled");
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error_message = err.to_string();
                error!(task_id = task.id, error = %err, "task failed");
            }
            Ok(()) if token.is_cancelled() => {
                task.status = TaskStatus::Cancelled;
                debug!(task_id = task.id, "task cancelled");
            }
            Ok(()) => {
                // Executors may finish in `skipped`; everything else is a
                // completion.
                if task.status != TaskStatus::Skipped {
                    task.status = TaskStatus::Completed;
                }
                task.progress = 100;
                info!(task_id = task.id, status = task.status.as_str(), "task finished");
            }
        }

        if let Err(err) = self.store.update_task(&task).await {
            error!(task_id = task.id, error = %err, "failed to update task after execution");
        }
        self.running.lock().remove(&task.id);
        self.broadcast(&task);

        // Cancelled tasks keep their temp files; they may be requeued.
        if matches!(
            task.status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        ) {
            executor.cleanup(&task);
        }

        // A completion may unblock a dependent task.
        self.wakeup.notify_one();
    }

    fn broadcast(&self, task: &Task) {
        self.bus.publish(Event::TaskUpdate(task.clone()));
    }

    /// Insert a task as `pending` and trigger an immediate schedule pass.
    pub async fn enqueue(&self, mut task: Task) -> Result<Task> {
        task.status = TaskStatus::Pending;
        task.can_requeue = true;
        self.store.create_task(&mut task).await?;
        info!(
            task_id = task.id,
            task_type = %task.task_type,
            input = %task.input_file,
            "task enqueued"
        );
        self.broadcast(&task);
        self.wakeup.notify_one();
        Ok(task)
    }

    pub async fn enqueue_fix_flv(
        &self,
        input_file: &str,
        live: &LiveHandle,
        info: &RoomInfo,
    ) -> Result<Task> {
        let mut task = Task::new(TASK_TYPE_FIX_FLV, input_file);
        apply_labels(&mut task, live, info);
        self.enqueue(task).await
    }

    pub async fn enqueue_convert_mp4(
        &self,
        input_file: &str,
        delete_original: bool,
        pre_task_id: Option<i64>,
        live: &LiveHandle,
        info: &RoomInfo,
    ) -> Result<Task> {
        let mut task = Task::new(TASK_TYPE_CONVERT_MP4, input_file);
        apply_labels(&mut task, live, info);
        task.pre_task_id = pre_task_id;
        task.metadata.insert(
            "delete_original".to_string(),
            serde_json::json!(delete_original),
        );
        let task = self.enqueue(task).await?;

        // Back-link the fix task so the chain is visible in both directions.
        if let Some(pre_id) = pre_task_id {
            if let Ok(mut pre) = self.store.get_task(pre_id).await {
                pre.post_task_id = Some(task.id);
                if let Err(err) = self.store.update_task(&pre).await {
                    warn!(task_id = pre_id, error = %err, "failed to link post task");
                }
            }
        }
        Ok(task)
    }

    /// Cancel a task. Running tasks get their cancel handle invoked (final
    /// status is decided by the executor exit); pending tasks are marked
    /// `cancelled` directly.
    pub async fn cancel(&self, id: i64) -> Result<()> {
        let mut task = self.store.get_task(id).await?;

        let cancel = self.running.lock().get(&id).cloned();
        if let Some(cancel) = cancel {
            cancel.cancel();
            return Ok(());
        }

        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            self.store.update_task(&task).await?;
            self.broadcast(&task);
        }
        Ok(())
    }

    /// Reset a task back to `pending`. Requires `can_requeue`.
    pub async fn requeue(&self, id: i64) -> Result<()> {
        let mut task = self.store.get_task(id).await?;
        if !task.can_requeue {
            return Err(Error::InvalidInput(format!(
                "task {id} cannot be requeued"
            )));
        }

        let cancel = self.running.lock().get(&id).cloned();
        if let Some(cancel) = cancel {
            cancel.cancel();
            // Give the executor a moment to unwind before resetting the row.
            tokio::time::sleep(Duration::from_millis(100)).await;
            task = self.store.get_task(id).await?;
        }

        task.status = TaskStatus::Pending;
        task.started_at = None;
        task.completed_at = None;
        task.error_message = String::new();
        task.progress = 0;
        self.store.update_task(&task).await?;
        self.broadcast(&task);
        self.wakeup.notify_one();
        Ok(())
    }

    /// Change a task's priority; only legal while it is `pending`.
    pub async fn update_priority(&self, id: i64, priority: i64) -> Result<()> {
        let mut task = self.store.get_task(id).await?;
        if task.status != TaskStatus::Pending {
            return Err(Error::InvalidInput(
                "can only change priority of pending tasks".to_string(),
            ));
        }
        self.store.update_priority(id, priority).await?;
        task.priority = priority;
        self.broadcast(&task);
        Ok(())
    }

    /// Delete a task row; forbidden while it is running.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let _ = self.store.get_task(id).await?;
        if self.running.lock().contains_key(&id) {
            return Err(Error::InvalidInput(
                "cannot delete running task".to_string(),
            ));
        }
        self.store.delete_task(id).await
    }

    pub async fn clear_completed(&self) -> Result<u64> {
        self.store.clear_completed().await
    }

    pub async fn get(&self, id: i64) -> Result<Task> {
        self.store.get_task(id).await
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.store.list_tasks(filter).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let running_count = self.running.lock().len();
        Ok(QueueStats {
            max_concurrent: self.config.max_concurrent,
            running_count,
            pending_count: self.store.count_by_status(TaskStatus::Pending).await?,
            completed_count: self.store.count_by_status(TaskStatus::Completed).await?,
            failed_count: self.store.count_by_status(TaskStatus::Failed).await?,
            cancelled_count: self.store.count_by_status(TaskStatus::Cancelled).await?,
            skipped_count: self.store.count_by_status(TaskStatus::Skipped).await?,
        })
    }

    /// Stop dispatching, cancel running work, and close the store.
    pub async fn close(&self) {
        self.shutdown.cancel();
        // Wait briefly for running executors to observe cancellation.
        for _ in 0..50 {
            if self.running.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.store.close().await;
    }
}

fn apply_labels(task: &mut Task, live: &LiveHandle, info: &RoomInfo) {
    task.live_id = live.live_id().to_string();
    task.room_name.clone_from(&info.room_name);
    task.host_name.clone_from(&info.host_name);
    task.platform = live.platform_name().to_string();
}
