use axum::extract::{Path, Query, State};
use axum::Json;
use livecap_core::task::{QueueStats, Task, TaskFilter, TaskStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub live_id: Option<String>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let status = match &query.status {
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("invalid task status: {raw}")))?,
        ),
        None => None,
    };
    let filter = TaskFilter {
        status,
        task_type: query.task_type,
        live_id: query.live_id,
        limit: query.limit,
        offset: query.offset,
    };
    let tasks = state.services.queue.list(&filter).await?;
    Ok(Json(tasks))
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.services.queue.stats().await?))
}

#[derive(Debug, Serialize)]
pub struct ClearResult {
    pub status: &'static str,
    pub deleted: u64,
}

pub async fn clear_completed(State(state): State<AppState>) -> ApiResult<Json<ClearResult>> {
    let deleted = state.services.queue.clear_completed().await?;
    Ok(Json(ClearResult {
        status: "success",
        deleted,
    }))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.services.queue.get(id).await?))
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub status: &'static str,
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<StatusResult>> {
    state.services.queue.cancel(id).await?;
    Ok(Json(StatusResult {
        status: "cancelled",
    }))
}

pub async fn requeue_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<StatusResult>> {
    state.services.queue.requeue(id).await?;
    Ok(Json(StatusResult { status: "requeued" }))
}

#[derive(Debug, Deserialize)]
pub struct PriorityUpdate {
    pub priority: i64,
}

pub async fn update_priority(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PriorityUpdate>,
) -> ApiResult<Json<StatusResult>> {
    state.services.queue.update_priority(id, body.priority).await?;
    Ok(Json(StatusResult { status: "updated" }))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<StatusResult>> {
    state.services.queue.delete(id).await?;
    Ok(Json(StatusResult { status: "deleted" }))
}
