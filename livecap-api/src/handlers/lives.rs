use axum::extract::{Path, State};
use axum::Json;
use livecap_core::config::{platform_key_from_url, LiveRoom};
use livecap_core::live::LiveId;
use livecap_core::Error;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// One watched room as served by the lives endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct LiveDto {
    pub live_id: String,
    pub url: String,
    pub platform: String,
    pub host_name: String,
    pub room_name: String,
    pub status: bool,
    pub initializing: bool,
    pub listening: bool,
    pub recording: bool,
    pub audio_only: bool,
    pub nick_name: String,
}

fn build_dto(state: &AppState, room: &LiveRoom) -> Option<LiveDto> {
    let id = room.live_id.clone()?;
    let info = state.services.cache.get(&id);
    let listening = state.services.listener_manager.has(&id);
    let recording = state.services.recorder_manager.has_recorder(&id);
    Some(LiveDto {
        live_id: id.to_string(),
        url: room.url.clone(),
        platform: platform_key_from_url(&room.url),
        host_name: info.as_ref().map(|i| i.host_name.clone()).unwrap_or_default(),
        room_name: info.as_ref().map(|i| i.room_name.clone()).unwrap_or_default(),
        status: info.as_ref().is_some_and(|i| i.status),
        initializing: info.as_ref().map_or(true, |i| i.initializing),
        listening,
        recording,
        audio_only: room.audio_only,
        nick_name: room.nick_name.clone(),
    })
}

pub async fn list_lives(State(state): State<AppState>) -> Json<Vec<LiveDto>> {
    let snapshot = state.services.store.snapshot();
    let lives = snapshot
        .live_rooms
        .iter()
        .filter_map(|room| build_dto(&state, room))
        .collect();
    Json(lives)
}

#[derive(Debug, Deserialize)]
pub struct AddLive {
    pub url: String,
    #[serde(default = "default_listen")]
    pub listen: bool,
}

fn default_listen() -> bool {
    true
}

/// Bulk add rooms; each entry is `{url, listen}`.
pub async fn add_lives(
    State(state): State<AppState>,
    Json(body): Json<Vec<AddLive>>,
) -> ApiResult<Json<Vec<LiveDto>>> {
    let mut added = Vec::new();
    for entry in body {
        if !state.services.registry.supports(&entry.url) {
            return Err(ApiError::bad_request(format!(
                "unsupported platform url: {}",
                entry.url
            )));
        }
        let mut room = LiveRoom::from_url(entry.url.clone());
        room.is_listening = entry.listen;
        match state.services.store.append_live_room(room).await {
            Ok(_) => {}
            Err(Error::AlreadyExists(msg)) => {
                return Err(ApiError::conflict(msg));
            }
            Err(err) => return Err(err.into()),
        }
        if entry.listen {
            if let Err(err) = state.services.start_listening(&entry.url) {
                warn!(url = %entry.url, error = %err, "failed to start listening");
            }
        }
        let snapshot = state.services.store.snapshot();
        if let Some(dto) = snapshot
            .room_by_url(&entry.url)
            .and_then(|room| build_dto(&state, room))
        {
            added.push(dto);
        }
    }
    Ok(Json(added))
}

fn room_for_id(state: &AppState, id: &str) -> ApiResult<LiveRoom> {
    state
        .services
        .store
        .snapshot()
        .room_by_live_id(&LiveId::from_raw(id))
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("live {id} not found")))
}

pub async fn get_live(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<LiveDto>> {
    let room = room_for_id(&state, &id)?;
    build_dto(&state, &room)
        .map(Json)
        .ok_or_else(|| ApiError::internal("room has no live id"))
}

pub async fn remove_live(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<LiveDto>> {
    let room = room_for_id(&state, &id)?;
    let live_id = LiveId::from_raw(id);
    let dto = build_dto(&state, &room).ok_or_else(|| ApiError::internal("room has no live id"))?;

    if state.services.listener_manager.has(&live_id) {
        state.services.stop_listening(&live_id).await?;
    }
    state
        .services
        .store
        .remove_live_room_by_url(&room.url)
        .await?;
    state.services.cache.remove(&live_id);
    Ok(Json(dto))
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub live_id: String,
    pub action: String,
    pub ok: bool,
}

/// `start` / `stop` / `forceRefresh` on one room.
pub async fn live_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<Json<ActionResult>> {
    let room = room_for_id(&state, &id)?;
    let live_id = LiveId::from_raw(id.clone());

    match action.as_str() {
        "start" => {
            state
                .services
                .store
                .set_live_room_listening(&room.url, true)
                .await?;
            match state.services.start_listening(&room.url) {
                Ok(_) | Err(Error::AlreadyExists(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        "stop" => {
            state
                .services
                .store
                .set_live_room_listening(&room.url, false)
                .await?;
            if state.services.listener_manager.has(&live_id) {
                state.services.stop_listening(&live_id).await?;
            }
        }
        "forceRefresh" => {
            let platform = platform_key_from_url(&room.url);
            state.services.limiter.force_access(&platform);
        }
        other => {
            return Err(ApiError::bad_request(format!("unknown action: {other}")));
        }
    }

    Ok(Json(ActionResult {
        live_id: id,
        action,
        ok: true,
    }))
}
