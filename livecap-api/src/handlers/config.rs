use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::Json;
use livecap_core::config::{
    platform_key_from_url, Config, OverridableConfig, PlatformConfig, ResolvedConfig,
};
use livecap_core::live::LiveId;
use livecap_core::ratelimit::WaitInfo;
use livecap_core::Error;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json((*state.services.store.snapshot()).clone())
}

/// Replace the whole config document.
pub async fn put_config(
    State(state): State<AppState>,
    Json(body): Json<Config>,
) -> ApiResult<Json<Config>> {
    body.verify().map_err(ApiError::from)?;
    let updated = state.services.store.update(move |c| {
        let file = c.file.clone();
        *c = body.clone();
        c.file = file;
        Ok(())
    })?;
    Ok(Json((*updated).clone()))
}

/// Partial update: an RFC 7386 style merge of the JSON body onto the
/// current document.
pub async fn patch_config(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<Json<Config>> {
    let snapshot = state.services.store.snapshot();
    let mut doc = serde_json::to_value(&*snapshot)?;
    merge_json(&mut doc, &patch);
    let merged: Config = serde_json::from_value(doc)?;
    merged.verify().map_err(ApiError::from)?;

    let updated = state.services.store.update(move |c| {
        let file = c.file.clone();
        *c = merged.clone();
        c.file = file;
        Ok(())
    })?;
    Ok(Json((*updated).clone()))
}

fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge_json(
                        target.entry(key.clone()).or_insert(serde_json::Value::Null),
                        value,
                    );
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[derive(Debug, Deserialize)]
pub struct EffectiveQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EffectiveConfig {
    pub out_put_path: String,
    pub app_data_path: String,
    pub platform_key: String,
    pub resolved: ResolvedConfig,
}

/// The effective settings after the override merge, with absolute paths.
pub async fn get_effective_config(
    State(state): State<AppState>,
    Query(query): Query<EffectiveQuery>,
) -> Json<EffectiveConfig> {
    let snapshot = state.services.store.snapshot();
    let url = query.url.unwrap_or_default();
    let resolved = snapshot.effective_for_url(&url);
    Json(EffectiveConfig {
        out_put_path: absolutize(&resolved.out_put_path),
        app_data_path: absolutize(&snapshot.app_data_dir().to_string_lossy()),
        platform_key: platform_key_from_url(&url),
        resolved,
    })
}

fn absolutize(path: &str) -> String {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        return p.to_string_lossy().into_owned();
    }
    std::fs::canonicalize(&p)
        .unwrap_or_else(|_| {
            std::env::current_dir()
                .map(|cwd| cwd.join(&p))
                .unwrap_or(p)
        })
        .to_string_lossy()
        .into_owned()
}

#[derive(Debug, Serialize)]
pub struct PlatformStatus {
    pub config: PlatformConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_info: Option<WaitInfo>,
}

pub async fn get_platforms(
    State(state): State<AppState>,
) -> Json<HashMap<String, PlatformStatus>> {
    let snapshot = state.services.store.snapshot();
    let platforms = snapshot
        .platform_configs
        .iter()
        .map(|(key, config)| {
            (
                key.clone(),
                PlatformStatus {
                    config: config.clone(),
                    wait_info: state.services.limiter.wait_info(key),
                },
            )
        })
        .collect();
    Json(platforms)
}

pub async fn put_platform(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Json(body): Json<PlatformConfig>,
) -> ApiResult<Json<Config>> {
    let updated = state.services.store.update(move |c| {
        c.platform_configs.insert(platform.clone(), body.clone());
        Ok(())
    })?;
    Ok(Json((*updated).clone()))
}

pub async fn delete_platform(
    State(state): State<AppState>,
    Path(platform): Path<String>,
) -> ApiResult<Json<Config>> {
    let updated = state.services.store.update(move |c| {
        if c.platform_configs.remove(&platform).is_none() {
            return Err(Error::NotFound(format!(
                "platform '{platform}' has no config"
            )));
        }
        Ok(())
    })?;
    Ok(Json((*updated).clone()))
}

/// Room-level settings accepted by the room config endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfigUpdate {
    pub quality: Option<i32>,
    pub audio_only: Option<bool>,
    pub nick_name: Option<String>,
    #[serde(flatten)]
    pub overrides: OverridableConfig,
}

fn apply_room_update(
    state: &AppState,
    url: String,
    body: RoomConfigUpdate,
    replace_overrides: bool,
) -> ApiResult<Json<Config>> {
    let updated = state.services.store.update(move |c| {
        let room = c
            .room_by_url_mut(&url)
            .ok_or_else(|| Error::NotFound(format!("room {url} doesn't exist")))?;
        if let Some(quality) = body.quality {
            room.quality = quality;
        }
        if let Some(audio_only) = body.audio_only {
            room.audio_only = audio_only;
        }
        if let Some(nick_name) = &body.nick_name {
            room.nick_name.clone_from(nick_name);
        }
        if replace_overrides {
            room.overrides = body.overrides.clone();
        } else {
            room.overrides.merge_from(&body.overrides);
        }
        Ok(())
    })?;
    Ok(Json((*updated).clone()))
}

pub async fn put_room_config(
    State(state): State<AppState>,
    Path(url): Path<String>,
    Json(body): Json<RoomConfigUpdate>,
) -> ApiResult<Json<Config>> {
    apply_room_update(&state, url, body, true)
}

pub async fn patch_room_config(
    State(state): State<AppState>,
    Path(url): Path<String>,
    Json(body): Json<RoomConfigUpdate>,
) -> ApiResult<Json<Config>> {
    apply_room_update(&state, url, body, false)
}

fn room_url_by_id(state: &AppState, id: &str) -> ApiResult<String> {
    state
        .services
        .store
        .room_url_by_live_id(&LiveId::from_raw(id))
        .ok_or_else(|| ApiError::not_found(format!("live {id} not found")))
}

pub async fn put_room_config_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RoomConfigUpdate>,
) -> ApiResult<Json<Config>> {
    let url = room_url_by_id(&state, &id)?;
    apply_room_update(&state, url, body, true)
}

pub async fn patch_room_config_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RoomConfigUpdate>,
) -> ApiResult<Json<Config>> {
    let url = room_url_by_id(&state, &id)?;
    apply_room_update(&state, url, body, false)
}

/// The config file as raw YAML text.
pub async fn get_raw_config(State(state): State<AppState>) -> ApiResult<String> {
    let snapshot = state.services.store.snapshot();
    match &snapshot.file {
        Some(file) => Ok(std::fs::read_to_string(file)
            .map_err(|e| ApiError::internal(format!("failed to read config file: {e}")))?),
        None => Ok(livecap_core::config::render_with_comments(&snapshot)
            .map_err(ApiError::from)?),
    }
}

/// Replace the config from raw YAML text.
pub async fn put_raw_config(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<Config>> {
    let parsed = Config::from_bytes(body.as_bytes()).map_err(ApiError::from)?;
    parsed.verify().map_err(ApiError::from)?;
    let updated = state.services.store.update(move |c| {
        let file = c.file.clone();
        *c = parsed.clone();
        c.file = file;
        Ok(())
    })?;
    Ok(Json((*updated).clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_json_deep_and_delete() {
        let mut doc = serde_json::json!({
            "interval": 30,
            "log": {"save_last_log": true, "rotate_days": 7},
            "debug": false,
        });
        let patch = serde_json::json!({
            "interval": 10,
            "log": {"rotate_days": null},
        });
        merge_json(&mut doc, &patch);
        assert_eq!(doc["interval"], 10);
        assert_eq!(doc["log"]["save_last_log"], true);
        assert!(doc["log"].get("rotate_days").is_none());
        assert_eq!(doc["debug"], false);
    }
}
