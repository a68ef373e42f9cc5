use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CookieQuery {
    pub host: Option<String>,
}

pub async fn get_cookies(
    State(state): State<AppState>,
    Query(query): Query<CookieQuery>,
) -> Json<HashMap<String, String>> {
    let snapshot = state.services.store.snapshot();
    let cookies = match query.host {
        Some(host) => snapshot
            .cookies
            .get(&host)
            .map(|cookie| HashMap::from([(host, cookie.clone())]))
            .unwrap_or_default(),
        None => snapshot.cookies.clone(),
    };
    Json(cookies)
}

#[derive(Debug, Deserialize)]
pub struct PutCookie {
    pub host: String,
    pub cookie: String,
}

pub async fn put_cookie(
    State(state): State<AppState>,
    Json(body): Json<PutCookie>,
) -> ApiResult<Json<HashMap<String, String>>> {
    let updated = state
        .services
        .store
        .set_cookie(&body.host, &body.cookie)
        .await?;
    Ok(Json(updated.cookies.clone()))
}
