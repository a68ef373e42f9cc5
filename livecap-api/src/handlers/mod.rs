pub mod config;
pub mod cookies;
pub mod info;
pub mod lives;
pub mod tasks;

use axum::extract::{Query, State};
use axum::response::sse::Sse;
use livecap_core::live::LiveId;
use serde::Deserialize;

use crate::sse::sse_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    /// Optional detail-channel subscription to one room.
    pub room: Option<String>,
}

pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
) -> Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>
{
    let room = query.room.map(LiveId::from_raw);
    sse_response(&state.sse, room)
}
