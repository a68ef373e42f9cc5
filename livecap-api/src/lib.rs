// Module: livecap-api
// HTTP/JSON REST API and SSE surface over the core services.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod sse;
pub mod state;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};
pub use sse::SseHub;
pub use state::AppState;

/// Create the HTTP router with all `/api` routes.
///
/// `web_root` is the registration hook for the static web UI (out of the
/// core's scope): when given, it is merged under Basic auth.
pub fn create_router(state: AppState, web_root: Option<Router<AppState>>) -> Router {
    let api = Router::new()
        .route("/info", get(handlers::info::get_info))
        .route(
            "/config",
            get(handlers::config::get_config)
                .put(handlers::config::put_config)
                .patch(handlers::config::patch_config),
        )
        .route("/config/effective", get(handlers::config::get_effective_config))
        .route("/config/platforms", get(handlers::config::get_platforms))
        .route(
            "/config/platforms/:platform",
            put(handlers::config::put_platform)
                .patch(handlers::config::put_platform)
                .delete(handlers::config::delete_platform),
        )
        .route(
            "/config/rooms/id/:id",
            put(handlers::config::put_room_config_by_id)
                .patch(handlers::config::patch_room_config_by_id),
        )
        .route(
            "/config/rooms/*url",
            put(handlers::config::put_room_config).patch(handlers::config::patch_room_config),
        )
        .route(
            "/raw-config",
            get(handlers::config::get_raw_config).put(handlers::config::put_raw_config),
        )
        .route(
            "/lives",
            get(handlers::lives::list_lives).post(handlers::lives::add_lives),
        )
        .route(
            "/lives/:id",
            get(handlers::lives::get_live).delete(handlers::lives::remove_live),
        )
        .route("/lives/:id/:action", get(handlers::lives::live_action))
        .route("/tasks", get(handlers::tasks::list_tasks))
        .route("/tasks/stats", get(handlers::tasks::get_stats))
        .route("/tasks/clear-completed", post(handlers::tasks::clear_completed))
        .route(
            "/tasks/:id",
            get(handlers::tasks::get_task).delete(handlers::tasks::delete_task),
        )
        .route("/tasks/:id/cancel", post(handlers::tasks::cancel_task))
        .route("/tasks/:id/requeue", post(handlers::tasks::requeue_task))
        .route("/tasks/:id/priority", put(handlers::tasks::update_priority))
        .route(
            "/cookies",
            get(handlers::cookies::get_cookies).put(handlers::cookies::put_cookie),
        )
        .route("/sse", get(handlers::sse_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::api_key_auth,
        ));

    let mut router = Router::new().nest("/api", api);
    if let Some(web_root) = web_root {
        router = router.merge(web_root.layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::basic_auth,
        )));
    }

    router
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
