use axum::Json;
use livecap_core::appinfo::AppInfo;

pub async fn get_info() -> Json<AppInfo> {
    Json(AppInfo::collect())
}
