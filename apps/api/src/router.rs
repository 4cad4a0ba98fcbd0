use axum::{routing::get, Json, Router};
use serde_json::json;

use appointment_cell::{scheduling_routes, SchedulingState};

pub fn create_router(state: SchedulingState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .merge(scheduling_routes(state))
}
