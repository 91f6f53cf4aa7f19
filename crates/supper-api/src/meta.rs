//! Liveness and readiness probes. They sit outside the API prefix and need
//! no session.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde_json::json;
use tracing::warn;

use crate::AppState;
use crate::service::run_db;

pub fn routes() -> Router<AppState> {
    Router::new().route("/_meta_/live", get(live)).route("/_meta_/ready", get(ready))
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match run_db(&state.db, |db| Ok(db.ping()?)).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "unavailable" })))
        }
    }
}
