//! Health and version endpoints

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::AppState;

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /version
pub async fn version(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "version": state.version }))
}
