use axum::Json;
use serde_json::json;

/// Liveness probe
///
/// Endpoint: `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
