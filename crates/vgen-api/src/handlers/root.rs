//! Root greeting handler.

use axum::Json;
use serde_json::{json, Value};

/// `GET /`
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello, World!" }))
}
