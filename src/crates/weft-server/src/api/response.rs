//! API response helpers
//!
//! Success responses share the `{ success: true, ... }` envelope the editor
//! expects; error envelopes come from [`crate::error::ApiError`].

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Create a 200 OK envelope with extra top-level fields
///
/// `fields` merge next to `success: true`, matching the flat envelopes of
/// the HTTP surface (`{ success, workflowId }`, `{ success, validation }`).
pub fn ok_with<T: Serialize>(key: &str, value: T) -> impl IntoResponse {
    let mut body = Map::new();
    body.insert("success".to_string(), json!(true));
    body.insert(
        key.to_string(),
        serde_json::to_value(value).unwrap_or(Value::Null),
    );
    (StatusCode::OK, Json(Value::Object(body)))
}

/// Create a 200 OK envelope from a prebuilt map of fields
pub fn ok_fields(fields: Map<String, Value>) -> impl IntoResponse {
    let mut body = Map::new();
    body.insert("success".to_string(), json!(true));
    for (key, value) in fields {
        body.insert(key, value);
    }
    (StatusCode::OK, Json(Value::Object(body)))
}

/// Create a bare `{ success: true }` response
pub fn ok_empty() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "success": true })))
}
