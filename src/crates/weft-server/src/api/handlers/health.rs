//! Health surfaces: queue health and worker heartbeats

use crate::api::response;
use crate::api::routes::AppState;
use crate::error::{ApiError, ApiResult};
use crate::queue::WorkerRole;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

/// Cached queue health
///
/// GET /api/health/queue
pub async fn queue_health(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(response::ok_with("queue", state.queue.health()))
}

/// Fleet heartbeat summary
///
/// GET /api/workers/heartbeat
pub async fn fleet_summary(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(response::ok_with("workers", state.workers.summary()))
}

/// Record a worker heartbeat
///
/// POST /api/workers/heartbeat
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub roles: Vec<String>,
}

pub async fn post_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.worker_id.trim().is_empty() {
        return Err(ApiError::BadRequest("workerId must not be empty".into()));
    }
    let roles: Vec<WorkerRole> = req
        .roles
        .iter()
        .map(|raw| {
            WorkerRole::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid role '{}'", raw)))
        })
        .collect::<ApiResult<_>>()?;

    state.workers.record(req.worker_id, roles);
    Ok(response::ok_empty())
}

/// Plain liveness probe
///
/// GET /health
pub async fn liveness() -> impl IntoResponse {
    response::ok_empty()
}
