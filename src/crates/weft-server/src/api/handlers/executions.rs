//! Execution endpoints: enqueue and retrieval

use crate::api::response;
use crate::api::routes::AppState;
use crate::error::{ApiError, ApiResult};
use crate::queue::RunRequest;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;
use weft_engine::TriggerKind;
use weft_validate::{validate, ValidateOptions};

/// Admit and enqueue a run
///
/// POST /api/executions
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub initial_data: Option<Value>,
}

pub async fn enqueue_execution(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<impl IntoResponse> {
    let workflow_id = Uuid::parse_str(&req.workflow_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid workflow id '{}'", req.workflow_id)))?;
    let trigger = match req.trigger_type.as_deref() {
        None => TriggerKind::Manual,
        Some(raw) => TriggerKind::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("invalid trigger type '{}'", raw)))?,
    };

    // Re-reject invalid drafts server-side before admission; the client is
    // not trusted to have validated.
    if let Some(workflow) = state.workflows.find_by_id(workflow_id).await? {
        let report = validate(
            &workflow.graph,
            &state.index.snapshot(),
            &ValidateOptions {
                large_fan_out_threshold: state.config.execution.large_fan_out_threshold,
            },
        );
        if !report.valid {
            return Err(ApiError::ValidationFailed(report));
        }
    }

    let execution_id = state
        .admission
        .enqueue(RunRequest {
            workflow_id,
            trigger,
            initial_data: req.initial_data.unwrap_or_else(|| json!({})),
        })
        .await?;

    let mut fields = Map::new();
    fields.insert("executionId".into(), json!(execution_id));
    Ok(response::ok_fields(fields))
}

/// Fetch a run with its node executions and durable event log
///
/// GET /api/executions/:id
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let run_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("invalid execution id '{}'", id)))?;
    let run = state
        .runs
        .find_by_id(run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("execution {}", run_id)))?;

    let node_executions = state.runs.node_executions(run_id).await?;
    let events = state.runs.events(run_id).await?;

    let mut fields = Map::new();
    fields.insert("execution".into(), json!(run));
    fields.insert("nodeExecutions".into(), json!(node_executions));
    fields.insert("events".into(), json!(events));
    Ok(response::ok_fields(fields))
}

/// List runs of a workflow
///
/// GET /api/executions?workflowId=&limit=
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub workflow_id: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let workflow_id = Uuid::parse_str(&query.workflow_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid workflow id '{}'", query.workflow_id)))?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let runs = state.runs.list_for_workflow(workflow_id, limit).await?;
    Ok(response::ok_with("executions", runs))
}
