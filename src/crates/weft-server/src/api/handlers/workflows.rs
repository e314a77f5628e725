//! Workflow endpoints: validate, save, diff, publish, streaming execute,
//! and metadata refresh

use crate::api::response;
use crate::api::routes::AppState;
use crate::error::{ApiError, ApiResult};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;
use weft_engine::{EventBus, Run, TriggerKind};
use weft_graph::{
    check_promotion, diff_with_metadata, normalize_draft, Environment, GraphError, Workflow,
};
use weft_registry::CancelSignal;
use weft_validate::{validate, ValidateOptions};

fn parse_workflow_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid workflow id '{}'", raw)))
}

/// Validate a draft graph
///
/// POST /api/workflows/validate
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub graph: Value,
    #[serde(default)]
    pub options: Option<ValidateOptionsBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOptionsBody {
    #[serde(default)]
    pub large_fan_out_threshold: Option<usize>,
}

pub async fn validate_workflow(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<impl IntoResponse> {
    let graph = normalize_draft(&req.graph);
    let mut options = ValidateOptions {
        large_fan_out_threshold: state.config.execution.large_fan_out_threshold,
    };
    if let Some(body) = req.options {
        if let Some(threshold) = body.large_fan_out_threshold {
            options.large_fan_out_threshold = threshold;
        }
    }

    let report = validate(&graph, &state.index.snapshot(), &options);
    Ok(response::ok_with("validation", report))
}

/// Save a draft workflow
///
/// POST /api/flows/save
#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub graph: Value,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

pub async fn save_workflow(
    State(state): State<AppState>,
    Json(req): Json<SaveRequest>,
) -> ApiResult<impl IntoResponse> {
    let graph = normalize_draft(&req.graph);

    let mut workflow = match &req.id {
        Some(raw) => {
            let id = parse_workflow_id(raw)?;
            match state.workflows.find_by_id(id).await? {
                Some(existing) => existing,
                None => Workflow {
                    id,
                    ..Workflow::new(req.name.clone(), graph.clone())
                },
            }
        }
        None => Workflow::new(req.name.clone(), graph.clone()),
    };
    workflow.name = req.name;
    workflow.graph = graph;
    if let Some(metadata) = req.metadata {
        workflow.metadata = metadata;
    }

    let stored = state.workflows.save(&workflow).await?;
    tracing::info!(workflow_id = %stored.id, version = stored.version, "Workflow saved");

    let mut fields = Map::new();
    fields.insert("workflowId".into(), json!(stored.id));
    fields.insert("version".into(), json!(stored.version));
    Ok(response::ok_fields(fields))
}

/// Diff the draft against the latest production revision
///
/// GET /api/workflows/:id/diff/prod
pub async fn diff_against_production(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_workflow_id(&id)?;
    let workflow = state
        .workflows
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow {}", id)))?;

    let snapshot = state.index.snapshot();
    let diff = match state
        .workflows
        .latest_revision(id, Environment::Production)
        .await?
    {
        Some(revision) => diff_with_metadata(
            &revision.graph,
            &revision.metadata,
            &workflow.graph,
            &workflow.metadata,
            snapshot.as_ref(),
        ),
        // Nothing published yet: everything is an addition.
        None => diff_with_metadata(
            &Default::default(),
            &Map::new(),
            &workflow.graph,
            &workflow.metadata,
            snapshot.as_ref(),
        ),
    };

    let mut body = serde_json::to_value(&diff).map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Some(obj) = body.as_object_mut() {
        obj.insert("summary".into(), json!(diff.summary()));
    }
    Ok(response::ok_with("diff", body))
}

/// Publish the draft to an environment
///
/// POST /api/workflows/:id/publish
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub environment: String,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

pub async fn publish_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_workflow_id(&id)?;
    let environment = Environment::parse(&req.environment)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid environment '{}'", req.environment)))?;
    let workflow = state
        .workflows
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow {}", id)))?;

    // Request metadata overlays the draft's for this publish.
    let mut metadata = workflow.metadata.clone();
    if let Some(extra) = &req.metadata {
        for (key, value) in extra {
            metadata.insert(key.clone(), value.clone());
        }
    }

    let snapshot = state.index.snapshot();
    let diff = match state.workflows.latest_revision(id, environment).await? {
        Some(revision) => diff_with_metadata(
            &revision.graph,
            &revision.metadata,
            &workflow.graph,
            &metadata,
            snapshot.as_ref(),
        ),
        None => Default::default(),
    };

    match check_promotion(&diff, environment, &metadata) {
        Ok(()) => {}
        Err(GraphError::MigrationPlanRequired(msg)) => {
            return Err(ApiError::MigrationPlanRequired(msg));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }

    let revision = state.workflows.publish(&workflow, environment, metadata).await?;
    tracing::info!(
        workflow_id = %id,
        revision_id = %revision.id,
        environment = %environment,
        breaking = diff.breaking_changes.len(),
        "Workflow published"
    );

    let mut fields = Map::new();
    fields.insert("revisionId".into(), json!(revision.id));
    Ok(response::ok_fields(fields))
}

/// Execute a graph directly, streaming newline-delimited events
///
/// POST /api/workflows/:id/execute
///
/// This is the editor's "validate" button: a real, non-persisted execution.
/// No run row is created; the caller observes the stream and nothing else.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub graph: Value,
    #[serde(default)]
    pub initial_data: Option<Value>,
}

pub async fn execute_workflow_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<impl IntoResponse> {
    let workflow_id = parse_workflow_id(&id)?;
    let graph = normalize_draft(&req.graph);

    // Reject invalid graphs before streaming anything.
    let report = validate(
        &graph,
        &state.index.snapshot(),
        &ValidateOptions {
            large_fan_out_threshold: state.config.execution.large_fan_out_threshold,
        },
    );
    if !report.valid {
        return Err(ApiError::ValidationFailed(report));
    }

    let run = Run::new(
        workflow_id,
        Uuid::new_v4(),
        TriggerKind::Manual,
        req.initial_data.unwrap_or_else(|| json!({})),
    );

    let (mut events, mut persistent_rx, live_rx) =
        EventBus::with_live(run.id, state.config.queue.live_buffer);
    // Direct executions are observe-only; drain the persistent side.
    tokio::spawn(async move { while persistent_rx.recv().await.is_some() {} });

    let dispatcher = state.dispatcher.clone();
    let cancel = CancelSignal::new();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.execute(&run, &graph, &mut events, cancel).await {
            tracing::warn!(run_id = %run.id, error = %e, "Direct execution failed");
        }
    });

    let stream = ReceiverStream::new(live_rx)
        .map(|event| Ok::<_, std::convert::Infallible>(event.to_ndjson_line()));
    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    ))
}

/// Refresh resolver metadata for a node position
///
/// POST /api/workflows/metadata/refresh
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRefreshRequest {
    pub app: String,
    pub operation: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

pub async fn refresh_metadata(
    State(state): State<AppState>,
    Json(req): Json<MetadataRefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let resolved = state
        .resolver
        .resolve(&req.app, &req.operation, &req.params)
        .await;

    let mut fields = Map::new();
    fields.insert("metadata".into(), json!(resolved.hints));
    fields.insert("cacheHit".into(), json!(resolved.cache_hit));
    if let Some(diagnostic) = resolved.diagnostic {
        fields.insert("diagnostic".into(), json!(diagnostic));
    }
    Ok(response::ok_fields(fields))
}
