//! API route definitions
//!
//! Wires the HTTP surface to the handlers and carries the shared
//! application state.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::config::WeftConfig;
use crate::queue::{AdmissionControl, RunQueue, WorkerRegistry};
use crate::repositories::{RunRepository, WorkflowRepository};
use weft_engine::Dispatcher;
use weft_registry::{CapabilityIndex, MetadataResolver, RuntimeRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WeftConfig>,
    pub workflows: WorkflowRepository,
    pub runs: RunRepository,
    pub index: Arc<CapabilityIndex>,
    pub runtimes: Arc<RuntimeRegistry>,
    pub resolver: Arc<MetadataResolver>,
    pub dispatcher: Arc<Dispatcher>,
    pub admission: Arc<AdmissionControl>,
    pub queue: Arc<RunQueue>,
    pub workers: Arc<WorkerRegistry>,
}

/// Build the complete API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness
        .route("/health", get(handlers::health::liveness))
        // Workflow endpoints
        .route(
            "/api/workflows/validate",
            post(handlers::workflows::validate_workflow),
        )
        .route("/api/flows/save", post(handlers::workflows::save_workflow))
        .route(
            "/api/workflows/:id/diff/prod",
            get(handlers::workflows::diff_against_production),
        )
        .route(
            "/api/workflows/:id/publish",
            post(handlers::workflows::publish_workflow),
        )
        .route(
            "/api/workflows/:id/execute",
            post(handlers::workflows::execute_workflow_stream),
        )
        .route(
            "/api/workflows/metadata/refresh",
            post(handlers::workflows::refresh_metadata),
        )
        // Execution endpoints
        .route(
            "/api/executions",
            post(handlers::executions::enqueue_execution)
                .get(handlers::executions::list_executions),
        )
        .route(
            "/api/executions/:id",
            get(handlers::executions::get_execution),
        )
        // Registry endpoints
        .route("/api/registry/catalog", get(handlers::registry::catalog))
        .route("/api/registry/op-schema", get(handlers::registry::op_schema))
        .route("/api/registry/refresh", post(handlers::registry::refresh_index))
        // Health surfaces
        .route("/api/health/queue", get(handlers::health::queue_health))
        .route(
            "/api/workers/heartbeat",
            get(handlers::health::fleet_summary).post(handlers::health::post_heartbeat),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
