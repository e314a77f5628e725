//! Run admission
//!
//! The ordered gate every run passes before reaching a worker: queue
//! health, workflow existence (with just-in-time development publish for
//! drafts that were never published), execution quota, per-connector
//! in-flight caps, then cross-cutting usage quotas. Only after all five
//! does a run row exist and an entry land on the queue.

use super::quota::QuotaService;
use super::{QueueEntry, RunQueue, WorkerRegistry};
use crate::error::{AdmissionError, ApiError, ApiResult};
use crate::repositories::{RunRepository, WorkflowRepository};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use weft_engine::{Run, TriggerKind};
use weft_graph::{Environment, Revision, WorkflowGraph};

/// A request to execute a workflow
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Workflow to run
    pub workflow_id: Uuid,
    /// What started it
    pub trigger: TriggerKind,
    /// Initial trigger payload
    pub initial_data: Value,
}

/// The admission pipeline
pub struct AdmissionControl {
    queue: Arc<RunQueue>,
    workers: Arc<WorkerRegistry>,
    workflows: WorkflowRepository,
    runs: RunRepository,
    quotas: Arc<dyn QuotaService>,
}

impl AdmissionControl {
    /// Build the pipeline over its collaborators
    pub fn new(
        queue: Arc<RunQueue>,
        workers: Arc<WorkerRegistry>,
        workflows: WorkflowRepository,
        runs: RunRepository,
        quotas: Arc<dyn QuotaService>,
    ) -> Self {
        Self {
            queue,
            workers,
            workflows,
            runs,
            quotas,
        }
    }

    /// Admit and enqueue a run, or reject with the first failing check
    pub async fn enqueue(&self, request: RunRequest) -> ApiResult<Uuid> {
        // 1. Queue health; a fleet without an execution worker counts as
        //    unavailable.
        let health = self.queue.health();
        if !health.admits() {
            return Err(AdmissionError::QueueUnavailable(health.message).into());
        }
        if !self.workers.summary().has_execution_worker {
            return Err(
                AdmissionError::QueueUnavailable("no execution worker alive".to_string()).into(),
            );
        }

        // 2. Workflow exists; resolve the revision it will run against.
        let workflow = self
            .workflows
            .find_by_id(request.workflow_id)
            .await?
            .ok_or_else(|| {
                AdmissionError::WorkflowNotFound(request.workflow_id.to_string())
            })?;
        let (revision, jit_published) = self.resolve_revision(&workflow).await?;
        let connectors = connector_set(&revision.graph);

        // 3-5. Quotas, in spec order.
        self.quotas.check_execution_quota().map_err(ApiError::from)?;
        self.quotas
            .check_connector_concurrency(&connectors)
            .map_err(ApiError::from)?;
        self.quotas.check_usage_quotas().map_err(ApiError::from)?;

        // 6. Persist the queued run and push the first attempt.
        let run = Run::new(
            workflow.id,
            revision.id,
            request.trigger,
            request.initial_data,
        );
        self.runs.create(&run).await?;
        if jit_published {
            // Pre-flight publishes surface on the run's durable log.
            self.runs
                .append_event(&weft_engine::RunEvent::Deployment {
                    timestamp: chrono::Utc::now(),
                    run_id: run.id,
                    revision_id: revision.id,
                    environment: revision.environment.as_str().to_string(),
                })
                .await?;
        }
        self.queue.push(QueueEntry {
            run_id: run.id,
            attempt: 1,
        });
        self.quotas.record_admission(&connectors);

        info!(run_id = %run.id, workflow_id = %workflow.id, "Run admitted");
        Ok(run.id)
    }

    /// The revision a new run executes: latest production, else latest
    /// development, else a just-in-time development publish of the draft
    ///
    /// The second element is true when a JIT publish happened.
    async fn resolve_revision(
        &self,
        workflow: &weft_graph::Workflow,
    ) -> ApiResult<(Revision, bool)> {
        if let Some(revision) = self
            .workflows
            .latest_revision(workflow.id, Environment::Production)
            .await?
        {
            return Ok((revision, false));
        }
        if let Some(revision) = self
            .workflows
            .latest_revision(workflow.id, Environment::Development)
            .await?
        {
            return Ok((revision, false));
        }
        let revision = self
            .workflows
            .publish(workflow, Environment::Development, workflow.metadata.clone())
            .await?;
        info!(workflow_id = %workflow.id, revision_id = %revision.id, "Just-in-time development publish");
        Ok((revision, true))
    }
}

impl std::fmt::Debug for AdmissionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionControl").finish_non_exhaustive()
    }
}

/// Distinct connector ids a graph touches, sorted
pub fn connector_set(graph: &WorkflowGraph) -> Vec<String> {
    let set: BTreeSet<String> = graph.nodes.iter().map(|n| n.app.clone()).collect();
    set.into_iter().collect()
}
