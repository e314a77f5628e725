//! Execution worker
//!
//! Pulls admitted runs off the queue, dispatches them, and persists the
//! event stream and node records. The worker acks its queue entry when
//! dispatch emits its first `node-start`; a crash before that leaves the
//! entry to the visibility timeout, which redelivers it with the attempt
//! advanced. Redeliveries of runs already seen are recognized from
//! persisted state.

use super::quota::QuotaService;
use super::{QueueEntry, RunQueue, WorkerRegistry, WorkerRole};
use crate::repositories::{RunRepository, WorkflowRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;
use weft_engine::{Dispatcher, EngineError, EventBus, RunEvent, RunStatus};
use weft_registry::CancelSignal;

use super::admission::connector_set;

/// Interval between worker heartbeats
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// The queue-consuming execution worker
pub struct ExecutionWorker {
    worker_id: String,
    queue: Arc<RunQueue>,
    workers: Arc<WorkerRegistry>,
    workflows: WorkflowRepository,
    runs: RunRepository,
    dispatcher: Arc<Dispatcher>,
    quotas: Arc<dyn QuotaService>,
    shutdown: CancelSignal,
}

impl ExecutionWorker {
    /// Build a worker over its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<RunQueue>,
        workers: Arc<WorkerRegistry>,
        workflows: WorkflowRepository,
        runs: RunRepository,
        dispatcher: Arc<Dispatcher>,
        quotas: Arc<dyn QuotaService>,
        shutdown: CancelSignal,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            workers,
            workflows,
            runs,
            dispatcher,
            quotas,
            shutdown,
        }
    }

    /// Run the pull loop until shutdown
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(self) {
        info!(worker_id = %self.worker_id, "Execution worker started");
        self.heartbeat();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                entry = self.queue.pop(&self.shutdown) => {
                    let Some(entry) = entry else {
                        info!(worker_id = %self.worker_id, "Execution worker stopping");
                        return;
                    };
                    self.process(entry).await;
                }
                _ = heartbeat.tick() => self.heartbeat(),
                _ = self.shutdown.cancelled() => {
                    info!(worker_id = %self.worker_id, "Execution worker stopping");
                    return;
                }
            }
        }
    }

    fn heartbeat(&self) {
        self.workers.record(
            self.worker_id.clone(),
            vec![WorkerRole::Execution, WorkerRole::Scheduler, WorkerRole::Timer],
        );
    }

    async fn process(&self, entry: QueueEntry) {
        if let Err(e) = self.process_inner(entry).await {
            error!(run_id = %entry.run_id, error = %e, "Run processing failed");
            let _ = self
                .runs
                .update_status(entry.run_id, RunStatus::Failed)
                .await;
            self.queue.ack(entry.run_id, entry.attempt);
        }
    }

    async fn process_inner(&self, entry: QueueEntry) -> crate::error::Result<()> {
        let Some(run) = self.runs.find_by_id(entry.run_id).await? else {
            warn!(run_id = %entry.run_id, "Queued run no longer exists, dropping");
            self.queue.ack(entry.run_id, entry.attempt);
            return Ok(());
        };

        // Redelivery of an already-finished run: ack and move on.
        if run.status.is_terminal() {
            self.queue.ack(entry.run_id, entry.attempt);
            return Ok(());
        }
        // Redelivery of a run a crashed worker had started: the attempt was
        // advanced by the queue, re-execute from persisted state.
        if run.status == RunStatus::Running {
            warn!(
                run_id = %run.id,
                attempt = entry.attempt,
                "Redelivered run was mid-dispatch, re-executing"
            );
        }

        let Some(revision) = self.workflows.revision_by_id(run.revision_id).await? else {
            error!(run_id = %run.id, revision_id = %run.revision_id, "Revision missing");
            self.runs.update_status(run.id, RunStatus::Failed).await?;
            self.queue.ack(entry.run_id, entry.attempt);
            return Ok(());
        };

        self.runs.update_status(run.id, RunStatus::Running).await?;

        let (mut events, persistent_rx) = EventBus::new(run.id);
        let writer = self.spawn_log_writer(run.id, entry, persistent_rx);

        let cancel = CancelSignal::new();
        let outcome = self
            .dispatcher
            .execute(&run, &revision.graph, &mut events, cancel)
            .await;
        drop(events);
        let _ = writer.await;

        let connectors = connector_set(&revision.graph);
        match outcome {
            Ok(outcome) => {
                let mut api_calls = 0u64;
                let mut tokens = 0u64;
                for exec in &outcome.executions {
                    api_calls += 1;
                    tokens += exec.diagnostics.tokens_used.unwrap_or(0);
                    self.runs.upsert_node_execution(exec).await?;
                }
                self.quotas.add_usage(api_calls, tokens);
                self.runs.update_status(run.id, outcome.status).await?;
                info!(run_id = %run.id, status = outcome.status.as_str(), "Run finished");
            }
            Err(EngineError::ValidationFailed(report)) => {
                warn!(run_id = %run.id, errors = report.errors.len(), "Run rejected by authoritative validation");
                self.runs.update_status(run.id, RunStatus::Failed).await?;
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "Dispatch failed");
                self.runs.update_status(run.id, RunStatus::Failed).await?;
            }
        }

        self.quotas.release_run(&connectors);
        // Ack here covers runs that never reached a node-start (e.g.
        // rejected by validation); earlier acks are idempotent.
        self.queue.ack(entry.run_id, entry.attempt);
        Ok(())
    }

    /// Persist every event; ack the queue entry at the first `node-start`
    fn spawn_log_writer(
        &self,
        run_id: Uuid,
        entry: QueueEntry,
        mut persistent_rx: tokio::sync::mpsc::UnboundedReceiver<RunEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let runs = self.runs.clone();
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let mut acked = false;
            while let Some(event) = persistent_rx.recv().await {
                if !acked && matches!(event, RunEvent::NodeStart { .. }) {
                    queue.ack(entry.run_id, entry.attempt);
                    acked = true;
                }
                if let Err(e) = runs.append_event(&event).await {
                    error!(run_id = %run_id, error = %e, "Failed to persist run event");
                }
            }
        })
    }
}
