//! The weft server
//!
//! Wires the engine crates into a running service: SQLite persistence,
//! capability index over the built-in connector runtimes, queue and
//! admission control with a background health probe, an in-process
//! execution worker, and the axum HTTP surface.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod queue;
pub mod repositories;
pub mod shutdown;

pub use api::{create_router, AppState};
pub use config::WeftConfig;
pub use db::Database;
pub use error::{ApiError, Result, ServerError};

use crate::queue::{
    spawn_health_probe, AdmissionControl, ExecutionWorker, InMemoryQuotaService, RunQueue,
    WorkerRegistry,
};
use crate::repositories::{RunRepository, WorkflowRepository};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use weft_engine::{
    CachedLlmMapper, ConnectorLimiter, Dispatcher, DispatcherConfig, RetryPolicy,
    UnconfiguredLlmMapper,
};
use weft_registry::{
    builtin_connectors, CancelSignal, CapabilityIndex, CatalogSnapshot, MetadataResolver,
};
use weft_validate::ValidateOptions;

/// A fully wired application
pub struct App {
    /// Shared state behind every handler
    pub state: AppState,
    /// Process-wide shutdown signal
    pub shutdown: CancelSignal,
    background: Vec<tokio::task::JoinHandle<()>>,
}

impl App {
    /// Build the application over a database path
    ///
    /// Spawns the queue health probe and one in-process execution worker;
    /// both stop when the shutdown signal trips.
    pub async fn build(config: WeftConfig, database_path: impl AsRef<Path>) -> Result<Self> {
        let config = Arc::new(config);
        let db = Arc::new(Database::new(database_path).await?);
        let workflows = WorkflowRepository::new(db.clone());
        let runs = RunRepository::new(db.clone());

        let runtimes = Arc::new(weft_connectors::builtin_runtimes());
        let snapshot = CatalogSnapshot::build(
            builtin_connectors(),
            &runtimes.implemented_operations(),
        );
        let concurrency_caps = snapshot.concurrency_caps();
        let index = Arc::new(CapabilityIndex::new(snapshot));
        let resolver = Arc::new(MetadataResolver::new(runtimes.clone()));

        let dispatcher = Arc::new(Dispatcher::new(
            index.clone(),
            runtimes.clone(),
            Arc::new(CachedLlmMapper::new(Arc::new(UnconfiguredLlmMapper))),
            Arc::new(ConnectorLimiter::new(concurrency_caps)),
            DispatcherConfig {
                max_in_flight: config.execution.max_in_flight,
                run_deadline: Duration::from_secs(config.execution.run_deadline_secs),
                retry: RetryPolicy::default(),
                validate: ValidateOptions {
                    large_fan_out_threshold: config.execution.large_fan_out_threshold,
                },
            },
        ));

        let queue = Arc::new(RunQueue::new(Duration::from_secs(
            config.queue.visibility_timeout_secs,
        )));
        let workers = Arc::new(WorkerRegistry::new(Duration::from_secs(
            config.queue.heartbeat_ttl_secs,
        )));
        let quotas = Arc::new(InMemoryQuotaService::new(config.quotas.clone()));
        let admission = Arc::new(AdmissionControl::new(
            queue.clone(),
            workers.clone(),
            workflows.clone(),
            runs.clone(),
            quotas.clone(),
        ));

        let shutdown = CancelSignal::new();
        let probe = spawn_health_probe(
            queue.clone(),
            db.clone(),
            Duration::from_secs(config.queue.health_interval_secs),
            Duration::from_millis(config.queue.warn_latency_ms),
            shutdown.clone(),
        );
        let worker = ExecutionWorker::new(
            format!("worker-{}", uuid::Uuid::new_v4()),
            queue.clone(),
            workers.clone(),
            workflows.clone(),
            runs.clone(),
            dispatcher.clone(),
            quotas.clone(),
            shutdown.clone(),
        )
        .spawn();

        let state = AppState {
            config,
            workflows,
            runs,
            index,
            runtimes,
            resolver,
            dispatcher,
            admission,
            queue,
            workers,
        };

        Ok(Self {
            state,
            shutdown,
            background: vec![probe, worker],
        })
    }

    /// The HTTP router over this app's state
    pub fn router(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    /// Trip shutdown and wait for background tasks
    pub async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.background {
            let _ = handle.await;
        }
    }
}
