//! Run, node-execution, and run-event repository

use crate::db::Database;
use crate::error::{Result, ServerError};
use chrono::{TimeZone, Utc};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;
use weft_engine::{
    NodeDiagnostics, NodeError, NodeExecution, NodeExecutionStatus, RetryRecord, Run, RunEvent,
    RunStatus, TriggerKind,
};

/// Repository for runs, their node executions, and the durable event log
#[derive(Clone, Debug)]
pub struct RunRepository {
    db: Arc<Database>,
}

impl RunRepository {
    /// New repository over the shared database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a freshly admitted run
    pub async fn create(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, workflow_id, revision_id, status, trigger_kind, initial_data,
                               correlation_id, created_at, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)",
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run.revision_id.to_string())
        .bind(run.status.as_str())
        .bind(run.trigger.as_str())
        .bind(serde_json::to_string(&run.initial_data)?)
        .bind(&run.correlation_id)
        .bind(run.created_at.timestamp())
        .execute(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to create run: {}", e)))?;
        Ok(())
    }

    /// Move a run to a new status, stamping start/finish times
    pub async fn update_status(&self, run_id: Uuid, status: RunStatus) -> Result<()> {
        let now = Utc::now().timestamp();
        let query = match status {
            RunStatus::Running => {
                "UPDATE runs SET status = ?, started_at = ? WHERE id = ?"
            }
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled => {
                "UPDATE runs SET status = ?, finished_at = ? WHERE id = ?"
            }
            RunStatus::Queued => "UPDATE runs SET status = ?, created_at = created_at WHERE id = ?",
        };
        let mut q = sqlx::query(query).bind(status.as_str());
        if status != RunStatus::Queued {
            q = q.bind(now);
        }
        q.bind(run_id.to_string())
            .execute(self.db.pool())
            .await
            .map_err(|e| ServerError::Database(format!("Failed to update run: {}", e)))?;
        Ok(())
    }

    /// Load a run by id
    pub async fn find_by_id(&self, run_id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, revision_id, status, trigger_kind, initial_data,
                    correlation_id, created_at, started_at, finished_at
             FROM runs WHERE id = ?",
        )
        .bind(run_id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to load run: {}", e)))?;

        row.map(|row| row_to_run(&row)).transpose()
    }

    /// Runs of one workflow, newest first
    pub async fn list_for_workflow(&self, workflow_id: Uuid, limit: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT id, workflow_id, revision_id, status, trigger_kind, initial_data,
                    correlation_id, created_at, started_at, finished_at
             FROM runs WHERE workflow_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to list runs: {}", e)))?;

        rows.iter().map(row_to_run).collect()
    }

    /// Upsert the record of one `(run, node, attempt)`
    pub async fn upsert_node_execution(&self, exec: &NodeExecution) -> Result<()> {
        sqlx::query(
            "INSERT INTO node_executions (run_id, node_id, attempt, max_attempts, status, input,
                                          output, error, duration_ms, retry_history, diagnostics)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(run_id, node_id, attempt) DO UPDATE SET
                 max_attempts = excluded.max_attempts,
                 status = excluded.status,
                 input = excluded.input,
                 output = excluded.output,
                 error = excluded.error,
                 duration_ms = excluded.duration_ms,
                 retry_history = excluded.retry_history,
                 diagnostics = excluded.diagnostics",
        )
        .bind(exec.run_id.to_string())
        .bind(&exec.node_id)
        .bind(exec.attempt as i64)
        .bind(exec.max_attempts as i64)
        .bind(exec.status.as_str())
        .bind(exec.input.as_ref().map(serde_json::to_string).transpose()?)
        .bind(exec.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(exec.error.as_ref().map(serde_json::to_string).transpose()?)
        .bind(exec.duration_ms.map(|d| d as i64))
        .bind(serde_json::to_string(&exec.retry_history)?)
        .bind(serde_json::to_string(&exec.diagnostics)?)
        .execute(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to upsert node execution: {}", e)))?;
        Ok(())
    }

    /// All node executions of a run
    pub async fn node_executions(&self, run_id: Uuid) -> Result<Vec<NodeExecution>> {
        let rows = sqlx::query(
            "SELECT run_id, node_id, attempt, max_attempts, status, input, output, error,
                    duration_ms, retry_history, diagnostics
             FROM node_executions WHERE run_id = ?
             ORDER BY node_id, attempt",
        )
        .bind(run_id.to_string())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to load node executions: {}", e)))?;

        rows.iter()
            .map(|row| {
                let run_id: String = row.get("run_id");
                let status: String = row.get("status");
                let input: Option<String> = row.get("input");
                let output: Option<String> = row.get("output");
                let error: Option<String> = row.get("error");
                let retry_history: String = row.get("retry_history");
                let diagnostics: String = row.get("diagnostics");
                Ok(NodeExecution {
                    run_id: Uuid::parse_str(&run_id)
                        .map_err(|e| ServerError::Database(format!("Bad run id: {}", e)))?,
                    node_id: row.get("node_id"),
                    attempt: row.get::<i64, _>("attempt") as u32,
                    max_attempts: row.get::<i64, _>("max_attempts") as u32,
                    status: parse_node_status(&status)?,
                    input: input.map(|s| serde_json::from_str(&s)).transpose()?,
                    output: output.map(|s| serde_json::from_str(&s)).transpose()?,
                    error: error
                        .map(|s| serde_json::from_str::<NodeError>(&s))
                        .transpose()?,
                    duration_ms: row
                        .get::<Option<i64>, _>("duration_ms")
                        .map(|d| d as u64),
                    retry_history: serde_json::from_str::<Vec<RetryRecord>>(&retry_history)?,
                    diagnostics: serde_json::from_str::<NodeDiagnostics>(&diagnostics)?,
                })
            })
            .collect()
    }

    /// Append one event to the durable run log
    ///
    /// Idempotent on `(run_id, node_id, attempt, type)`: replayed duplicates
    /// are discarded. Run-scoped events use the empty node id and attempt 0.
    pub async fn append_event(&self, event: &RunEvent) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO run_events (run_id, node_id, attempt, event_type, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.run_id().to_string())
        .bind(event.node_id().unwrap_or_default())
        .bind(event.attempt().unwrap_or(0) as i64)
        .bind(event.type_str())
        .bind(serde_json::to_string(event)?)
        .bind(event.timestamp().timestamp_millis())
        .execute(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to append event: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// The durable event log of a run, in append order
    pub async fn events(&self, run_id: Uuid) -> Result<Vec<RunEvent>> {
        let rows = sqlx::query(
            "SELECT payload FROM run_events WHERE run_id = ? ORDER BY created_at, rowid",
        )
        .bind(run_id.to_string())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to load events: {}", e)))?;

        rows.iter()
            .map(|row| {
                let payload: String = row.get("payload");
                Ok(serde_json::from_str::<RunEvent>(&payload)?)
            })
            .collect()
    }
}

fn parse_node_status(s: &str) -> Result<NodeExecutionStatus> {
    match s {
        "pending" => Ok(NodeExecutionStatus::Pending),
        "running" => Ok(NodeExecutionStatus::Running),
        "succeeded" => Ok(NodeExecutionStatus::Succeeded),
        "failed" => Ok(NodeExecutionStatus::Failed),
        "skipped" => Ok(NodeExecutionStatus::Skipped),
        other => Err(ServerError::Database(format!(
            "Bad node execution status '{}'",
            other
        ))),
    }
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<Run> {
    let id: String = row.get("id");
    let workflow_id: String = row.get("workflow_id");
    let revision_id: String = row.get("revision_id");
    let status: String = row.get("status");
    let trigger: String = row.get("trigger_kind");
    let initial_data: String = row.get("initial_data");
    let created_at: i64 = row.get("created_at");

    Ok(Run {
        id: Uuid::parse_str(&id)
            .map_err(|e| ServerError::Database(format!("Bad run id: {}", e)))?,
        workflow_id: Uuid::parse_str(&workflow_id)
            .map_err(|e| ServerError::Database(format!("Bad workflow id: {}", e)))?,
        revision_id: Uuid::parse_str(&revision_id)
            .map_err(|e| ServerError::Database(format!("Bad revision id: {}", e)))?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| ServerError::Database(format!("Bad run status '{}'", status)))?,
        trigger: TriggerKind::parse(&trigger)
            .ok_or_else(|| ServerError::Database(format!("Bad trigger '{}'", trigger)))?,
        initial_data: serde_json::from_str(&initial_data)?,
        correlation_id: row.get("correlation_id"),
        created_at: Utc
            .timestamp_opt(created_at, 0)
            .single()
            .unwrap_or_else(Utc::now),
        started_at: row
            .get::<Option<i64>, _>("started_at")
            .and_then(|t| Utc.timestamp_opt(t, 0).single()),
        finished_at: row
            .get::<Option<i64>, _>("finished_at")
            .and_then(|t| Utc.timestamp_opt(t, 0).single()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn repo() -> (RunRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("weft.db")).await.unwrap();
        (RunRepository::new(Arc::new(db)), dir)
    }

    fn sample_run() -> Run {
        Run::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TriggerKind::Manual,
            json!({ "seed": true }),
        )
    }

    #[tokio::test]
    async fn test_create_and_status_transitions() {
        let (repo, _dir) = repo().await;
        let run = sample_run();
        repo.create(&run).await.unwrap();

        let loaded = repo.find_by_id(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
        assert_eq!(loaded.initial_data, json!({ "seed": true }));

        repo.update_status(run.id, RunStatus::Running).await.unwrap();
        let running = repo.find_by_id(run.id).await.unwrap().unwrap();
        assert_eq!(running.status, RunStatus::Running);
        assert!(running.started_at.is_some());

        repo.update_status(run.id, RunStatus::Succeeded).await.unwrap();
        let done = repo.find_by_id(run.id).await.unwrap().unwrap();
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_node_execution_round_trip() {
        let (repo, _dir) = repo().await;
        let run = sample_run();
        repo.create(&run).await.unwrap();

        let mut exec = NodeExecution::pending(run.id, "A", 3);
        exec.attempt = 2;
        exec.status = NodeExecutionStatus::Succeeded;
        exec.output = Some(json!({ "status": 200 }));
        exec.retry_history = vec![RetryRecord {
            attempt: 1,
            error: NodeError {
                kind: weft_registry::ErrorKind::RateLimited,
                message: "429".into(),
            },
            delay_ms: 512,
            at: Utc::now(),
        }];
        repo.upsert_node_execution(&exec).await.unwrap();

        // Upsert with the same key replaces.
        exec.output = Some(json!({ "status": 201 }));
        repo.upsert_node_execution(&exec).await.unwrap();

        let loaded = repo.node_executions(run.id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].output, Some(json!({ "status": 201 })));
        assert_eq!(loaded[0].retry_history.len(), 1);
        assert_eq!(loaded[0].retry_history[0].delay_ms, 512);
    }

    #[tokio::test]
    async fn test_event_append_is_idempotent() {
        let (repo, _dir) = repo().await;
        let run = sample_run();
        repo.create(&run).await.unwrap();

        let event = RunEvent::NodeStart {
            timestamp: Utc::now(),
            run_id: run.id,
            node_id: "A".into(),
        };
        assert!(repo.append_event(&event).await.unwrap());
        // Replay of the same (run, node, attempt, type) is discarded.
        assert!(!repo.append_event(&event).await.unwrap());

        let other = RunEvent::NodeAttempt {
            timestamp: Utc::now(),
            run_id: run.id,
            node_id: "A".into(),
            attempt: 1,
        };
        assert!(repo.append_event(&other).await.unwrap());

        let events = repo.events(run.id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_list_for_workflow() {
        let (repo, _dir) = repo().await;
        let workflow_id = Uuid::new_v4();
        for _ in 0..3 {
            let mut run = sample_run();
            run.workflow_id = workflow_id;
            repo.create(&run).await.unwrap();
        }
        repo.create(&sample_run()).await.unwrap();

        let runs = repo.list_for_workflow(workflow_id, 10).await.unwrap();
        assert_eq!(runs.len(), 3);
    }
}
