//! Workflow and revision repository

use crate::db::Database;
use crate::error::{Result, ServerError};
use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;
use weft_graph::{Environment, Revision, Workflow, WorkflowGraph};

/// Repository for workflow drafts and published revisions
#[derive(Clone, Debug)]
pub struct WorkflowRepository {
    db: Arc<Database>,
}

impl WorkflowRepository {
    /// New repository over the shared database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or update a draft, bumping its version on update
    ///
    /// Returns the stored workflow with its new version.
    pub async fn save(&self, workflow: &Workflow) -> Result<Workflow> {
        let now = Utc::now().timestamp();
        let graph = serde_json::to_string(&workflow.graph)?;
        let metadata = serde_json::to_string(&workflow.metadata)?;

        let existing_version: Option<i64> =
            sqlx::query("SELECT version FROM workflows WHERE id = ?")
                .bind(workflow.id.to_string())
                .fetch_optional(self.db.pool())
                .await
                .map_err(|e| ServerError::Database(format!("Failed to read workflow: {}", e)))?
                .map(|row| row.get("version"));

        let version = existing_version.map_or(workflow.version, |v| v + 1);

        sqlx::query(
            "INSERT INTO workflows (id, name, version, metadata, graph, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 version = excluded.version,
                 metadata = excluded.metadata,
                 graph = excluded.graph,
                 updated_at = excluded.updated_at",
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(version)
        .bind(&metadata)
        .bind(&graph)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to save workflow: {}", e)))?;

        let mut stored = workflow.clone();
        stored.version = version;
        Ok(stored)
    }

    /// Load a workflow by id
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>> {
        let row = sqlx::query(
            "SELECT id, name, version, metadata, graph FROM workflows WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to load workflow: {}", e)))?;

        row.map(|row| self.row_to_workflow(&row)).transpose()
    }

    /// List all workflows, newest first
    pub async fn list(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT id, name, version, metadata, graph FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to list workflows: {}", e)))?;

        rows.iter().map(|row| self.row_to_workflow(row)).collect()
    }

    fn row_to_workflow(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Workflow> {
        let id: String = row.get("id");
        let metadata: String = row.get("metadata");
        let graph: String = row.get("graph");
        Ok(Workflow {
            id: Uuid::parse_str(&id)
                .map_err(|e| ServerError::Database(format!("Bad workflow id: {}", e)))?,
            name: row.get("name"),
            version: row.get("version"),
            metadata: serde_json::from_str::<Map<String, Value>>(&metadata)?,
            graph: serde_json::from_str::<WorkflowGraph>(&graph)?,
        })
    }

    /// Persist a new published revision
    pub async fn publish(
        &self,
        workflow: &Workflow,
        environment: Environment,
        metadata: Map<String, Value>,
    ) -> Result<Revision> {
        let revision = Revision {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            environment,
            version: workflow.version,
            graph: workflow.graph.clone(),
            metadata,
            published_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO revisions (id, workflow_id, environment, version, graph, metadata, published_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(revision.id.to_string())
        .bind(revision.workflow_id.to_string())
        .bind(environment.as_str())
        .bind(revision.version)
        .bind(serde_json::to_string(&revision.graph)?)
        .bind(serde_json::to_string(&revision.metadata)?)
        .bind(revision.published_at.timestamp())
        .execute(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to publish revision: {}", e)))?;

        Ok(revision)
    }

    /// Latest published revision of a workflow in an environment
    pub async fn latest_revision(
        &self,
        workflow_id: Uuid,
        environment: Environment,
    ) -> Result<Option<Revision>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, environment, version, graph, metadata, published_at
             FROM revisions
             WHERE workflow_id = ? AND environment = ?
             ORDER BY published_at DESC, version DESC
             LIMIT 1",
        )
        .bind(workflow_id.to_string())
        .bind(environment.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to load revision: {}", e)))?;

        row.map(|row| {
            let id: String = row.get("id");
            let workflow_id: String = row.get("workflow_id");
            let environment: String = row.get("environment");
            let graph: String = row.get("graph");
            let metadata: String = row.get("metadata");
            let published_at: i64 = row.get("published_at");
            Ok(Revision {
                id: Uuid::parse_str(&id)
                    .map_err(|e| ServerError::Database(format!("Bad revision id: {}", e)))?,
                workflow_id: Uuid::parse_str(&workflow_id)
                    .map_err(|e| ServerError::Database(format!("Bad workflow id: {}", e)))?,
                environment: Environment::parse(&environment).ok_or_else(|| {
                    ServerError::Database(format!("Bad environment '{}'", environment))
                })?,
                version: row.get("version"),
                graph: serde_json::from_str::<WorkflowGraph>(&graph)?,
                metadata: serde_json::from_str::<Map<String, Value>>(&metadata)?,
                published_at: Utc
                    .timestamp_opt(published_at, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
        })
        .transpose()
    }

    /// Load a revision by id
    pub async fn revision_by_id(&self, id: Uuid) -> Result<Option<Revision>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, environment, version, graph, metadata, published_at
             FROM revisions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| ServerError::Database(format!("Failed to load revision: {}", e)))?;

        row.map(|row| {
            let workflow_id: String = row.get("workflow_id");
            let environment: String = row.get("environment");
            let graph: String = row.get("graph");
            let metadata: String = row.get("metadata");
            let published_at: i64 = row.get("published_at");
            Ok(Revision {
                id,
                workflow_id: Uuid::parse_str(&workflow_id)
                    .map_err(|e| ServerError::Database(format!("Bad workflow id: {}", e)))?,
                environment: Environment::parse(&environment).ok_or_else(|| {
                    ServerError::Database(format!("Bad environment '{}'", environment))
                })?,
                version: row.get("version"),
                graph: serde_json::from_str::<WorkflowGraph>(&graph)?,
                metadata: serde_json::from_str::<Map<String, Value>>(&metadata)?,
                published_at: Utc
                    .timestamp_opt(published_at, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
        })
        .transpose()
    }
}
