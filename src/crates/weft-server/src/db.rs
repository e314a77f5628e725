//! Database management
//!
//! SQLite connection pool plus schema bootstrap. Graphs, metadata, inputs,
//! outputs, and diagnostics persist as JSON text columns; the repositories
//! own (de)serialization. The `run_events` uniqueness constraint is what
//! makes event replay idempotent.

use crate::error::{Result, ServerError};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<DatabasePool>,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        version INTEGER NOT NULL,
        metadata TEXT NOT NULL,
        graph TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS revisions (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        environment TEXT NOT NULL,
        version INTEGER NOT NULL,
        graph TEXT NOT NULL,
        metadata TEXT NOT NULL,
        published_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_revisions_workflow_env
        ON revisions (workflow_id, environment, published_at)",
    "CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        revision_id TEXT NOT NULL,
        status TEXT NOT NULL,
        trigger_kind TEXT NOT NULL,
        initial_data TEXT NOT NULL,
        correlation_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        started_at INTEGER,
        finished_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs (workflow_id, created_at)",
    "CREATE TABLE IF NOT EXISTS node_executions (
        run_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        attempt INTEGER NOT NULL,
        max_attempts INTEGER NOT NULL,
        status TEXT NOT NULL,
        input TEXT,
        output TEXT,
        error TEXT,
        duration_ms INTEGER,
        retry_history TEXT NOT NULL,
        diagnostics TEXT NOT NULL,
        PRIMARY KEY (run_id, node_id, attempt)
    )",
    "CREATE TABLE IF NOT EXISTS run_events (
        run_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        attempt INTEGER NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (run_id, node_id, attempt, event_type)
    )",
];

impl Database {
    /// Open (creating if needed) the database at `database_path`
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| ServerError::Database("Invalid database path".to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ServerError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", path_str);
        debug!(url = %database_url, "Connecting to database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .map_err(|e| ServerError::Database(format!("Failed to connect: {}", e)))?;

        let db = Self {
            pool: Arc::new(pool),
        };
        db.ensure_schema().await?;
        info!(path = %path.display(), "Database ready");
        Ok(db)
    }

    /// The underlying pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Create any missing tables and indexes
    pub async fn ensure_schema(&self) -> Result<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl)
                .execute(self.pool())
                .await
                .map_err(|e| ServerError::Database(format!("Schema bootstrap failed: {}", e)))?;
        }
        Ok(())
    }

    /// Cheap liveness check used by the queue health probe
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map_err(|e| ServerError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_and_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("weft.db")).await.unwrap();
        db.health_check().await.unwrap();

        // Bootstrap is idempotent.
        db.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("weft.db");
        let db = Database::new(&nested).await.unwrap();
        db.health_check().await.unwrap();
        assert!(nested.exists());
    }
}
