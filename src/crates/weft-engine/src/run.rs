//! Run-side data model
//!
//! A [`Run`] is one execution of a published revision; a [`NodeExecution`] is
//! the record of one node within it, across all its attempts. Both shapes are
//! what the repositories persist and the API returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use weft_registry::ErrorKind;

/// What started the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Scheduled,
    Webhook,
}

impl TriggerKind {
    /// Parse from the lowercase wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            "webhook" => Some(Self::Webhook),
            _ => None,
        }
    }

    /// Lowercase wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Webhook => "webhook",
        }
    }
}

/// Terminal and transitional run states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    /// Lowercase wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse from the lowercase wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// True once no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// Per-node execution states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeExecutionStatus {
    /// Lowercase wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// True once the node cannot change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// One execution of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Run identity
    pub id: Uuid,
    /// Workflow the run belongs to
    pub workflow_id: Uuid,
    /// Published revision it executes
    pub revision_id: Uuid,
    /// What started it
    pub trigger: TriggerKind,
    /// Initial trigger payload
    pub initial_data: Value,
    /// Current status
    pub status: RunStatus,
    /// Correlation id for tracing across services
    pub correlation_id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Dispatch start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// New queued run
    pub fn new(
        workflow_id: Uuid,
        revision_id: Uuid,
        trigger: TriggerKind,
        initial_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            revision_id,
            trigger,
            initial_data,
            status: RunStatus::Queued,
            correlation_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// A classified node failure, as persisted and surfaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
}

/// One failed-and-retried attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    /// Attempt number that failed, 1-based
    pub attempt: u32,
    /// The failure that triggered the retry
    pub error: NodeError,
    /// Backoff applied before the next attempt
    pub delay_ms: u64,
    /// When the failure was observed
    pub at: DateTime<Utc>,
}

/// Per-node diagnostics accumulated over all attempts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDiagnostics {
    /// Connector log lines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    /// Captured stdout, when the operation ran user code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// An LLM-mapped parameter was served from cache
    #[serde(default)]
    pub cache_hit: bool,
    /// Reported cost, when the operation meters it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Reported token usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    /// Free-form connector diagnostics
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// The record of one node across its attempts within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    /// Owning run
    pub run_id: Uuid,
    /// Node id within the revision's graph
    pub node_id: String,
    /// Last attempt number, 1-based; 0 until the node starts
    pub attempt: u32,
    /// Attempt cap from the capability handle
    pub max_attempts: u32,
    /// Current status
    pub status: NodeExecutionStatus,
    /// Resolved input snapshot (never includes credentials)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Output artifact on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Terminal error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    /// Wall-clock duration of the final attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Failed attempts that were retried
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_history: Vec<RetryRecord>,
    /// Diagnostics accumulated over all attempts
    #[serde(default)]
    pub diagnostics: NodeDiagnostics,
}

impl NodeExecution {
    /// Fresh pending record
    pub fn pending(run_id: Uuid, node_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            attempt: 0,
            max_attempts,
            status: NodeExecutionStatus::Pending,
            input: None,
            output: None,
            error: None,
            duration_ms: None,
            retry_history: Vec::new(),
            diagnostics: NodeDiagnostics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trips() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Canceled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_trigger_kind_parse() {
        assert_eq!(TriggerKind::parse("manual"), Some(TriggerKind::Manual));
        assert_eq!(TriggerKind::parse("WEBHOOK"), Some(TriggerKind::Webhook));
        assert_eq!(TriggerKind::parse("poll"), None);
    }

    #[test]
    fn test_new_run_is_queued() {
        let run = Run::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TriggerKind::Manual,
            json!({}),
        );
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.started_at.is_none());
        assert!(!run.correlation_id.is_empty());
    }

    #[test]
    fn test_node_execution_serialization_shape() {
        let mut exec = NodeExecution::pending(Uuid::new_v4(), "A", 3);
        exec.status = NodeExecutionStatus::Failed;
        exec.error = Some(NodeError {
            kind: weft_registry::ErrorKind::RateLimited,
            message: "429".into(),
        });
        let value = serde_json::to_value(&exec).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"]["kind"], "rate_limited");
        assert_eq!(value["maxAttempts"], 3);
    }
}
