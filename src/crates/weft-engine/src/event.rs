//! Run event stream
//!
//! The dispatcher is the single producer of [`RunEvent`]s; the [`EventBus`]
//! fans them out to two consumers. The persistent consumer (the run-log
//! writer) sits on an unbounded channel and never loses events; the live
//! consumer (the HTTP stream) sits on a bounded channel and is dropped on
//! overflow, which leaves a `stream-lagged` diagnostic in the persistent log.
//!
//! Events for a single node are strictly ordered: `node-start`, then one
//! `node-attempt` per attempt, then exactly one terminal event. Across nodes
//! the order reflects completion time.

use crate::run::{NodeError, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

/// One event on a run's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RunEvent {
    /// The dispatcher accepted the run and started scheduling
    RunStart {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        workflow_id: Uuid,
        revision_id: Uuid,
        node_count: usize,
    },
    /// A just-in-time publish happened during run pre-flight
    Deployment {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        revision_id: Uuid,
        environment: String,
    },
    /// A node moved to running
    NodeStart {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        node_id: String,
    },
    /// One attempt began
    NodeAttempt {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        node_id: String,
        attempt: u32,
    },
    /// Terminal success
    NodeComplete {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        node_id: String,
        attempt: u32,
        result: Value,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        logs: Vec<String>,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        diagnostics: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        finished_at: DateTime<Utc>,
    },
    /// Terminal failure
    NodeError {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        node_id: String,
        attempt: u32,
        error: NodeError,
    },
    /// The node will never run (dead branch or failed dependency)
    NodeSkip {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        node_id: String,
        reason: String,
    },
    /// No nodes remain runnable
    Summary {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        success: bool,
        message: String,
    },
    /// Stream is closing
    RunEnd {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        status: RunStatus,
    },
    /// The live consumer fell behind and was dropped; persistent log only
    StreamLagged {
        timestamp: DateTime<Utc>,
        run_id: Uuid,
        dropped_after: String,
    },
}

impl RunEvent {
    /// Event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStart { timestamp, .. }
            | Self::Deployment { timestamp, .. }
            | Self::NodeStart { timestamp, .. }
            | Self::NodeAttempt { timestamp, .. }
            | Self::NodeComplete { timestamp, .. }
            | Self::NodeError { timestamp, .. }
            | Self::NodeSkip { timestamp, .. }
            | Self::Summary { timestamp, .. }
            | Self::RunEnd { timestamp, .. }
            | Self::StreamLagged { timestamp, .. } => *timestamp,
        }
    }

    /// Owning run
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStart { run_id, .. }
            | Self::Deployment { run_id, .. }
            | Self::NodeStart { run_id, .. }
            | Self::NodeAttempt { run_id, .. }
            | Self::NodeComplete { run_id, .. }
            | Self::NodeError { run_id, .. }
            | Self::NodeSkip { run_id, .. }
            | Self::Summary { run_id, .. }
            | Self::RunEnd { run_id, .. }
            | Self::StreamLagged { run_id, .. } => *run_id,
        }
    }

    /// Node the event is scoped to, when it is node-scoped
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStart { node_id, .. }
            | Self::NodeAttempt { node_id, .. }
            | Self::NodeComplete { node_id, .. }
            | Self::NodeError { node_id, .. }
            | Self::NodeSkip { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Attempt number, for attempt-scoped events
    pub fn attempt(&self) -> Option<u32> {
        match self {
            Self::NodeAttempt { attempt, .. }
            | Self::NodeComplete { attempt, .. }
            | Self::NodeError { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }

    /// The `type` tag string
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run-start",
            Self::Deployment { .. } => "deployment",
            Self::NodeStart { .. } => "node-start",
            Self::NodeAttempt { .. } => "node-attempt",
            Self::NodeComplete { .. } => "node-complete",
            Self::NodeError { .. } => "node-error",
            Self::NodeSkip { .. } => "node-skip",
            Self::Summary { .. } => "summary",
            Self::RunEnd { .. } => "run-end",
            Self::StreamLagged { .. } => "stream-lagged",
        }
    }

    /// Encode as one newline-terminated JSON line
    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            // Events are plain data; serialization cannot fail in practice.
            format!(
                "{{\"type\":\"stream-lagged\",\"error\":\"serialize: {}\"}}",
                e
            )
        });
        line.push('\n');
        line
    }
}

/// Default capacity of the live (droppable) consumer channel
pub const DEFAULT_LIVE_BUFFER: usize = 256;

/// Fan-out sink for one run's events
///
/// Owned by the dispatcher; the persistent sender is unbounded, the live
/// sender is bounded and dropped on its first overflow.
pub struct EventBus {
    run_id: Uuid,
    persistent_tx: mpsc::UnboundedSender<RunEvent>,
    live_tx: Option<mpsc::Sender<RunEvent>>,
}

impl EventBus {
    /// Bus with only the persistent consumer
    pub fn new(run_id: Uuid) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (persistent_tx, persistent_rx) = mpsc::unbounded_channel();
        (
            Self {
                run_id,
                persistent_tx,
                live_tx: None,
            },
            persistent_rx,
        )
    }

    /// Bus with both consumers; the live receiver backs the HTTP stream
    pub fn with_live(
        run_id: Uuid,
        live_buffer: usize,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<RunEvent>,
        mpsc::Receiver<RunEvent>,
    ) {
        let (persistent_tx, persistent_rx) = mpsc::unbounded_channel();
        let (live_tx, live_rx) = mpsc::channel(live_buffer);
        (
            Self {
                run_id,
                persistent_tx,
                live_tx: Some(live_tx),
            },
            persistent_rx,
            live_rx,
        )
    }

    /// Emit one event to both consumers
    ///
    /// The persistent consumer always receives it. A full live buffer drops
    /// the live consumer for the rest of the run and records the lag in the
    /// persistent log; a closed live consumer is dropped silently.
    pub fn emit(&mut self, event: RunEvent) {
        if let Some(live_tx) = &self.live_tx {
            match live_tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(run_id = %self.run_id, "Live event consumer lagged, dropping it");
                    self.live_tx = None;
                    let _ = self.persistent_tx.send(RunEvent::StreamLagged {
                        timestamp: Utc::now(),
                        run_id: self.run_id,
                        dropped_after: event.type_str().to_string(),
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.live_tx = None;
                }
            }
        }
        // The persistent receiver outlives the run in normal operation; a
        // closed receiver means the host is shutting down.
        let _ = self.persistent_tx.send(event);
    }

    /// Whether the live consumer is still attached
    pub fn live_attached(&self) -> bool {
        self.live_tx.is_some()
    }
}
