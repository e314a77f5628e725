//! Queue and admission control
//!
//! An in-process run queue with ack/visibility semantics, a background
//! health probe, worker heartbeats, organization quotas, and the ordered
//! admission pipeline that gates every run before it reaches a worker.

pub mod admission;
pub mod heartbeat;
pub mod quota;
pub mod worker;

pub use admission::{AdmissionControl, RunRequest};
pub use heartbeat::{FleetSummary, WorkerRegistry, WorkerRole};
pub use quota::{InMemoryQuotaService, QuotaService};
pub use worker::ExecutionWorker;

use crate::db::Database;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use weft_registry::CancelSignal;

/// Queue probe verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueHealthStatus {
    /// Healthy
    Pass,
    /// Degraded but admitting
    Warn,
    /// Down; admission fails
    Fail,
}

/// Cached result of the last queue health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    /// Verdict
    pub status: QueueHealthStatus,
    /// Human message
    pub message: String,
    /// Probe round-trip latency
    pub latency_ms: u64,
    /// When the probe ran
    pub checked_at: DateTime<Utc>,
}

impl QueueHealth {
    /// Passing health with a latency reading
    pub fn pass(latency_ms: u64) -> Self {
        Self {
            status: QueueHealthStatus::Pass,
            message: "queue responsive".to_string(),
            latency_ms,
            checked_at: Utc::now(),
        }
    }

    /// Degraded health
    pub fn warn(latency_ms: u64, message: impl Into<String>) -> Self {
        Self {
            status: QueueHealthStatus::Warn,
            message: message.into(),
            latency_ms,
            checked_at: Utc::now(),
        }
    }

    /// Failed health
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: QueueHealthStatus::Fail,
            message: message.into(),
            latency_ms: 0,
            checked_at: Utc::now(),
        }
    }

    /// Warn admits; fail does not
    pub fn admits(&self) -> bool {
        self.status != QueueHealthStatus::Fail
    }
}

/// One queued unit of work: a run at a specific attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// Run to execute
    pub run_id: Uuid,
    /// Delivery attempt, 1-based
    pub attempt: u32,
}

struct PendingAck {
    attempt: u32,
    delivered_at: Instant,
}

/// In-process run queue with at-most-once-per-attempt delivery
///
/// Entries are acked by the worker once dispatch emits its first
/// `node-start`; entries unacked past the visibility timeout are redelivered
/// with the attempt advanced.
pub struct RunQueue {
    tx: mpsc::UnboundedSender<QueueEntry>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueEntry>>,
    pending_ack: Mutex<HashMap<Uuid, PendingAck>>,
    health: RwLock<QueueHealth>,
    depth: std::sync::atomic::AtomicUsize,
    visibility_timeout: Duration,
}

impl RunQueue {
    /// New queue with the given redelivery timeout
    pub fn new(visibility_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending_ack: Mutex::new(HashMap::new()),
            health: RwLock::new(QueueHealth::pass(0)),
            depth: std::sync::atomic::AtomicUsize::new(0),
            visibility_timeout,
        }
    }

    /// Push an entry; fails only when the process is shutting down
    pub fn push(&self, entry: QueueEntry) -> bool {
        let ok = self.tx.send(entry).is_ok();
        if ok {
            self.depth
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        ok
    }

    /// Pull the next entry, waiting for one; `None` on shutdown
    ///
    /// The entry enters the pending-ack set until [`RunQueue::ack`] or
    /// redelivery.
    pub async fn pop(&self, shutdown: &CancelSignal) -> Option<QueueEntry> {
        let mut rx = self.rx.lock().await;
        let entry = tokio::select! {
            entry = rx.recv() => entry?,
            _ = shutdown.cancelled() => return None,
        };
        self.depth
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        self.pending_ack.lock().insert(
            entry.run_id,
            PendingAck {
                attempt: entry.attempt,
                delivered_at: Instant::now(),
            },
        );
        Some(entry)
    }

    /// Acknowledge a delivered entry; returns whether it was pending
    pub fn ack(&self, run_id: Uuid, attempt: u32) -> bool {
        let mut pending = self.pending_ack.lock();
        match pending.get(&run_id) {
            Some(p) if p.attempt == attempt => {
                pending.remove(&run_id);
                true
            }
            _ => false,
        }
    }

    /// Redeliver entries unacked past the visibility timeout, advancing
    /// their attempt
    pub fn redeliver_expired(&self) -> usize {
        let expired: Vec<(Uuid, u32)> = {
            let mut pending = self.pending_ack.lock();
            let expired: Vec<Uuid> = pending
                .iter()
                .filter(|(_, p)| p.delivered_at.elapsed() > self.visibility_timeout)
                .map(|(id, _)| *id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p.attempt)))
                .collect()
        };

        let count = expired.len();
        for (run_id, attempt) in expired {
            warn!(run_id = %run_id, attempt, "Queue entry unacked past visibility timeout, redelivering");
            self.push(QueueEntry {
                run_id,
                attempt: attempt + 1,
            });
        }
        count
    }

    /// Entries waiting to be pulled
    pub fn depth(&self) -> usize {
        self.depth.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The cached health verdict
    pub fn health(&self) -> QueueHealth {
        self.health.read().clone()
    }

    /// Replace the cached health verdict
    ///
    /// The built-in probe calls this; hosts with an external queue wire
    /// their own probe to it.
    pub fn set_health(&self, health: QueueHealth) {
        *self.health.write() = health;
    }

    /// One probe round-trip: database liveness plus latency classification
    pub async fn probe(&self, db: &Database, warn_latency: Duration) -> QueueHealth {
        let start = Instant::now();
        let health = match db.health_check().await {
            Ok(()) => {
                let latency = start.elapsed();
                if latency > warn_latency {
                    QueueHealth::warn(
                        latency.as_millis() as u64,
                        format!("probe latency {}ms", latency.as_millis()),
                    )
                } else {
                    QueueHealth::pass(latency.as_millis() as u64)
                }
            }
            Err(e) => QueueHealth::fail(format!("probe failed: {}", e)),
        };
        self.set_health(health.clone());
        health
    }
}

impl std::fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunQueue")
            .field("depth", &self.depth())
            .field("pending_ack", &self.pending_ack.lock().len())
            .finish()
    }
}

/// Background task probing queue health and redelivering expired entries
pub fn spawn_health_probe(
    queue: Arc<RunQueue>,
    db: Arc<Database>,
    interval: Duration,
    warn_latency: Duration,
    shutdown: CancelSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let health = queue.probe(&db, warn_latency).await;
                    debug!(status = ?health.status, latency_ms = health.latency_ms, "Queue health probe");
                    queue.redeliver_expired();
                }
                _ = shutdown.cancelled() => return,
            }
        }
    })
}
