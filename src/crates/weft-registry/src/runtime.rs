//! Connector runtime contract
//!
//! The dispatcher consumes every connector through this one seam: an async
//! `invoke` that returns an [`InvocationOutcome`] or a classified
//! [`InvokeError`], plus an optional `describe` that powers the metadata
//! resolver. Implementations live in `weft-connectors`; tests substitute
//! their own.

use crate::catalog::OpRole;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use weft_graph::MetadataHints;

/// Classified failure kinds, shared across the engine and the HTTP surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    MissingConnection,
    UnknownConnector,
    UnknownOperation,
    AuthExpired,
    RateLimited,
    NetworkTimeout,
    Provider5xx,
    Provider4xx,
    RefUnresolved,
    CycleDetected,
    QuotaExceeded,
    QueueUnavailable,
    MigrationPlanRequired,
    RunDeadlineExceeded,
    CancelledByUser,
    FatalInternal,
}

impl ErrorKind {
    /// Whether the retry loop may re-attempt this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::NetworkTimeout | Self::Provider5xx
        )
    }

    /// Whether the failure aborts the whole run rather than one node
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalInternal)
    }

    /// Stable snake_case code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::MissingConnection => "missing_connection",
            Self::UnknownConnector => "unknown_connector",
            Self::UnknownOperation => "unknown_operation",
            Self::AuthExpired => "auth_expired",
            Self::RateLimited => "rate_limited",
            Self::NetworkTimeout => "network_timeout",
            Self::Provider5xx => "provider_5xx",
            Self::Provider4xx => "provider_4xx",
            Self::RefUnresolved => "ref_unresolved",
            Self::CycleDetected => "cycle_detected",
            Self::QuotaExceeded => "quota_exceeded",
            Self::QueueUnavailable => "queue_unavailable",
            Self::MigrationPlanRequired => "migration_plan_required",
            Self::RunDeadlineExceeded => "run_deadline_exceeded",
            Self::CancelledByUser => "cancelled_by_user",
            Self::FatalInternal => "fatal_internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A classified connector failure
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct InvokeError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
    /// Whether the retry loop may re-attempt; defaults from the kind but a
    /// connector can override (e.g. a 5xx it knows is permanent)
    pub retryable: bool,
}

impl InvokeError {
    /// Create an error whose retryability follows its kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    /// Override the retryable flag
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Cooperative cancellation signal
///
/// Cloned into every in-flight operation of a run; connectors that can stop
/// early select on [`CancelSignal::cancelled`], the rest are allowed to run
/// to completion and have their results discarded.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    /// Create an un-cancelled signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal; idempotent
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// True once cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when the signal trips; resolves immediately if it already has
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register interest before the flag check so a cancel() landing
        // between the check and the await still wakes us.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Per-invocation context: deadline plus cancellation
#[derive(Debug, Clone)]
pub struct InvokeContext {
    /// Per-attempt deadline
    pub deadline: Duration,
    /// Run-scoped cancellation signal
    pub cancel: CancelSignal,
}

impl InvokeContext {
    /// Context with the given deadline and a fresh signal
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            cancel: CancelSignal::new(),
        }
    }
}

/// Resolved credentials passed to an invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// No credentials supplied
    None,
    /// Saved connection, identified for the host's credential store
    Connection(String),
    /// Inline credential object, scoped to this run
    Inline(Map<String, Value>),
}

impl Credentials {
    /// True when no credentials are present
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// One invocation of a connector operation
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Operation id within the connector
    pub operation: String,
    /// Fully resolved parameters (no refs or llm values remain)
    pub params: Map<String, Value>,
    /// Credentials for the call
    pub credentials: Credentials,
    /// Output of the node's predecessor, when it has one
    pub upstream: Option<Value>,
    /// Initial trigger payload of the run
    pub initial_data: Value,
}

/// Successful invocation result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationOutcome {
    /// The output artifact stored for downstream refs
    pub output: Value,
    /// Connector log lines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    /// Free-form diagnostics (cost, token usage, cache flags)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub diagnostics: Map<String, Value>,
    /// Captured stdout, when the operation runs user code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Selected handle, for condition operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl InvocationOutcome {
    /// Outcome with just an output value
    pub fn with_output(output: Value) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }
}

/// The runtime side of a connector
///
/// `invoke` must classify its failures; the dispatcher trusts
/// [`InvokeError::retryable`] and [`InvokeError::kind`] for its retry and
/// run-failure decisions.
#[async_trait]
pub trait ConnectorRuntime: Send + Sync {
    /// Connector id this runtime serves, lower-kebab
    fn connector_id(&self) -> &str;

    /// Operation ids this runtime implements, with their roles
    fn supported_operations(&self) -> Vec<(String, OpRole)>;

    /// Execute one operation
    async fn invoke(
        &self,
        request: InvocationRequest,
        ctx: &InvokeContext,
    ) -> Result<InvocationOutcome, InvokeError>;

    /// Discover structural hints for the editor and validator
    ///
    /// Advisory; the default implementation knows nothing.
    async fn describe(
        &self,
        _operation: &str,
        _params: &Map<String, Value>,
    ) -> Result<MetadataHints, InvokeError> {
        Ok(MetadataHints::default())
    }
}

/// Registry of connector runtimes keyed by connector id
#[derive(Default)]
pub struct RuntimeRegistry {
    runtimes: HashMap<String, Arc<dyn ConnectorRuntime>>,
}

impl RuntimeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runtime, replacing any previous one for the same connector
    pub fn register(&mut self, runtime: Arc<dyn ConnectorRuntime>) {
        self.runtimes
            .insert(runtime.connector_id().to_ascii_lowercase(), runtime);
    }

    /// Runtime for a connector id, case-insensitive
    pub fn get(&self, connector_id: &str) -> Option<Arc<dyn ConnectorRuntime>> {
        self.runtimes
            .get(&connector_id.to_ascii_lowercase())
            .cloned()
    }

    /// The `(connector, operation)` support set for snapshot building
    pub fn implemented_operations(&self) -> std::collections::HashSet<(String, String)> {
        self.runtimes
            .values()
            .flat_map(|rt| {
                let id = rt.connector_id().to_ascii_lowercase();
                rt.supported_operations()
                    .into_iter()
                    .map(move |(op, _)| (id.clone(), op.to_ascii_lowercase()))
            })
            .collect()
    }
}

impl std::fmt::Debug for RuntimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeRegistry")
            .field("connectors", &self.runtimes.keys().collect::<Vec<_>>())
            .finish()
    }
}
