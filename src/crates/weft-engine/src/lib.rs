//! Run dispatch engine for weft
//!
//! - [`run`] - runs, node executions, retry records, diagnostics
//! - [`event`] - the run event stream and its two-consumer fan-out
//! - [`dispatcher`] - the per-run state machine: topological scheduling,
//!   bounded workers, branch selection, retries, cancellation, deadlines
//! - [`artifact`] - the per-run output store refs resolve against
//! - [`retry`] - exponential backoff with jitter
//! - [`llm`] - LLM parameter mapping with TTL response caching
//! - [`limits`] - process-wide per-connector concurrency semaphores

pub mod artifact;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod limits;
pub mod llm;
pub mod retry;
pub mod run;

pub use artifact::{ArtifactMiss, ArtifactStore};
pub use dispatcher::{Dispatcher, DispatcherConfig, RunOutcome};
pub use error::{EngineError, Result};
pub use event::{EventBus, RunEvent, DEFAULT_LIVE_BUFFER};
pub use limits::ConnectorLimiter;
pub use llm::{CachedLlmMapper, LlmMapRequest, LlmMapper, UnconfiguredLlmMapper};
pub use retry::RetryPolicy;
pub use run::{
    NodeDiagnostics, NodeError, NodeExecution, NodeExecutionStatus, RetryRecord, Run, RunStatus,
    TriggerKind,
};
