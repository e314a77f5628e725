//! Per-run dispatcher
//!
//! One dispatcher task per run plus a bounded pool of spawned node workers.
//! The dispatcher is the sole writer of run state, the artifact store, and
//! the event stream; workers hand attempt events and terminal results back
//! over an mpsc channel. Scheduling follows the deterministic topological
//! order: a node becomes ready when every predecessor is terminal and its
//! selecting edges are satisfied, and becomes skipped when they cannot be.
//!
//! Connector calls are gated by the process-wide per-connector semaphores;
//! the dispatcher acquires the permit before spawning the worker, so a
//! saturated connector stalls scheduling without consuming a worker slot.

use crate::artifact::ArtifactStore;
use crate::error::{EngineError, Result};
use crate::event::{EventBus, RunEvent};
use crate::limits::ConnectorLimiter;
use crate::llm::CachedLlmMapper;
use crate::retry::RetryPolicy;
use crate::run::{
    NodeDiagnostics, NodeError, NodeExecution, NodeExecutionStatus, Run, RunStatus, RetryRecord,
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use weft_graph::{topological_order, Edge, LlmParam, Node, NodeRole, ParamValue, WorkflowGraph};
use weft_registry::{
    CancelSignal, CapabilityHandle, CapabilityIndex, ConnectorRuntime, Credentials, ErrorKind,
    InvocationOutcome, InvocationRequest, InvokeContext, InvokeError, RuntimeRegistry,
};
use weft_validate::{validate, ValidateOptions};

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Cap on concurrently evaluating nodes per run
    pub max_in_flight: usize,
    /// Wall-clock cap on the whole run
    pub run_deadline: Duration,
    /// Backoff policy for retryable failures
    pub retry: RetryPolicy,
    /// Options for the authoritative pre-flight validation
    pub validate: ValidateOptions,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            run_deadline: Duration::from_secs(15 * 60),
            retry: RetryPolicy::default(),
            validate: ValidateOptions::default(),
        }
    }
}

/// Terminal result of one dispatched run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Terminal run status
    pub status: RunStatus,
    /// True when no node failed and the run was not interrupted
    pub success: bool,
    /// Summary message, mirrored into the `summary` event
    pub message: String,
    /// Final per-node records, in topological order
    pub executions: Vec<NodeExecution>,
}

/// Why the main loop stopped scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Drained,
    Canceled,
    DeadlineExceeded,
    FatalError,
}

/// The per-run execution engine
pub struct Dispatcher {
    index: Arc<CapabilityIndex>,
    runtimes: Arc<RuntimeRegistry>,
    llm: Arc<CachedLlmMapper>,
    limiter: Arc<ConnectorLimiter>,
    config: DispatcherConfig,
}

/// Everything a worker needs to evaluate one node
struct WorkerJob {
    run_id: uuid::Uuid,
    node_id: String,
    operation: String,
    params: Map<String, Value>,
    llm_params: Vec<(String, LlmParam)>,
    credentials: Credentials,
    upstream: Option<Value>,
    initial_data: Value,
    timeout: Duration,
    max_attempts: u32,
    retry: RetryPolicy,
}

/// Terminal worker report, applied by the dispatcher
struct WorkerDone {
    node_id: String,
    attempt: u32,
    input: Value,
    outcome: std::result::Result<InvocationOutcome, NodeError>,
    retry_history: Vec<RetryRecord>,
    duration_ms: u64,
    cache_hit: bool,
}

enum WorkerMsg {
    Event(RunEvent),
    Done(Box<WorkerDone>),
}

impl Dispatcher {
    /// Build a dispatcher over the injected collaborators
    pub fn new(
        index: Arc<CapabilityIndex>,
        runtimes: Arc<RuntimeRegistry>,
        llm: Arc<CachedLlmMapper>,
        limiter: Arc<ConnectorLimiter>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            index,
            runtimes,
            llm,
            limiter,
            config,
        }
    }

    /// Execute one run to a terminal status
    ///
    /// Validates authoritatively first and refuses to start on any error.
    /// Emits the full event stream through `events` and returns the final
    /// per-node records.
    pub async fn execute(
        &self,
        run: &Run,
        graph: &WorkflowGraph,
        events: &mut EventBus,
        cancel: CancelSignal,
    ) -> Result<RunOutcome> {
        // One snapshot for the whole run; index refreshes land on later runs.
        let snapshot = self.index.snapshot();
        let report = validate(graph, &snapshot, &self.config.validate);
        if !report.valid {
            return Err(EngineError::ValidationFailed(report));
        }
        let order = topological_order(graph).ok_or(EngineError::NotADag)?;

        // Resolve every capability and runtime up front; validation already
        // guarantees these succeed.
        let mut caps: HashMap<String, CapabilityHandle> = HashMap::new();
        let mut runtimes: HashMap<String, Arc<dyn ConnectorRuntime>> = HashMap::new();
        for node in &graph.nodes {
            let handle = snapshot
                .resolve(
                    &node.app,
                    &node.operation,
                    weft_registry::RoleQuery::for_node_role(node.role),
                )
                .map_err(|miss| EngineError::UnresolvedCapability {
                    node: node.id.clone(),
                    reason: miss.to_string(),
                })?;
            let runtime = self
                .runtimes
                .get(&node.app)
                .ok_or_else(|| EngineError::MissingRuntime(node.app.clone()))?;
            caps.insert(node.id.clone(), handle);
            runtimes.insert(node.id.clone(), runtime);
        }

        let nodes: HashMap<&str, &Node> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let preds = graph.predecessors();

        let mut execs: HashMap<String, NodeExecution> = graph
            .nodes
            .iter()
            .map(|n| {
                let max_attempts = caps[&n.id].operation().max_attempts;
                (
                    n.id.clone(),
                    NodeExecution::pending(run.id, n.id.clone(), max_attempts),
                )
            })
            .collect();
        let mut branches: HashMap<String, String> = HashMap::new();
        let mut store = ArtifactStore::new();
        let mut fatal_node: Option<String> = None;

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMsg>();
        let mut in_flight = 0usize;

        info!(run_id = %run.id, nodes = graph.nodes.len(), "Run dispatch started");
        events.emit(RunEvent::RunStart {
            timestamp: Utc::now(),
            run_id: run.id,
            workflow_id: run.workflow_id,
            revision_id: run.revision_id,
            node_count: graph.nodes.len(),
        });

        let deadline = tokio::time::sleep(self.config.run_deadline);
        tokio::pin!(deadline);

        let stop = 'outer: loop {
            self.apply_skips(&order, &nodes, &preds, &caps, &branches, &mut execs, run, events);

            let ready = collect_ready(&order, &preds, &caps, &branches, &execs);
            let mut progressed = false;
            for node_id in ready {
                if in_flight >= self.config.max_in_flight.max(1) {
                    break;
                }
                let node = nodes[node_id.as_str()];
                let exec = execs
                    .get_mut(&node_id)
                    .ok_or_else(|| EngineError::Internal(format!("no record for '{}'", node_id)))?;
                exec.status = NodeExecutionStatus::Running;
                exec.attempt = 1;
                events.emit(RunEvent::NodeStart {
                    timestamp: Utc::now(),
                    run_id: run.id,
                    node_id: node_id.clone(),
                });
                progressed = true;

                match self.prepare_job(run, node, &caps[&node_id], &preds, &branches, &store) {
                    Err(error) => {
                        warn!(run_id = %run.id, node_id = %node_id, error = %error.message, "Input resolution failed");
                        apply_failure(exec, 1, error, events, run);
                    }
                    Ok(job) => {
                        // Permit acquisition may wait on a saturated
                        // connector; worker slots stay free meanwhile.
                        let permit = self.limiter.acquire(&node.app).await;
                        let runtime = Arc::clone(&runtimes[&node_id]);
                        let llm = Arc::clone(&self.llm);
                        let worker_tx = tx.clone();
                        let worker_cancel = cancel.clone();
                        in_flight += 1;
                        tokio::spawn(async move {
                            let done = run_worker(job, runtime, llm, worker_tx.clone(), worker_cancel).await;
                            let _ = worker_tx.send(WorkerMsg::Done(Box::new(done)));
                            drop(permit);
                        });
                    }
                }
            }
            if progressed {
                continue;
            }

            let pending_or_running = execs
                .values()
                .any(|e| !e.status.is_terminal());
            if in_flight == 0 && !pending_or_running {
                break StopReason::Drained;
            }

            tokio::select! {
                _ = cancel.cancelled() => break 'outer StopReason::Canceled,
                _ = &mut deadline => break 'outer StopReason::DeadlineExceeded,
                msg = rx.recv() => match msg {
                    Some(WorkerMsg::Event(event)) => events.emit(event),
                    Some(WorkerMsg::Done(done)) => {
                        in_flight -= 1;
                        let is_fatal = self.apply_done(*done, &mut execs, &mut store, &mut branches, run, events, &mut fatal_node);
                        if is_fatal {
                            cancel.cancel();
                            break 'outer StopReason::FatalError;
                        }
                    }
                    None => break 'outer StopReason::Drained,
                },
            }
        };

        drop(tx);
        if stop != StopReason::Drained {
            // Interrupt whatever is still in flight; uncooperative
            // operations finish on their own and their results are dropped.
            cancel.cancel();
        }
        self.finish_interrupted(stop, &fatal_node, &mut execs, run, events);

        let failed = execs
            .values()
            .filter(|e| e.status == NodeExecutionStatus::Failed)
            .count();
        let (status, success, message) = match stop {
            StopReason::Canceled => (RunStatus::Canceled, false, "run canceled".to_string()),
            StopReason::DeadlineExceeded => (
                RunStatus::Canceled,
                false,
                "run deadline exceeded".to_string(),
            ),
            StopReason::FatalError => (
                RunStatus::Failed,
                false,
                format!(
                    "fatal error in node '{}'",
                    fatal_node.as_deref().unwrap_or("unknown")
                ),
            ),
            StopReason::Drained if failed == 0 => {
                (RunStatus::Succeeded, true, "all nodes completed".to_string())
            }
            StopReason::Drained => (
                RunStatus::Failed,
                false,
                format!("{} node(s) failed", failed),
            ),
        };

        events.emit(RunEvent::Summary {
            timestamp: Utc::now(),
            run_id: run.id,
            success,
            message: message.clone(),
        });
        events.emit(RunEvent::RunEnd {
            timestamp: Utc::now(),
            run_id: run.id,
            status,
        });
        info!(run_id = %run.id, status = status.as_str(), "Run dispatch finished");

        let executions = order
            .iter()
            .filter_map(|id| execs.remove(id))
            .collect();
        Ok(RunOutcome {
            status,
            success,
            message,
            executions,
        })
    }

    /// Resolve a node's inputs into a spawnable job
    ///
    /// Static values pass through, refs resolve against the artifact store
    /// (a miss fails the attempt with `ref_unresolved`), llm values are
    /// deferred to the worker. Catalog defaults fill remaining keys.
    fn prepare_job(
        &self,
        run: &Run,
        node: &Node,
        handle: &CapabilityHandle,
        preds: &HashMap<&str, Vec<&Edge>>,
        branches: &HashMap<String, String>,
        store: &ArtifactStore,
    ) -> std::result::Result<WorkerJob, NodeError> {
        let op = handle.operation();

        let mut params = Map::new();
        let mut llm_params = Vec::new();
        for (key, value) in &node.params {
            match value {
                ParamValue::Static { value } => {
                    params.insert(key.clone(), value.clone());
                }
                ParamValue::Ref { node: target, path } => {
                    let resolved = store.resolve(target, path).map_err(|miss| NodeError {
                        kind: ErrorKind::RefUnresolved,
                        message: miss.to_string(),
                    })?;
                    params.insert(key.clone(), resolved);
                }
                ParamValue::Llm(llm) => llm_params.push((key.clone(), llm.clone())),
            }
        }
        if let Some(defaults) = &op.defaults {
            for (key, value) in defaults {
                params.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let upstream = upstream_payload(node, preds, branches, store);
        let credentials = match node.auth.effective() {
            Some(weft_graph::CredentialSource::Connection(id)) => {
                Credentials::Connection(id.to_string())
            }
            Some(weft_graph::CredentialSource::Inline(map)) => Credentials::Inline(map.clone()),
            None => Credentials::None,
        };

        Ok(WorkerJob {
            run_id: run.id,
            node_id: node.id.clone(),
            operation: node.operation.clone(),
            params,
            llm_params,
            credentials,
            upstream,
            initial_data: run.initial_data.clone(),
            timeout: Duration::from_secs(op.timeout_secs),
            max_attempts: op.max_attempts,
            retry: self.config.retry.clone(),
        })
    }

    /// Mark every pending node whose predecessors can no longer satisfy it,
    /// cascading until a fixpoint
    #[allow(clippy::too_many_arguments)]
    fn apply_skips(
        &self,
        order: &[String],
        nodes: &HashMap<&str, &Node>,
        preds: &HashMap<&str, Vec<&Edge>>,
        caps: &HashMap<String, CapabilityHandle>,
        branches: &HashMap<String, String>,
        execs: &mut HashMap<String, NodeExecution>,
        run: &Run,
        events: &mut EventBus,
    ) {
        loop {
            let mut skipped = Vec::new();
            for node_id in order {
                if execs[node_id].status != NodeExecutionStatus::Pending {
                    continue;
                }
                let incoming = &preds[node_id.as_str()];
                if incoming.is_empty() {
                    continue;
                }
                let all_terminal = incoming
                    .iter()
                    .all(|e| execs[&e.source].status.is_terminal());
                if !all_terminal {
                    continue;
                }
                let satisfied = satisfied_count(incoming, branches, execs);
                let accepts_fan_in = caps[node_id].operation().accepts_fan_in;
                let runnable = if accepts_fan_in {
                    satisfied >= 1
                } else {
                    satisfied == incoming.len()
                };
                if !runnable {
                    skipped.push((node_id.clone(), skip_reason(incoming, branches, execs, nodes)));
                }
            }
            if skipped.is_empty() {
                return;
            }
            for (node_id, reason) in skipped {
                debug!(run_id = %run.id, node_id = %node_id, reason = %reason, "Node skipped");
                if let Some(exec) = execs.get_mut(&node_id) {
                    exec.status = NodeExecutionStatus::Skipped;
                }
                events.emit(RunEvent::NodeSkip {
                    timestamp: Utc::now(),
                    run_id: run.id,
                    node_id,
                    reason,
                });
            }
        }
    }

    /// Fold one worker report into the run state; returns whether it was
    /// fatal for the whole run
    #[allow(clippy::too_many_arguments)]
    fn apply_done(
        &self,
        done: WorkerDone,
        execs: &mut HashMap<String, NodeExecution>,
        store: &mut ArtifactStore,
        branches: &mut HashMap<String, String>,
        run: &Run,
        events: &mut EventBus,
        fatal_node: &mut Option<String>,
    ) -> bool {
        let Some(exec) = execs.get_mut(&done.node_id) else {
            return false;
        };
        exec.attempt = done.attempt;
        exec.input = Some(done.input);
        exec.duration_ms = Some(done.duration_ms);
        exec.retry_history = done.retry_history;
        exec.diagnostics.cache_hit = done.cache_hit;

        match done.outcome {
            Ok(outcome) => {
                exec.status = NodeExecutionStatus::Succeeded;
                exec.output = Some(outcome.output.clone());
                exec.diagnostics.logs.extend(outcome.logs.iter().cloned());
                exec.diagnostics.stdout = outcome.stdout.clone();
                absorb_diagnostics(&mut exec.diagnostics, &outcome.diagnostics);

                if let Some(branch) = &outcome.branch {
                    branches.insert(done.node_id.clone(), branch.clone());
                }
                store.insert(done.node_id.clone(), outcome.output.clone());

                events.emit(RunEvent::NodeComplete {
                    timestamp: Utc::now(),
                    run_id: run.id,
                    node_id: done.node_id,
                    attempt: done.attempt,
                    result: outcome.output,
                    logs: outcome.logs,
                    diagnostics: outcome.diagnostics,
                    stdout: outcome.stdout,
                    finished_at: Utc::now(),
                });
                false
            }
            Err(error) => {
                let is_fatal = error.kind.is_fatal();
                if is_fatal {
                    *fatal_node = Some(done.node_id.clone());
                }
                apply_failure(exec, done.attempt, error, events, run);
                is_fatal
            }
        }
    }

    /// After an interrupt, fail the in-flight nodes and skip the pending ones
    fn finish_interrupted(
        &self,
        stop: StopReason,
        fatal_node: &Option<String>,
        execs: &mut HashMap<String, NodeExecution>,
        run: &Run,
        events: &mut EventBus,
    ) {
        if stop == StopReason::Drained {
            return;
        }
        let (kind, detail) = match stop {
            StopReason::Canceled => (ErrorKind::CancelledByUser, "run canceled".to_string()),
            StopReason::DeadlineExceeded => (
                ErrorKind::RunDeadlineExceeded,
                "run deadline exceeded".to_string(),
            ),
            StopReason::FatalError => (
                ErrorKind::FatalInternal,
                format!(
                    "aborted after fatal error in '{}'",
                    fatal_node.as_deref().unwrap_or("unknown")
                ),
            ),
            StopReason::Drained => unreachable!(),
        };

        let mut ids: Vec<String> = execs.keys().cloned().collect();
        ids.sort();
        for node_id in ids {
            let exec = match execs.get_mut(&node_id) {
                Some(exec) => exec,
                None => continue,
            };
            match exec.status {
                NodeExecutionStatus::Running => {
                    let attempt = exec.attempt.max(1);
                    apply_failure(
                        exec,
                        attempt,
                        NodeError {
                            kind,
                            message: detail.clone(),
                        },
                        events,
                        run,
                    );
                }
                NodeExecutionStatus::Pending => {
                    exec.status = NodeExecutionStatus::Skipped;
                    events.emit(RunEvent::NodeSkip {
                        timestamp: Utc::now(),
                        run_id: run.id,
                        node_id: node_id.clone(),
                        reason: detail.clone(),
                    });
                }
                _ => {}
            }
        }
    }
}

/// Pending nodes whose predecessors are all satisfied, in topological order
fn collect_ready(
    order: &[String],
    preds: &HashMap<&str, Vec<&Edge>>,
    caps: &HashMap<String, CapabilityHandle>,
    branches: &HashMap<String, String>,
    execs: &HashMap<String, NodeExecution>,
) -> Vec<String> {
    let mut ready = Vec::new();
    for node_id in order {
        if execs[node_id].status != NodeExecutionStatus::Pending {
            continue;
        }
        let incoming = &preds[node_id.as_str()];
        if incoming.is_empty() {
            ready.push(node_id.clone());
            continue;
        }
        let all_terminal = incoming
            .iter()
            .all(|e| execs[&e.source].status.is_terminal());
        if !all_terminal {
            continue;
        }
        let satisfied = satisfied_count(incoming, branches, execs);
        let accepts_fan_in = caps[node_id].operation().accepts_fan_in;
        let runnable = if accepts_fan_in {
            satisfied >= 1
        } else {
            satisfied == incoming.len()
        };
        if runnable {
            ready.push(node_id.clone());
        }
    }
    ready
}

/// Whether an edge delivers data: its source succeeded and, for condition
/// sources, its handle matches the selected branch (a handle-less edge off a
/// condition follows both branches)
fn edge_satisfied(
    edge: &Edge,
    branches: &HashMap<String, String>,
    execs: &HashMap<String, NodeExecution>,
) -> bool {
    if execs
        .get(&edge.source)
        .map(|e| e.status != NodeExecutionStatus::Succeeded)
        .unwrap_or(true)
    {
        return false;
    }
    match (branches.get(&edge.source), &edge.source_handle) {
        (Some(branch), Some(handle)) => handle == branch,
        _ => true,
    }
}

fn satisfied_count(
    incoming: &[&Edge],
    branches: &HashMap<String, String>,
    execs: &HashMap<String, NodeExecution>,
) -> usize {
    incoming
        .iter()
        .filter(|e| edge_satisfied(e, branches, execs))
        .count()
}

fn skip_reason(
    incoming: &[&Edge],
    branches: &HashMap<String, String>,
    execs: &HashMap<String, NodeExecution>,
    nodes: &HashMap<&str, &Node>,
) -> String {
    for edge in incoming {
        match execs[&edge.source].status {
            NodeExecutionStatus::Failed => {
                return format!("upstream node '{}' failed", edge.source);
            }
            NodeExecutionStatus::Skipped => {
                return format!("upstream node '{}' was skipped", edge.source);
            }
            NodeExecutionStatus::Succeeded => {
                let is_condition = nodes
                    .get(edge.source.as_str())
                    .map(|n| n.role == NodeRole::Condition)
                    .unwrap_or(false);
                if is_condition && !edge_satisfied(edge, branches, execs) {
                    return format!(
                        "branch '{}' of '{}' not selected",
                        edge.source_handle.as_deref().unwrap_or(""),
                        edge.source
                    );
                }
            }
            _ => {}
        }
    }
    "no satisfied inputs".to_string()
}

/// Upstream payload handed to the operation: the single predecessor's
/// artifact, or a map keyed by node id for fan-in joins
fn upstream_payload(
    node: &Node,
    preds: &HashMap<&str, Vec<&Edge>>,
    branches: &HashMap<String, String>,
    store: &ArtifactStore,
) -> Option<Value> {
    let incoming = preds.get(node.id.as_str())?;
    let sources: Vec<&str> = incoming
        .iter()
        .filter(|e| {
            // Only edges that delivered data contribute; dispatch order
            // guarantees their artifacts exist.
            match branches.get(&e.source) {
                Some(branch) => e.source_handle.as_deref().map_or(true, |h| h == branch),
                None => true,
            }
        })
        .map(|e| e.source.as_str())
        .filter(|source| store.get(source).is_some())
        .collect();

    match sources.as_slice() {
        [] => None,
        [single] => store.get(single).cloned(),
        many => {
            let mut merged = Map::new();
            for source in many {
                if let Some(artifact) = store.get(source) {
                    merged.insert(source.to_string(), artifact.clone());
                }
            }
            Some(Value::Object(merged))
        }
    }
}

fn absorb_diagnostics(diagnostics: &mut NodeDiagnostics, reported: &Map<String, Value>) {
    for (key, value) in reported {
        match key.as_str() {
            "costUsd" => diagnostics.cost_usd = value.as_f64(),
            "tokensUsed" => diagnostics.tokens_used = value.as_u64(),
            _ => {
                diagnostics.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

fn apply_failure(
    exec: &mut NodeExecution,
    attempt: u32,
    error: NodeError,
    events: &mut EventBus,
    run: &Run,
) {
    exec.status = NodeExecutionStatus::Failed;
    exec.attempt = attempt;
    exec.error = Some(error.clone());
    events.emit(RunEvent::NodeError {
        timestamp: Utc::now(),
        run_id: run.id,
        node_id: exec.node_id.clone(),
        attempt,
        error,
    });
}

/// The attempt loop for one node, run on its own task
///
/// Resolves any llm parameters, then attempts the invocation under the
/// per-attempt deadline, retrying retryable failures with backoff. An
/// `auth_expired` failure on a saved connection earns one transparent
/// re-attempt before surfacing. Cancellation is checked before every attempt
/// and during backoff sleeps.
async fn run_worker(
    mut job: WorkerJob,
    runtime: Arc<dyn ConnectorRuntime>,
    llm: Arc<CachedLlmMapper>,
    tx: mpsc::UnboundedSender<WorkerMsg>,
    cancel: CancelSignal,
) -> WorkerDone {
    let started = Instant::now();
    let mut retry_history: Vec<RetryRecord> = Vec::new();
    let mut cache_hit = false;

    // LLM-mapped parameters resolve once, against the upstream snapshot.
    let upstream_snapshot = job
        .upstream
        .clone()
        .unwrap_or_else(|| job.initial_data.clone());
    for (key, param) in std::mem::take(&mut job.llm_params) {
        match llm.resolve(&param, &upstream_snapshot).await {
            Ok((value, hit)) => {
                cache_hit |= hit;
                job.params.insert(key, value);
            }
            Err(err) => {
                return WorkerDone {
                    node_id: job.node_id,
                    attempt: 1,
                    input: Value::Object(job.params),
                    outcome: Err(NodeError {
                        kind: err.kind,
                        message: format!("llm mapping for '{}' failed: {}", key, err.message),
                    }),
                    retry_history,
                    duration_ms: started.elapsed().as_millis() as u64,
                    cache_hit,
                };
            }
        }
    }

    let mut attempt: u32 = 0;
    let mut auth_refreshed = false;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return done_with_error(
                job,
                attempt,
                ErrorKind::CancelledByUser,
                "run canceled before attempt".to_string(),
                retry_history,
                started,
                cache_hit,
            );
        }

        let _ = tx.send(WorkerMsg::Event(RunEvent::NodeAttempt {
            timestamp: Utc::now(),
            run_id: job.run_id,
            node_id: job.node_id.clone(),
            attempt,
        }));

        let ctx = InvokeContext {
            deadline: job.timeout,
            cancel: cancel.clone(),
        };
        let request = InvocationRequest {
            operation: job.operation.clone(),
            params: job.params.clone(),
            credentials: job.credentials.clone(),
            upstream: job.upstream.clone(),
            initial_data: job.initial_data.clone(),
        };

        let result = tokio::select! {
            invoked = tokio::time::timeout(job.timeout, runtime.invoke(request, &ctx)) => {
                match invoked {
                    Ok(inner) => inner,
                    Err(_) => Err(InvokeError::new(
                        ErrorKind::NetworkTimeout,
                        format!("attempt exceeded {}s deadline", job.timeout.as_secs()),
                    )),
                }
            }
            _ = cancel.cancelled() => Err(
                InvokeError::new(ErrorKind::CancelledByUser, "run canceled").with_retryable(false)
            ),
        };

        match result {
            Ok(outcome) => {
                return WorkerDone {
                    node_id: job.node_id,
                    attempt,
                    input: Value::Object(job.params),
                    outcome: Ok(outcome),
                    retry_history,
                    duration_ms: started.elapsed().as_millis() as u64,
                    cache_hit,
                };
            }
            Err(err) => {
                let refresh_eligible = err.kind == ErrorKind::AuthExpired
                    && !auth_refreshed
                    && matches!(job.credentials, Credentials::Connection(_));
                if refresh_eligible {
                    // One transparent refresh: the host's credential store
                    // rotates the token, the engine just re-invokes.
                    auth_refreshed = true;
                    retry_history.push(RetryRecord {
                        attempt,
                        error: NodeError {
                            kind: err.kind,
                            message: err.message.clone(),
                        },
                        delay_ms: 0,
                        at: Utc::now(),
                    });
                    continue;
                }

                let retryable = err.retryable && !err.kind.is_fatal();
                if retryable && attempt < job.max_attempts {
                    let delay = job.retry.delay_for(attempt);
                    retry_history.push(RetryRecord {
                        attempt,
                        error: NodeError {
                            kind: err.kind,
                            message: err.message.clone(),
                        },
                        delay_ms: delay.as_millis() as u64,
                        at: Utc::now(),
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return done_with_error(
                                job,
                                attempt,
                                ErrorKind::CancelledByUser,
                                "run canceled during backoff".to_string(),
                                retry_history,
                                started,
                                cache_hit,
                            );
                        }
                    }
                    continue;
                }

                return done_with_error(
                    job,
                    attempt,
                    err.kind,
                    err.message,
                    retry_history,
                    started,
                    cache_hit,
                );
            }
        }
    }
}

fn done_with_error(
    job: WorkerJob,
    attempt: u32,
    kind: ErrorKind,
    message: String,
    retry_history: Vec<RetryRecord>,
    started: Instant,
    cache_hit: bool,
) -> WorkerDone {
    WorkerDone {
        node_id: job.node_id,
        attempt,
        input: Value::Object(job.params),
        outcome: Err(NodeError { kind, message }),
        retry_history,
        duration_ms: started.elapsed().as_millis() as u64,
        cache_hit,
    }
}
