//! End-to-end dispatcher scenarios
//!
//! Each test builds a canonical graph, runs it against stub connector
//! runtimes, and asserts the emitted event stream and final node records.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_engine::{
    CachedLlmMapper, ConnectorLimiter, Dispatcher, DispatcherConfig, EngineError, EventBus,
    NodeExecutionStatus, Run, RunEvent, RunStatus, TriggerKind, UnconfiguredLlmMapper,
};
use weft_graph::normalize_draft;
use weft_registry::{
    builtin_connectors, CancelSignal, CapabilityIndex, CatalogSnapshot, ConnectorDef,
    ConnectorRuntime, ErrorKind, InvocationOutcome, InvocationRequest, InvokeContext, InvokeError,
    Lifecycle, OperationDef, OpRole, RuntimeRegistry,
};

/// Stub runtime for the built-in `core` control operations
struct CoreStub;

#[async_trait]
impl ConnectorRuntime for CoreStub {
    fn connector_id(&self) -> &str {
        "core"
    }

    fn supported_operations(&self) -> Vec<(String, OpRole)> {
        vec![
            ("manual".to_string(), OpRole::Trigger),
            ("noop".to_string(), OpRole::Action),
            ("join".to_string(), OpRole::Action),
        ]
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
        _ctx: &InvokeContext,
    ) -> Result<InvocationOutcome, InvokeError> {
        match request.operation.as_str() {
            "manual" => Ok(InvocationOutcome::with_output(request.initial_data)),
            "noop" | "join" => Ok(InvocationOutcome::with_output(
                request.upstream.unwrap_or(Value::Null),
            )),
            other => Err(InvokeError::new(
                ErrorKind::UnknownOperation,
                format!("core stub does not implement '{}'", other),
            )),
        }
    }
}

/// Scriptable test connector
struct TestApp {
    flaky_calls: AtomicUsize,
    flaky_failures: usize,
}

impl TestApp {
    fn new(flaky_failures: usize) -> Self {
        Self {
            flaky_calls: AtomicUsize::new(0),
            flaky_failures,
        }
    }
}

#[async_trait]
impl ConnectorRuntime for TestApp {
    fn connector_id(&self) -> &str {
        "testapp"
    }

    fn supported_operations(&self) -> Vec<(String, OpRole)> {
        ["echo", "flaky", "fail", "explode", "hang", "branch"]
            .iter()
            .map(|op| (op.to_string(), OpRole::Action))
            .collect()
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
        ctx: &InvokeContext,
    ) -> Result<InvocationOutcome, InvokeError> {
        match request.operation.as_str() {
            "echo" => Ok(InvocationOutcome::with_output(json!({
                "status": 200,
                "echo": Value::Object(request.params),
            }))),
            "flaky" => {
                let call = self.flaky_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= self.flaky_failures {
                    Err(InvokeError::new(ErrorKind::RateLimited, "429 slow down"))
                } else {
                    Ok(InvocationOutcome::with_output(json!({ "call": call })))
                }
            }
            "fail" => Err(InvokeError::new(ErrorKind::Provider4xx, "400 bad request")),
            "explode" => Err(InvokeError::new(
                ErrorKind::FatalInternal,
                "invariant violated",
            )),
            "hang" => {
                ctx.cancel.cancelled().await;
                Err(InvokeError::new(ErrorKind::CancelledByUser, "interrupted")
                    .with_retryable(false))
            }
            "branch" => {
                let selected = request.params.get("value").and_then(Value::as_str).map_or(
                    "true".to_string(),
                    str::to_string,
                );
                Ok(InvocationOutcome {
                    output: json!({ "branch": selected }),
                    branch: Some(selected),
                    ..Default::default()
                })
            }
            other => Err(InvokeError::new(
                ErrorKind::UnknownOperation,
                format!("testapp does not implement '{}'", other),
            )),
        }
    }
}

fn testapp_def() -> ConnectorDef {
    ConnectorDef {
        id: "testapp".into(),
        name: "Test App".into(),
        category: "testing".into(),
        icon: "beaker".into(),
        color: "#000000".into(),
        lifecycle: Lifecycle::Stable,
        semver: "0.0.1".into(),
        default_concurrency: 8,
        operations: vec![
            OperationDef::action("echo", "Echo params").with_params_schema(json!({
                "type": "object",
                "properties": { "text": {} }
            })),
            OperationDef::action("flaky", "Fail then succeed"),
            OperationDef::action("fail", "Always 400"),
            OperationDef::action("explode", "Fatal"),
            OperationDef::action("hang", "Wait for cancellation"),
            OperationDef::action("branch", "Route on the value param")
                .with_params_schema(json!({
                    "type": "object",
                    "properties": { "value": { "type": "string" } }
                }))
                .with_handles(&["true", "false"]),
        ],
    }
}

struct Harness {
    dispatcher: Dispatcher,
}

impl Harness {
    fn new(flaky_failures: usize, config: DispatcherConfig) -> Self {
        let mut defs = builtin_connectors();
        defs.push(testapp_def());
        let snapshot = CatalogSnapshot::build_fully_implemented(defs);

        let mut runtimes = RuntimeRegistry::new();
        runtimes.register(Arc::new(CoreStub));
        runtimes.register(Arc::new(TestApp::new(flaky_failures)));

        let limiter = Arc::new(ConnectorLimiter::new(snapshot.concurrency_caps()));
        let index = Arc::new(CapabilityIndex::new(snapshot));
        let llm = Arc::new(CachedLlmMapper::new(Arc::new(UnconfiguredLlmMapper)));
        Self {
            dispatcher: Dispatcher::new(index, Arc::new(runtimes), llm, limiter, config),
        }
    }

    async fn execute(
        &self,
        draft: Value,
        initial: Value,
        cancel: CancelSignal,
    ) -> (
        Result<weft_engine::RunOutcome, EngineError>,
        Vec<RunEvent>,
    ) {
        let graph = normalize_draft(&draft);
        let run = Run::new(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            TriggerKind::Manual,
            initial,
        );
        let (mut events, mut persistent_rx) = EventBus::new(run.id);
        let outcome = self
            .dispatcher
            .execute(&run, &graph, &mut events, cancel)
            .await;
        drop(events);

        let mut collected = Vec::new();
        while let Some(event) = persistent_rx.recv().await {
            collected.push(event);
        }
        (outcome, collected)
    }
}

fn event_types(events: &[RunEvent]) -> Vec<&'static str> {
    events.iter().map(RunEvent::type_str).collect()
}

fn node_events<'a>(events: &'a [RunEvent], node_id: &str) -> Vec<&'a RunEvent> {
    events
        .iter()
        .filter(|e| e.node_id() == Some(node_id))
        .collect()
}

fn linear_draft() -> Value {
    json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "A", "type": "action.testapp.echo" }
        ],
        "edges": [ { "source": "T", "target": "A" } ]
    })
}

#[tokio::test]
async fn linear_happy_path_emits_ordered_events() {
    let harness = Harness::new(0, DispatcherConfig::default());
    let (outcome, events) = harness
        .execute(linear_draft(), json!({}), CancelSignal::new())
        .await;

    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert!(outcome.success);

    assert_eq!(
        event_types(&events),
        vec![
            "run-start",
            "node-start",    // T
            "node-attempt",  // T attempt 1
            "node-complete", // T
            "node-start",    // A
            "node-attempt",  // A attempt 1
            "node-complete", // A
            "summary",
            "run-end",
        ]
    );

    // A's completion carries the connector output.
    let complete = events
        .iter()
        .find_map(|e| match e {
            RunEvent::NodeComplete { node_id, result, .. } if node_id == "A" => Some(result),
            _ => None,
        })
        .unwrap();
    assert_eq!(complete["status"], 200);

    match events.last().unwrap() {
        RunEvent::RunEnd { status, .. } => assert_eq!(*status, RunStatus::Succeeded),
        other => panic!("expected run-end, got {:?}", other),
    }
}

#[tokio::test]
async fn ref_params_resolve_from_upstream_artifacts() {
    let harness = Harness::new(0, DispatcherConfig::default());
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            {
                "id": "A",
                "type": "action.testapp.echo",
                "params": { "text": { "ref": { "node": "T", "path": "greeting" } } }
            }
        ],
        "edges": [ { "source": "T", "target": "A" } ]
    });

    let (outcome, _) = harness
        .execute(draft, json!({ "greeting": "hi" }), CancelSignal::new())
        .await;
    let outcome = outcome.unwrap();
    assert!(outcome.success);

    let a = outcome
        .executions
        .iter()
        .find(|e| e.node_id == "A")
        .unwrap();
    assert_eq!(a.input.as_ref().unwrap()["text"], "hi");
    assert_eq!(a.output.as_ref().unwrap()["echo"]["text"], "hi");
}

#[tokio::test]
async fn unresolvable_ref_fails_node_and_skips_dependents() {
    let harness = Harness::new(0, DispatcherConfig::default());
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            {
                "id": "B",
                "type": "action.testapp.echo",
                "params": { "text": { "ref": { "node": "T", "path": "missing.path" } } }
            },
            { "id": "C", "type": "action.core.noop" },
            { "id": "D", "type": "action.core.noop" }
        ],
        "edges": [
            { "source": "T", "target": "B" },
            { "source": "B", "target": "C" },
            { "source": "T", "target": "D" }
        ]
    });

    let (outcome, events) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);

    let by_id: HashMap<&str, NodeExecutionStatus> = outcome
        .executions
        .iter()
        .map(|e| (e.node_id.as_str(), e.status))
        .collect();
    assert_eq!(by_id["B"], NodeExecutionStatus::Failed);
    assert_eq!(by_id["C"], NodeExecutionStatus::Skipped);
    // The independent branch still ran.
    assert_eq!(by_id["D"], NodeExecutionStatus::Succeeded);

    let b = outcome
        .executions
        .iter()
        .find(|e| e.node_id == "B")
        .unwrap();
    assert_eq!(b.error.as_ref().unwrap().kind, ErrorKind::RefUnresolved);

    assert!(events
        .iter()
        .any(|e| e.type_str() == "node-skip" && e.node_id() == Some("C")));
}

#[tokio::test]
async fn condition_branch_skips_unselected_side() {
    let harness = Harness::new(0, DispatcherConfig::default());
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            {
                "id": "Cond",
                "role": "condition",
                "app": "testapp",
                "operation": "branch",
                "params": { "value": "true" }
            },
            { "id": "X", "type": "action.core.noop" },
            { "id": "Y", "type": "action.core.noop" }
        ],
        "edges": [
            { "source": "T", "target": "Cond" },
            { "source": "Cond", "target": "X", "sourceHandle": "true" },
            { "source": "Cond", "target": "Y", "sourceHandle": "false" }
        ]
    });

    let (outcome, events) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert!(outcome.success);

    let by_id: HashMap<&str, NodeExecutionStatus> = outcome
        .executions
        .iter()
        .map(|e| (e.node_id.as_str(), e.status))
        .collect();
    assert_eq!(by_id["X"], NodeExecutionStatus::Succeeded);
    assert_eq!(by_id["Y"], NodeExecutionStatus::Skipped);

    let y_events = node_events(&events, "Y");
    assert_eq!(y_events.len(), 1);
    assert_eq!(y_events[0].type_str(), "node-skip");
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_back_off_then_succeed() {
    let harness = Harness::new(2, DispatcherConfig::default());
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "F", "type": "action.testapp.flaky" }
        ],
        "edges": [ { "source": "T", "target": "F" } ]
    });

    let (outcome, events) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    let outcome = outcome.unwrap();
    assert!(outcome.success);

    let attempts: Vec<u32> = events
        .iter()
        .filter(|e| e.node_id() == Some("F") && e.type_str() == "node-attempt")
        .filter_map(RunEvent::attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let f = outcome
        .executions
        .iter()
        .find(|e| e.node_id == "F")
        .unwrap();
    assert_eq!(f.attempt, 3);
    assert_eq!(f.retry_history.len(), 2);
    assert_eq!(f.retry_history[0].error.kind, ErrorKind::RateLimited);

    // Backoff ~500ms then ~1s, within +/-20% jitter.
    let d1 = f.retry_history[0].delay_ms;
    let d2 = f.retry_history[1].delay_ms;
    assert!((400..=600).contains(&d1), "first delay {}ms", d1);
    assert!((800..=1200).contains(&d2), "second delay {}ms", d2);
}

#[tokio::test]
async fn non_retryable_failure_uses_single_attempt() {
    let harness = Harness::new(0, DispatcherConfig::default());
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "F", "type": "action.testapp.fail" }
        ],
        "edges": [ { "source": "T", "target": "F" } ]
    });

    let (outcome, events) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.message, "1 node(s) failed");

    let f = outcome
        .executions
        .iter()
        .find(|e| e.node_id == "F")
        .unwrap();
    assert_eq!(f.attempt, 1);
    assert!(f.retry_history.is_empty());
    assert_eq!(f.error.as_ref().unwrap().kind, ErrorKind::Provider4xx);

    let summary_success = events.iter().find_map(|e| match e {
        RunEvent::Summary { success, .. } => Some(*success),
        _ => None,
    });
    assert_eq!(summary_success, Some(false));
}

#[tokio::test]
async fn fatal_error_fails_the_whole_run() {
    let harness = Harness::new(0, DispatcherConfig::default());
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "E", "type": "action.testapp.explode" },
            { "id": "Z", "type": "action.core.noop" }
        ],
        "edges": [
            { "source": "T", "target": "E" },
            { "source": "E", "target": "Z" }
        ]
    });

    let (outcome, _) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.message.contains("fatal"));

    let z = outcome
        .executions
        .iter()
        .find(|e| e.node_id == "Z")
        .unwrap();
    assert_eq!(z.status, NodeExecutionStatus::Skipped);
}

#[tokio::test]
async fn cancellation_interrupts_in_flight_nodes() {
    let harness = Arc::new(Harness::new(0, DispatcherConfig::default()));
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "H", "type": "action.testapp.hang" }
        ],
        "edges": [ { "source": "T", "target": "H" } ]
    });

    let cancel = CancelSignal::new();
    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trip.cancel();
    });

    let (outcome, events) = harness.execute(draft, json!({}), cancel).await;
    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, RunStatus::Canceled);
    assert!(!outcome.success);

    let h = outcome
        .executions
        .iter()
        .find(|e| e.node_id == "H")
        .unwrap();
    assert_eq!(h.status, NodeExecutionStatus::Failed);
    assert_eq!(h.error.as_ref().unwrap().kind, ErrorKind::CancelledByUser);

    match events.last().unwrap() {
        RunEvent::RunEnd { status, .. } => assert_eq!(*status, RunStatus::Canceled),
        other => panic!("expected run-end, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn run_deadline_cancels_the_run() {
    let config = DispatcherConfig {
        run_deadline: std::time::Duration::from_millis(200),
        ..Default::default()
    };
    let harness = Harness::new(0, config);
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "H", "type": "action.testapp.hang" }
        ],
        "edges": [ { "source": "T", "target": "H" } ]
    });

    let (outcome, _) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    let outcome = outcome.unwrap();
    assert_eq!(outcome.status, RunStatus::Canceled);
    assert_eq!(outcome.message, "run deadline exceeded");

    let h = outcome
        .executions
        .iter()
        .find(|e| e.node_id == "H")
        .unwrap();
    assert_eq!(h.error.as_ref().unwrap().kind, ErrorKind::RunDeadlineExceeded);
}

#[tokio::test]
async fn invalid_graph_is_rejected_before_any_event() {
    let harness = Harness::new(0, DispatcherConfig::default());
    // http.request with an empty url fails authoritative validation.
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            {
                "id": "A",
                "type": "action.http.request",
                "params": { "url": "", "method": "GET" }
            }
        ],
        "edges": [ { "source": "T", "target": "A" } ]
    });

    let (outcome, events) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    match outcome {
        Err(EngineError::ValidationFailed(report)) => {
            assert!(report
                .errors
                .iter()
                .any(|e| e.code == "MISSING_REQUIRED_PARAM"));
        }
        other => panic!("expected validation failure, got {:?}", other.map(|o| o.status)),
    }
    assert!(events.is_empty());
}

#[tokio::test(start_paused = true)]
async fn per_node_event_ordering_invariant_holds() {
    let harness = Harness::new(1, DispatcherConfig::default());
    let draft = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "F", "type": "action.testapp.flaky" },
            { "id": "B", "type": "action.testapp.fail" },
            { "id": "C", "type": "action.core.noop" }
        ],
        "edges": [
            { "source": "T", "target": "F" },
            { "source": "T", "target": "B" },
            { "source": "B", "target": "C" }
        ]
    });

    let (outcome, events) = harness
        .execute(draft, json!({}), CancelSignal::new())
        .await;
    outcome.unwrap();

    for node_id in ["T", "F", "B", "C"] {
        let evs = node_events(&events, node_id);
        let starts = evs.iter().filter(|e| e.type_str() == "node-start").count();
        let terminals = evs
            .iter()
            .filter(|e| {
                matches!(
                    e.type_str(),
                    "node-complete" | "node-error" | "node-skip"
                )
            })
            .count();
        assert_eq!(terminals, 1, "node {} terminal events", node_id);
        if evs[0].type_str() == "node-skip" {
            assert_eq!(starts, 0, "skipped node {} must not start", node_id);
        } else {
            assert_eq!(starts, 1, "node {} starts", node_id);
            assert_eq!(evs[0].type_str(), "node-start");
            assert_eq!(
                evs.last().unwrap().type_str(),
                if node_id == "B" { "node-error" } else { "node-complete" }
            );
        }
    }
}
