//! HTTP surface integration tests
//!
//! Drives the axum router end to end over a temporary database: validation
//! envelopes, save/diff/publish with migration gating, admission rejection
//! of invalid drafts, queued execution through the in-process worker, and
//! the health surfaces.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use weft_server::{App, WeftConfig};

struct TestServer {
    app: App,
    router: Router,
    _dir: tempfile::TempDir,
}

async fn server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let app = App::build(WeftConfig::default(), dir.path().join("weft.db"))
        .await
        .unwrap();
    let router = app.router();
    TestServer {
        app,
        router,
        _dir: dir,
    }
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn linear_graph(url: &str) -> Value {
    json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            {
                "id": "A",
                "type": "action.http.request",
                "params": { "url": url, "method": "GET" }
            }
        ],
        "edges": [ { "source": "T", "target": "A" } ]
    })
}

#[tokio::test]
async fn validate_endpoint_reports_missing_required_param() {
    let server = server().await;
    let (status, body) = call(
        &server.router,
        Method::POST,
        "/api/workflows/validate",
        Some(json!({ "graph": linear_graph("") })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["validation"]["valid"], false);

    let errors = body["validation"]["errors"].as_array().unwrap();
    let url_error = errors
        .iter()
        .find(|e| e["code"] == "MISSING_REQUIRED_PARAM")
        .unwrap();
    assert_eq!(url_error["nodeId"], "A");
    assert_eq!(url_error["path"], "/nodes/A/params/url");
    assert_eq!(url_error["severity"], "error");

    server.app.stop().await;
}

#[tokio::test]
async fn enqueue_rejects_invalid_draft_without_creating_a_run() {
    let server = server().await;

    let (status, body) = call(
        &server.router,
        Method::POST,
        "/api/flows/save",
        Some(json!({ "name": "broken", "graph": linear_graph("") })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let workflow_id = body["workflowId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &server.router,
        Method::POST,
        "/api/executions",
        Some(json!({ "workflowId": workflow_id, "triggerType": "manual" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    let errors = body["details"]["validation"]["errors"].as_array().unwrap();
    assert!(errors.iter().any(|e| e["code"] == "MISSING_REQUIRED_PARAM"));

    // No run row was created.
    let (status, body) = call(
        &server.router,
        Method::GET,
        &format!("/api/executions?workflowId={}", workflow_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["executions"].as_array().unwrap().len(), 0);

    server.app.stop().await;
}

#[tokio::test]
async fn queued_execution_runs_to_completion() {
    let server = server().await;

    let graph = json!({
        "nodes": [
            { "id": "T", "type": "trigger.core.manual" },
            { "id": "A", "type": "action.core.noop" }
        ],
        "edges": [ { "source": "T", "target": "A" } ]
    });
    let (_, body) = call(
        &server.router,
        Method::POST,
        "/api/flows/save",
        Some(json!({ "name": "ok", "graph": graph })),
    )
    .await;
    let workflow_id = body["workflowId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &server.router,
        Method::POST,
        "/api/executions",
        Some(json!({
            "workflowId": workflow_id,
            "triggerType": "manual",
            "initialData": { "seed": 7 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "enqueue failed: {}", body);
    let execution_id = body["executionId"].as_str().unwrap().to_string();

    // Poll the retrieval endpoint until the worker finishes the run.
    let mut last = Value::Null;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (status, body) = call(
            &server.router,
            Method::GET,
            &format!("/api/executions/{}", execution_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        last = body;
        if last["execution"]["status"] == "succeeded" || last["execution"]["status"] == "failed" {
            break;
        }
    }
    assert_eq!(last["execution"]["status"], "succeeded", "run: {}", last);

    let node_executions = last["nodeExecutions"].as_array().unwrap();
    assert_eq!(node_executions.len(), 2);
    let events = last["events"].as_array().unwrap();
    let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
    assert!(types.contains(&"run-start"));
    assert!(types.contains(&"summary"));
    assert_eq!(types.last(), Some(&"run-end"));

    server.app.stop().await;
}

#[tokio::test]
async fn breaking_promotion_requires_migration_plan() {
    let server = server().await;

    // Version 1: gmail trigger feeding a slack message through a ref.
    let v1 = json!({
        "nodes": [
            {
                "id": "X",
                "type": "trigger.gmail.new-email",
                "data": { "connectionId": "conn-g" }
            },
            {
                "id": "S",
                "type": "action.slack.post-message",
                "data": { "connectionId": "conn-s" },
                "params": {
                    "channel": "#ops",
                    "text": { "ref": { "node": "X", "path": "email" } }
                }
            }
        ],
        "edges": [ { "source": "X", "target": "S" } ]
    });
    let (_, body) = call(
        &server.router,
        Method::POST,
        "/api/flows/save",
        Some(json!({ "name": "alerts", "graph": v1 })),
    )
    .await;
    let workflow_id = body["workflowId"].as_str().unwrap().to_string();

    let (status, _) = call(
        &server.router,
        Method::POST,
        &format!("/api/workflows/{}/publish", workflow_id),
        Some(json!({ "environment": "production" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Version 2: the consumed trigger changes operation.
    let v2 = json!({
        "nodes": [
            {
                "id": "X",
                "type": "trigger.google-sheets.new-row",
                "data": { "connectionId": "conn-g" },
                "params": { "spreadsheetId": "s1" }
            },
            {
                "id": "S",
                "type": "action.slack.post-message",
                "data": { "connectionId": "conn-s" },
                "params": {
                    "channel": "#ops",
                    "text": { "ref": { "node": "X", "path": "email" } }
                }
            }
        ],
        "edges": [ { "source": "X", "target": "S" } ]
    });
    call(
        &server.router,
        Method::POST,
        "/api/flows/save",
        Some(json!({ "id": workflow_id, "name": "alerts", "graph": v2 })),
    )
    .await;

    // The diff endpoint reports the breaking change.
    let (status, body) = call(
        &server.router,
        Method::GET,
        &format!("/api/workflows/{}/diff/prod", workflow_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let breaking = body["diff"]["breakingChanges"].as_array().unwrap();
    assert!(!breaking.is_empty());
    assert!(breaking
        .iter()
        .any(|c| c["type"] == "output-removed" && c["nodeId"] == "X"));

    // Publish without a plan: blocked.
    let (status, body) = call(
        &server.router,
        Method::POST,
        &format!("/api/workflows/{}/publish", workflow_id),
        Some(json!({ "environment": "production" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "MIGRATION_PLAN_REQUIRED");

    // Publish with a complete plan: allowed.
    let (status, body) = call(
        &server.router,
        Method::POST,
        &format!("/api/workflows/{}/publish", workflow_id),
        Some(json!({
            "environment": "production",
            "metadata": {
                "migration": {
                    "freezeActiveRuns": true,
                    "scheduleRollForward": true,
                    "scheduleBackfill": true
                }
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "publish failed: {}", body);
    assert_eq!(body["success"], true);

    server.app.stop().await;
}

#[tokio::test]
async fn registry_endpoints_expose_catalog_and_schemas() {
    let server = server().await;

    let (status, body) = call(
        &server.router,
        Method::GET,
        "/api/registry/catalog?implemented=true",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let connectors = body["connectors"].as_array().unwrap();
    let ids: Vec<&str> = connectors.iter().filter_map(|c| c["id"].as_str()).collect();
    // Only core and http ship runtimes; app connectors are catalog-only.
    assert!(ids.contains(&"core"));
    assert!(ids.contains(&"http"));
    assert!(!ids.contains(&"slack"));

    let (status, body) = call(
        &server.router,
        Method::GET,
        "/api/registry/op-schema?app=http&op=request&kind=action",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["defaults"]["method"], "GET");
    assert!(body["schema"]["required"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "url"));

    let (status, _) = call(
        &server.router,
        Method::GET,
        "/api/registry/op-schema?app=http&op=missing",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.app.stop().await;
}

#[tokio::test]
async fn health_surfaces_report_queue_and_fleet() {
    let server = server().await;

    let (status, body) = call(&server.router, Method::GET, "/api/health/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"]["status"], "pass");

    // The in-process worker heartbeats on startup.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (status, body) = call(&server.router, Method::GET, "/api/workers/heartbeat", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workers"]["hasExecutionWorker"], true);

    // External workers can post their own heartbeats.
    let (status, _) = call(
        &server.router,
        Method::POST,
        "/api/workers/heartbeat",
        Some(json!({ "workerId": "remote-1", "roles": ["execution", "timer"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    server.app.stop().await;
}
