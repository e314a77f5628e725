//! Core control connector
//!
//! The `core` connector implements the platform's control-flow operations:
//! triggers that hand the initial payload through, branch/join routing, a
//! template-based transform, delay, and noop. None of it touches the network.

use async_trait::async_trait;
use serde_json::{Map, Value};
use weft_graph::ValuePath;
use weft_registry::{
    ConnectorRuntime, ErrorKind, InvocationOutcome, InvocationRequest, InvokeContext, InvokeError,
    OpRole,
};

/// Runtime for the `core` connector
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreConnector;

impl CoreConnector {
    /// New core runtime
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectorRuntime for CoreConnector {
    fn connector_id(&self) -> &str {
        "core"
    }

    fn supported_operations(&self) -> Vec<(String, OpRole)> {
        vec![
            ("manual".to_string(), OpRole::Trigger),
            ("schedule".to_string(), OpRole::Trigger),
            ("webhook".to_string(), OpRole::Trigger),
            ("branch".to_string(), OpRole::Action),
            ("join".to_string(), OpRole::Action),
            ("map".to_string(), OpRole::Action),
            ("delay".to_string(), OpRole::Action),
            ("noop".to_string(), OpRole::Action),
        ]
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
        ctx: &InvokeContext,
    ) -> Result<InvocationOutcome, InvokeError> {
        match request.operation.as_str() {
            // Triggers surface the run's initial payload as their artifact.
            "manual" | "schedule" | "webhook" => {
                Ok(InvocationOutcome::with_output(request.initial_data))
            }
            "branch" => branch(&request),
            "join" => Ok(InvocationOutcome::with_output(
                request.upstream.unwrap_or(Value::Null),
            )),
            "map" => map_template(&request),
            "delay" => delay(&request, ctx).await,
            "noop" => Ok(InvocationOutcome::with_output(
                request.upstream.unwrap_or(Value::Null),
            )),
            other => Err(InvokeError::new(
                ErrorKind::UnknownOperation,
                format!("core has no operation '{}'", other),
            )),
        }
    }
}

/// Evaluate `left <operator> right` and select the matching handle
fn branch(request: &InvocationRequest) -> Result<InvocationOutcome, InvokeError> {
    let operator = request
        .params
        .get("operator")
        .and_then(Value::as_str)
        .ok_or_else(|| InvokeError::new(ErrorKind::Validation, "branch requires an operator"))?;

    let upstream = request.upstream.clone().unwrap_or(Value::Null);
    let left = request
        .params
        .get("left")
        .cloned()
        .unwrap_or_else(|| upstream.clone());
    let right = request.params.get("right").cloned().unwrap_or(Value::Null);

    let selected = match operator {
        "eq" => left == right,
        "neq" => left != right,
        "gt" => compare_numbers(&left, &right).map_or(false, |ord| ord.is_gt()),
        "lt" => compare_numbers(&left, &right).map_or(false, |ord| ord.is_lt()),
        "contains" => contains(&left, &right),
        "truthy" => truthy(&left),
        other => {
            return Err(InvokeError::new(
                ErrorKind::Validation,
                format!("unknown branch operator '{}'", other),
            ))
        }
    };

    let handle = if selected { "true" } else { "false" };
    Ok(InvocationOutcome {
        output: serde_json::json!({ "branch": handle, "left": left, "right": right }),
        branch: Some(handle.to_string()),
        ..Default::default()
    })
}

fn compare_numbers(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

fn contains(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), needle) => items.contains(needle),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Instantiate the template, substituting `{{path}}` strings from upstream
fn map_template(request: &InvocationRequest) -> Result<InvocationOutcome, InvokeError> {
    let template = request
        .params
        .get("template")
        .ok_or_else(|| InvokeError::new(ErrorKind::Validation, "map requires a template"))?;
    let upstream = request.upstream.clone().unwrap_or(Value::Null);
    Ok(InvocationOutcome::with_output(instantiate(
        template, &upstream,
    )))
}

fn instantiate(template: &Value, upstream: &Value) -> Value {
    match template {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(path) = trimmed
                .strip_prefix("{{")
                .and_then(|rest| rest.strip_suffix("}}"))
            {
                return ValuePath::parse(path.trim())
                    .and_then(|p| p.resolve(upstream).cloned())
                    .unwrap_or(Value::Null);
            }
            template.clone()
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| instantiate(item, upstream)).collect())
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                out.insert(key.clone(), instantiate(value, upstream));
            }
            Value::Object(out)
        }
        _ => template.clone(),
    }
}

/// Pause the branch, cooperating with cancellation
async fn delay(
    request: &InvocationRequest,
    ctx: &InvokeContext,
) -> Result<InvocationOutcome, InvokeError> {
    let ms = request
        .params
        .get("ms")
        .and_then(Value::as_u64)
        .ok_or_else(|| InvokeError::new(ErrorKind::Validation, "delay requires ms"))?;

    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_millis(ms)) => {
            Ok(InvocationOutcome::with_output(
                request.upstream.clone().unwrap_or(Value::Null),
            ))
        }
        _ = ctx.cancel.cancelled() => Err(
            InvokeError::new(ErrorKind::CancelledByUser, "delay interrupted").with_retryable(false),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use weft_registry::Credentials;

    fn request(operation: &str, params: Value, upstream: Option<Value>) -> InvocationRequest {
        InvocationRequest {
            operation: operation.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
            credentials: Credentials::None,
            upstream,
            initial_data: json!({ "seed": 1 }),
        }
    }

    fn ctx() -> InvokeContext {
        InvokeContext::with_deadline(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_manual_returns_initial_data() {
        let outcome = CoreConnector::new()
            .invoke(request("manual", json!({}), None), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.output, json!({ "seed": 1 }));
    }

    #[tokio::test]
    async fn test_branch_operators() {
        let core = CoreConnector::new();
        let cases = [
            (json!({ "operator": "eq", "left": 1, "right": 1 }), "true"),
            (json!({ "operator": "neq", "left": 1, "right": 1 }), "false"),
            (json!({ "operator": "gt", "left": 3, "right": 2 }), "true"),
            (json!({ "operator": "lt", "left": 3, "right": 2 }), "false"),
            (
                json!({ "operator": "contains", "left": "hello", "right": "ell" }),
                "true",
            ),
            (json!({ "operator": "truthy", "left": "" }), "false"),
        ];
        for (params, expected) in cases {
            let outcome = core
                .invoke(request("branch", params.clone(), None), &ctx())
                .await
                .unwrap();
            assert_eq!(
                outcome.branch.as_deref(),
                Some(expected),
                "params: {}",
                params
            );
        }
    }

    #[tokio::test]
    async fn test_branch_defaults_left_to_upstream() {
        let outcome = CoreConnector::new()
            .invoke(
                request(
                    "branch",
                    json!({ "operator": "truthy" }),
                    Some(json!({ "any": "thing" })),
                ),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.branch.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_branch_unknown_operator() {
        let err = CoreConnector::new()
            .invoke(request("branch", json!({ "operator": "xor" }), None), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_map_substitutes_paths() {
        let outcome = CoreConnector::new()
            .invoke(
                request(
                    "map",
                    json!({ "template": {
                        "name": "{{ user.name }}",
                        "first_email": "{{ user.emails[0] }}",
                        "fixed": "literal",
                        "missing": "{{ nope }}"
                    }}),
                    Some(json!({ "user": { "name": "ada", "emails": ["a@e.com"] } })),
                ),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.output,
            json!({
                "name": "ada",
                "first_email": "a@e.com",
                "fixed": "literal",
                "missing": null
            })
        );
    }

    #[tokio::test]
    async fn test_join_and_noop_pass_upstream() {
        let core = CoreConnector::new();
        for op in ["join", "noop"] {
            let outcome = core
                .invoke(request(op, json!({}), Some(json!({ "x": 1 }))), &ctx())
                .await
                .unwrap();
            assert_eq!(outcome.output, json!({ "x": 1 }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_waits_then_passes_upstream() {
        let outcome = CoreConnector::new()
            .invoke(
                request("delay", json!({ "ms": 250 }), Some(json!("payload"))),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.output, json!("payload"));
    }

    #[tokio::test]
    async fn test_delay_cancels_cooperatively() {
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = CoreConnector::new()
            .invoke(request("delay", json!({ "ms": 60_000 }), None), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CancelledByUser);
    }
}
