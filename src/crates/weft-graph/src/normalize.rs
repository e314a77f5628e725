//! Draft normalizer
//!
//! Accepts a user-authored node/edge list in any of the shapes the platform
//! sees (editor local drafts, imported JSON, API payloads) and emits a
//! canonical [`WorkflowGraph`]. Normalization never fails: whatever cannot be
//! inferred falls back to a deterministic default and the validator is the
//! one that complains. The function is idempotent over its own output.

use crate::graph::{Edge, WorkflowGraph};
use crate::node::{
    LlmParam, MetadataHints, Node, NodeAuth, NodeRole, ParamMap, ParamValue, Position,
};
use serde_json::{Map, Value};

/// Fallback connector id when nothing can be inferred
pub const DEFAULT_APP: &str = "core";
/// Fallback operation id when nothing can be inferred
pub const DEFAULT_OPERATION: &str = "run";

/// Draft fields that carry transient execution state and are never persisted
/// on the canonical graph
const EXECUTION_STATE_FIELDS: &[&str] = &[
    "executionStatus",
    "executionError",
    "lastExecution",
    "isRunning",
    "isCompleted",
];

/// Normalize an arbitrary draft document into a canonical graph
///
/// The draft may be `{ nodes, edges }`, `{ graph: { nodes, edges } }`, or a
/// bare array of nodes. Missing collections normalize to empty ones.
pub fn normalize_draft(draft: &Value) -> WorkflowGraph {
    let (raw_nodes, raw_edges) = extract_collections(draft);

    let nodes: Vec<Node> = raw_nodes
        .iter()
        .enumerate()
        .map(|(index, raw)| normalize_node(raw, index))
        .collect();

    let edges = normalize_edges(&raw_edges);

    WorkflowGraph { nodes, edges }
}

fn extract_collections(draft: &Value) -> (Vec<Value>, Vec<Value>) {
    if let Value::Array(items) = draft {
        return (items.clone(), Vec::new());
    }
    let obj = match draft.as_object() {
        Some(o) => o,
        None => return (Vec::new(), Vec::new()),
    };
    if let Some(graph) = obj.get("graph").and_then(Value::as_object) {
        return (
            array_field(graph, "nodes"),
            array_field(graph, "edges"),
        );
    }
    (array_field(obj, "nodes"), array_field(obj, "edges"))
}

fn array_field(obj: &Map<String, Value>, key: &str) -> Vec<Value> {
    obj.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Normalize a single raw node
pub fn normalize_node(raw: &Value, index: usize) -> Node {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);
    let data = obj.get("data").and_then(Value::as_object);

    let id = string_field(obj, "id").unwrap_or_else(|| format!("node_{}", index));

    // Dotted type candidates, in inference priority order.
    let type_candidate = string_field(obj, "type")
        .or_else(|| string_field(obj, "nodeType"))
        .or_else(|| string_field(obj, "op"));
    let segments: Vec<String> = type_candidate
        .as_deref()
        .map(split_dotted)
        .unwrap_or_default();

    let role = string_field(obj, "role")
        .as_deref()
        .and_then(NodeRole::parse)
        .or_else(|| segments.first().and_then(|s| NodeRole::parse(s)))
        .unwrap_or(NodeRole::Action);

    let app = string_field(obj, "app")
        .or_else(|| string_field(obj, "connectorId"))
        .or_else(|| string_field(obj, "provider"))
        .or_else(|| segments.get(1).cloned())
        .map(|s| canonicalize_app(&s))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_APP.to_string());

    let operation = string_field(obj, "operation")
        .or_else(|| string_field(obj, "function"))
        .or_else(|| string_field(obj, "actionId"))
        .or_else(|| string_field(obj, "triggerId"))
        .or_else(|| {
            if segments.len() >= 2 {
                segments.last().cloned()
            } else {
                None
            }
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_OPERATION.to_string());

    let mut params = merge_params(obj, data);
    let auth = normalize_auth(obj, data, &mut params);

    let position = obj
        .get("position")
        .or_else(|| data.and_then(|d| d.get("position")))
        .and_then(|v| serde_json::from_value::<Position>(v.clone()).ok());

    let (metadata, output_metadata) = normalize_metadata(obj, data, &params);

    Node {
        node_type: Node::canonical_type(role, &app, &operation),
        id,
        role,
        app,
        operation,
        params,
        auth,
        position,
        metadata,
        output_metadata,
    }
}

/// Lower-kebab canonicalization of a connector id
///
/// Lowercase, runs of non-alphanumerics collapse to a single `-`, leading and
/// trailing `-` trimmed.
pub fn canonicalize_app(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

fn split_dotted(raw: &str) -> Vec<String> {
    raw.split(['.', ':'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Merge parameter sources with left-to-right precedence
///
/// `data.config` → `config` → `params` → `parameters` → `data.params` →
/// `data.parameters`; the first source to define a key wins.
fn merge_params(obj: &Map<String, Value>, data: Option<&Map<String, Value>>) -> ParamMap {
    let sources: [Option<&Value>; 6] = [
        data.and_then(|d| d.get("config")),
        obj.get("config"),
        obj.get("params"),
        obj.get("parameters"),
        data.and_then(|d| d.get("params")),
        data.and_then(|d| d.get("parameters")),
    ];

    let mut merged = ParamMap::new();
    for source in sources.into_iter().flatten() {
        let Some(map) = source.as_object() else {
            continue;
        };
        for (key, value) in map {
            if EXECUTION_STATE_FIELDS.contains(&key.as_str()) {
                continue;
            }
            merged
                .entry(key.clone())
                .or_insert_with(|| param_value_from_raw(value));
        }
    }
    merged
}

/// Interpret one raw parameter value as a tagged [`ParamValue`]
///
/// Canonical `{ kind: ... }` objects round-trip unchanged; draft shorthands
/// (`{ ref: { node, path } }`, `"$ref"` strings, `{ llm: {...} }`) are
/// upgraded; everything else is a static literal.
pub fn param_value_from_raw(raw: &Value) -> ParamValue {
    if let Some(obj) = raw.as_object() {
        if obj.contains_key("kind") {
            if let Ok(canonical) = serde_json::from_value::<ParamValue>(raw.clone()) {
                return canonical;
            }
        }
        if let Some(r) = obj.get("ref").and_then(Value::as_object) {
            if let (Some(node), Some(path)) = (
                r.get("node").and_then(Value::as_str),
                r.get("path").and_then(Value::as_str),
            ) {
                return ParamValue::reference(node, path);
            }
        }
        if let Some(short) = obj.get("$ref").and_then(Value::as_str) {
            let (node, path) = match short.split_once('.') {
                Some((node, path)) => (node, path),
                None => (short, ""),
            };
            return ParamValue::reference(node, path);
        }
        if let Some(llm) = obj.get("llm") {
            if let Ok(parsed) = serde_json::from_value::<LlmParam>(llm.clone()) {
                return ParamValue::Llm(parsed);
            }
        }
    }
    ParamValue::Static { value: raw.clone() }
}

/// Reconcile the three places a connection id can live
///
/// `data.connectionId`, `data.auth.connectionId` / `auth.connectionId`, and
/// `params.connectionId` are read in that order; the first non-empty value is
/// written back to both the auth block and `params.connectionId` so all agree.
fn normalize_auth(
    obj: &Map<String, Value>,
    data: Option<&Map<String, Value>>,
    params: &mut ParamMap,
) -> NodeAuth {
    let auth_obj = obj.get("auth").and_then(Value::as_object);
    let data_auth = data.and_then(|d| d.get("auth")).and_then(Value::as_object);

    let params_connection = match params.get("connectionId") {
        Some(ParamValue::Static { value }) => value
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    };

    let connection_id = data
        .and_then(|d| string_field(d, "connectionId"))
        .or_else(|| data_auth.and_then(|a| string_field(a, "connectionId")))
        .or_else(|| auth_obj.and_then(|a| string_field(a, "connectionId")))
        .or_else(|| string_field(obj, "authRef"))
        .or(params_connection);

    let inline = obj
        .get("authRef")
        .and_then(Value::as_object)
        .or_else(|| auth_obj.and_then(|a| a.get("inline")).and_then(Value::as_object))
        .or_else(|| data_auth.and_then(|a| a.get("inline")).and_then(Value::as_object))
        .or_else(|| data.and_then(|d| d.get("credentials")).and_then(Value::as_object))
        .cloned();

    if let Some(id) = &connection_id {
        params.insert(
            "connectionId".to_string(),
            ParamValue::literal(id.as_str()),
        );
    }

    NodeAuth {
        connection_id,
        inline,
    }
}

/// Parse advisory metadata and seed missing hints
///
/// When `params` has named keys and no columns were supplied, the key set
/// seeds `metadata.columns`; an absent `outputMetadata` mirrors `metadata`.
fn normalize_metadata(
    obj: &Map<String, Value>,
    data: Option<&Map<String, Value>>,
    params: &ParamMap,
) -> (MetadataHints, MetadataHints) {
    let mut metadata = obj
        .get("metadata")
        .or_else(|| data.and_then(|d| d.get("metadata")))
        .and_then(|v| serde_json::from_value::<MetadataHints>(v.clone()).ok())
        .unwrap_or_default();

    if metadata.columns.is_empty() && !params.is_empty() {
        metadata.columns = params.keys().cloned().collect();
    }

    let output_metadata = obj
        .get("outputMetadata")
        .or_else(|| data.and_then(|d| d.get("outputMetadata")))
        .and_then(|v| serde_json::from_value::<MetadataHints>(v.clone()).ok())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| metadata.clone());

    (metadata, output_metadata)
}

fn normalize_edges(raw_edges: &[Value]) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(raw_edges.len());
    for (index, raw) in raw_edges.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            continue;
        };
        let (Some(source), Some(target)) =
            (string_field(obj, "source"), string_field(obj, "target"))
        else {
            continue;
        };
        let id = string_field(obj, "id")
            .unwrap_or_else(|| Edge::synthesized_id(index, &source, &target));
        edges.push(Edge {
            id,
            source,
            target,
            source_handle: string_field(obj, "sourceHandle"),
            target_handle: string_field(obj, "targetHandle"),
            label: string_field(obj, "label"),
            data_type: string_field(obj, "dataType"),
        });
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_when_everything_is_blank() {
        let graph = normalize_draft(&json!({ "nodes": [{}], "edges": [] }));
        let node = &graph.nodes[0];
        assert_eq!(node.id, "node_0");
        assert_eq!(node.node_type, "action.core.run");
        assert_eq!(node.role, NodeRole::Action);
    }

    #[test]
    fn test_role_app_operation_from_dotted_type() {
        let graph = normalize_draft(&json!({
            "nodes": [{ "id": "a", "nodeType": "trigger.Gmail.new-email" }]
        }));
        let node = &graph.nodes[0];
        assert_eq!(node.role, NodeRole::Trigger);
        assert_eq!(node.app, "gmail");
        assert_eq!(node.operation, "new-email");
        assert_eq!(node.node_type, "trigger.gmail.new-email");
    }

    #[test]
    fn test_explicit_fields_beat_dotted_type() {
        let graph = normalize_draft(&json!({
            "nodes": [{
                "id": "a",
                "role": "action",
                "app": "Google Sheets",
                "operation": "append-row",
                "nodeType": "trigger.slack.message"
            }]
        }));
        let node = &graph.nodes[0];
        assert_eq!(node.role, NodeRole::Action);
        assert_eq!(node.app, "google-sheets");
        assert_eq!(node.operation, "append-row");
        assert_eq!(node.node_type, "action.google-sheets.append-row");
    }

    #[test]
    fn test_numeric_id_coerced_to_string() {
        let graph = normalize_draft(&json!({ "nodes": [{ "id": 7 }] }));
        assert_eq!(graph.nodes[0].id, "7");
    }

    #[test]
    fn test_canonicalize_app() {
        assert_eq!(canonicalize_app("Google Sheets"), "google-sheets");
        assert_eq!(canonicalize_app("  HTTP!! "), "http");
        assert_eq!(canonicalize_app("a__b"), "a-b");
        assert_eq!(canonicalize_app("---"), "");
    }

    #[test]
    fn test_param_merge_precedence() {
        let graph = normalize_draft(&json!({
            "nodes": [{
                "id": "a",
                "data": { "config": { "url": "from-data-config" } },
                "config": { "url": "from-config", "method": "GET" },
                "params": { "timeout": 5 }
            }]
        }));
        let params = &graph.nodes[0].params;
        assert_eq!(params["url"], ParamValue::literal("from-data-config"));
        assert_eq!(params["method"], ParamValue::literal("GET"));
        assert_eq!(params["timeout"], ParamValue::literal(5));
    }

    #[test]
    fn test_ref_and_llm_shorthand_upgrade() {
        let graph = normalize_draft(&json!({
            "nodes": [{
                "id": "a",
                "params": {
                    "email": { "ref": { "node": "t", "path": "payload.email" } },
                    "short": { "$ref": "t.payload.id" },
                    "subject": { "llm": {
                        "prompt": "summarize",
                        "model": "m",
                        "provider": "p"
                    }}
                }
            }]
        }));
        let params = &graph.nodes[0].params;
        assert_eq!(
            params["email"],
            ParamValue::reference("t", "payload.email")
        );
        assert_eq!(params["short"], ParamValue::reference("t", "payload.id"));
        assert!(matches!(params["subject"], ParamValue::Llm(_)));
    }

    #[test]
    fn test_connection_id_propagates_everywhere() {
        let graph = normalize_draft(&json!({
            "nodes": [{
                "id": "a",
                "data": { "connectionId": "conn-9" }
            }]
        }));
        let node = &graph.nodes[0];
        assert_eq!(node.auth.connection_id.as_deref(), Some("conn-9"));
        assert_eq!(
            node.params.get("connectionId"),
            Some(&ParamValue::literal("conn-9"))
        );
    }

    #[test]
    fn test_inline_credentials_from_auth_ref_object() {
        let graph = normalize_draft(&json!({
            "nodes": [{ "id": "a", "authRef": { "apiKey": "secret" } }]
        }));
        let inline = graph.nodes[0].auth.inline.as_ref().expect("inline creds");
        assert_eq!(inline["apiKey"], json!("secret"));
    }

    #[test]
    fn test_execution_state_fields_stripped() {
        let graph = normalize_draft(&json!({
            "nodes": [{
                "id": "a",
                "params": {
                    "url": "https://e.com",
                    "executionStatus": "running",
                    "isRunning": true
                }
            }]
        }));
        let params = &graph.nodes[0].params;
        assert!(params.contains_key("url"));
        assert!(!params.contains_key("executionStatus"));
        assert!(!params.contains_key("isRunning"));
    }

    #[test]
    fn test_metadata_columns_seeded_from_params() {
        let graph = normalize_draft(&json!({
            "nodes": [{
                "id": "a",
                "params": { "url": "https://e.com", "method": "GET" }
            }]
        }));
        let node = &graph.nodes[0];
        assert_eq!(node.metadata.columns, vec!["method", "url"]);
        assert_eq!(node.output_metadata.columns, node.metadata.columns);
    }

    #[test]
    fn test_edges_without_endpoints_dropped() {
        let graph = normalize_draft(&json!({
            "nodes": [{ "id": "a" }, { "id": "b" }],
            "edges": [
                { "source": "a", "target": "b" },
                { "source": "a" },
                { "target": "b" },
                "garbage"
            ]
        }));
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].id, "edge-0-a-b");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let draft = json!({
            "nodes": [
                {
                    "id": "t",
                    "type": "trigger.core.manual",
                    "data": { "connectionId": "c1", "config": { "greeting": "hi" } }
                },
                {
                    "id": "a",
                    "op": "action:http:request",
                    "params": {
                        "url": "https://e.com",
                        "body": { "ref": { "node": "t", "path": "greeting" } }
                    }
                }
            ],
            "edges": [ { "source": "t", "target": "a" } ]
        });

        let once = normalize_draft(&draft);
        let serialized = serde_json::to_value(&once).unwrap();
        let twice = normalize_draft(&serialized);
        assert_eq!(once, twice);
    }
}
