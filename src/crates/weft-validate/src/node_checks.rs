//! Per-node semantic and schema checks
//!
//! Resolves every node against the capability snapshot, checks credentials,
//! required parameters, static parameter values against the operation's JSON
//! schema, and ref targets against the ancestor relation. Resolver-populated
//! metadata hints only ever widen what the schema accepts.

use crate::issue::{codes, ValidationIssue};
use crate::ValidateOptions;
use jsonschema::error::ValidationErrorKind;
use jsonschema::JSONSchema;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use weft_graph::{Node, NodeRole, ParamValue, ValuePath, WorkflowGraph};
use weft_registry::{CatalogSnapshot, Lifecycle, OperationDef, ResolveMiss, RoleQuery};

/// Parameter key the normalizer injects on every authenticated node; it is
/// never part of an operation's declared schema
const CONNECTION_PARAM: &str = "connectionId";

pub fn check(
    graph: &WorkflowGraph,
    snapshot: &CatalogSnapshot,
    options: &ValidateOptions,
    ancestors: Option<&HashMap<String, HashSet<String>>>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let ref_targets = collect_ref_targets(graph);

    for node in &graph.nodes {
        let resolved = snapshot.resolve(
            &node.app,
            &node.operation,
            RoleQuery::for_node_role(node.role),
        );

        match resolved {
            Err(miss @ (ResolveMiss::UnknownApp | ResolveMiss::NotImplemented)) => {
                issues.push(ValidationIssue::error(
                    Some(node.id.as_str()),
                    format!("/nodes/{}", node.id),
                    codes::UNKNOWN_CONNECTOR,
                    format!("connector '{}' is unavailable: {}", node.app, miss),
                ));
            }
            Err(miss @ (ResolveMiss::UnknownOperation | ResolveMiss::RoleMismatch)) => {
                issues.push(ValidationIssue::error(
                    Some(node.id.as_str()),
                    format!("/nodes/{}", node.id),
                    codes::UNKNOWN_OPERATION,
                    format!(
                        "operation '{}' is not available on '{}': {}",
                        node.operation, node.app, miss
                    ),
                ));
            }
            Ok(handle) => {
                let op = handle.operation();
                check_connection(node, op, &mut issues);
                check_required_params(node, op, &mut issues);
                check_param_schema(node, op, &mut issues);
                check_lifecycle(node, handle.connector().lifecycle, &mut issues);
                check_metadata_hint(node, op, &ref_targets, &mut issues);
            }
        }

        check_refs(node, graph, ancestors, &mut issues);
        check_fan_out(node, graph, options, &mut issues);
        check_unused_output(node, graph, &ref_targets, &mut issues);
    }

    issues
}

/// Node ids that appear as the target of at least one ref parameter
fn collect_ref_targets(graph: &WorkflowGraph) -> HashSet<&str> {
    let mut targets = HashSet::new();
    for node in &graph.nodes {
        for value in node.params.values() {
            if let ParamValue::Ref { node: target, .. } = value {
                targets.insert(target.as_str());
            }
        }
    }
    targets
}

fn check_connection(node: &Node, op: &OperationDef, issues: &mut Vec<ValidationIssue>) {
    if op.requires_auth && node.auth.effective().is_none() {
        issues.push(ValidationIssue::error(
            Some(node.id.as_str()),
            format!("/nodes/{}/auth", node.id),
            codes::MISSING_CONNECTION,
            format!(
                "{}.{} requires a connection or inline credentials",
                node.app, node.operation
            ),
        ));
    }
}

fn check_required_params(node: &Node, op: &OperationDef, issues: &mut Vec<ValidationIssue>) {
    let defaults = op.defaults.as_ref();
    for key in op.required_params() {
        let supplied = node.params.get(&key);
        let satisfied = match supplied {
            Some(value) => !value.is_empty_static(),
            None => defaults.map_or(false, |d| d.contains_key(&key)),
        };
        if !satisfied {
            issues.push(ValidationIssue::error(
                Some(node.id.as_str()),
                format!("/nodes/{}/params/{}", node.id, key),
                codes::MISSING_REQUIRED_PARAM,
                format!("required parameter '{}' is missing or empty", key),
            ));
        }
    }
}

/// Validate static parameter values against the operation schema
///
/// Ref and llm values are unresolved at validation time and are skipped;
/// `required` violations are reported separately with their own code.
fn check_param_schema(node: &Node, op: &OperationDef, issues: &mut Vec<ValidationIssue>) {
    let declared: HashSet<&str> = op
        .params_schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut instance = Map::new();
    for (key, value) in &node.params {
        if key == CONNECTION_PARAM {
            continue;
        }
        if !declared.contains(key.as_str()) {
            issues.push(ValidationIssue::error(
                Some(node.id.as_str()),
                format!("/nodes/{}/params/{}", node.id, key),
                codes::UNKNOWN_PARAM,
                format!(
                    "'{}' is not a declared parameter of {}.{}",
                    key, node.app, node.operation
                ),
            ));
            continue;
        }
        if let ParamValue::Static { value } = value {
            instance.insert(key.clone(), value.clone());
        }
    }

    let compiled = match JSONSchema::compile(&op.params_schema) {
        Ok(schema) => schema,
        Err(e) => {
            tracing::error!(
                app = %node.app,
                operation = %node.operation,
                error = %e,
                "Failed to compile operation parameter schema"
            );
            return;
        }
    };

    let instance_value = Value::Object(instance);
    let collected: Vec<(String, String, bool)> = match compiled.validate(&instance_value) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| {
                let widened = matches!(&e.kind, ValidationErrorKind::Enum { .. })
                    && enum_widened_by_hints(node, e.instance.as_ref());
                let skip = matches!(&e.kind, ValidationErrorKind::Required { .. }) || widened;
                (e.instance_path.to_string(), e.to_string(), skip)
            })
            .collect(),
    };

    for (instance_path, message, skip) in collected {
        if skip {
            continue;
        }
        let key = instance_path.trim_start_matches('/').to_string();
        let path = if key.is_empty() {
            format!("/nodes/{}/params", node.id)
        } else {
            format!("/nodes/{}/params/{}", node.id, key)
        };
        issues.push(ValidationIssue::error(
            Some(node.id.as_str()),
            path,
            codes::PARAM_TYPE_MISMATCH,
            message,
        ));
    }
}

/// Resolver hints widen enums: a value the resolver discovered (a tab or
/// column name) is accepted even when the static schema's enum predates it
fn enum_widened_by_hints(node: &Node, offending: &Value) -> bool {
    let Some(s) = offending.as_str() else {
        return false;
    };
    node.metadata.tabs.iter().any(|t| t == s)
        || node.metadata.columns.iter().any(|c| c == s)
}

fn check_refs(
    node: &Node,
    graph: &WorkflowGraph,
    ancestors: Option<&HashMap<String, HashSet<String>>>,
    issues: &mut Vec<ValidationIssue>,
) {
    for (key, value) in &node.params {
        let ParamValue::Ref { node: target, path } = value else {
            continue;
        };
        let issue_path = format!("/nodes/{}/params/{}", node.id, key);

        if !graph.has_node(target) {
            issues.push(ValidationIssue::error(
                Some(node.id.as_str()),
                issue_path,
                codes::UNRESOLVED_REF,
                format!("ref target '{}' does not exist", target),
            ));
            continue;
        }
        if ValuePath::parse(path).is_none() {
            issues.push(ValidationIssue::error(
                Some(node.id.as_str()),
                issue_path,
                codes::UNRESOLVED_REF,
                format!("ref path '{}' is malformed", path),
            ));
            continue;
        }
        // On cyclic graphs the ancestor relation is undefined; the cycle
        // error already blocks execution.
        if let Some(ancestors) = ancestors {
            let is_ancestor = ancestors
                .get(&node.id)
                .map(|set| set.contains(target))
                .unwrap_or(false);
            if !is_ancestor {
                issues.push(ValidationIssue::error(
                    Some(node.id.as_str()),
                    issue_path,
                    codes::UNRESOLVED_REF,
                    format!("ref target '{}' is not an ancestor of '{}'", target, node.id),
                ));
            }
        }
    }
}

fn check_fan_out(
    node: &Node,
    graph: &WorkflowGraph,
    options: &ValidateOptions,
    issues: &mut Vec<ValidationIssue>,
) {
    let out = graph.outgoing(&node.id).len();
    if out > options.large_fan_out_threshold {
        issues.push(ValidationIssue::warning(
            Some(node.id.as_str()),
            format!("/nodes/{}", node.id),
            codes::LARGE_FAN_OUT,
            format!(
                "node '{}' fans out to {} nodes (threshold {})",
                node.id, out, options.large_fan_out_threshold
            ),
        ));
    }
}

fn check_lifecycle(node: &Node, lifecycle: Lifecycle, issues: &mut Vec<ValidationIssue>) {
    let (code, badge) = match lifecycle {
        Lifecycle::Alpha => (codes::LIFECYCLE_ALPHA, "alpha"),
        Lifecycle::Beta => (codes::LIFECYCLE_BETA, "beta"),
        Lifecycle::Deprecated | Lifecycle::Sunset => (codes::LIFECYCLE_DEPRECATED, "deprecated"),
        Lifecycle::Stable => return,
    };
    issues.push(ValidationIssue::warning(
        Some(node.id.as_str()),
        format!("/nodes/{}", node.id),
        code,
        format!("connector '{}' is {}", node.app, badge),
    ));
}

fn check_unused_output(
    node: &Node,
    graph: &WorkflowGraph,
    ref_targets: &HashSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    // Terminal actions are ordinary sinks; producers and routers whose output
    // nothing consumes are suspicious.
    let produces_for_downstream = matches!(
        node.role,
        NodeRole::Trigger | NodeRole::Transform | NodeRole::Condition
    );
    if produces_for_downstream
        && graph.outgoing(&node.id).is_empty()
        && !ref_targets.contains(node.id.as_str())
    {
        issues.push(ValidationIssue::warning(
            Some(node.id.as_str()),
            format!("/nodes/{}", node.id),
            codes::UNUSED_OUTPUT,
            format!("output of {} '{}' is never consumed", node.role, node.id),
        ));
    }
}

fn check_metadata_hint(
    node: &Node,
    op: &OperationDef,
    ref_targets: &HashSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) {
    if ref_targets.contains(node.id.as_str())
        && op.output_schema.is_none()
        && node.output_metadata.is_empty()
    {
        issues.push(ValidationIssue::warning(
            Some(node.id.as_str()),
            format!("/nodes/{}/outputMetadata", node.id),
            codes::MISSING_METADATA_HINT,
            format!(
                "'{}' is referenced downstream but declares no output shape; refresh metadata to enable path checks",
                node.id
            ),
        ));
    }
}
