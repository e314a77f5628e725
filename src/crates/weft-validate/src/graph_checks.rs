//! Graph-shape checks
//!
//! Structural invariants that hold regardless of what any node does:
//! unique ids, no parallel duplicate edges, edges with real endpoints,
//! acyclicity, single-predecessor fan-in (unless the operation opts in),
//! triggers without inputs, and trigger-reachability of every action.

use crate::issue::{codes, ValidationIssue};
use std::collections::HashMap;
use weft_graph::{ancestor_sets, cycles, NodeRole, WorkflowGraph};
use weft_registry::{CatalogSnapshot, RoleQuery};

pub fn check(graph: &WorkflowGraph, snapshot: &CatalogSnapshot) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    check_duplicate_node_ids(graph, &mut issues);
    check_edges(graph, &mut issues);
    check_fan_in(graph, snapshot, &mut issues);
    check_trigger_inputs(graph, &mut issues);

    let cyclic = check_cycles(graph, &mut issues);
    if !cyclic {
        check_orphans(graph, &mut issues);
    }

    issues
}

fn check_duplicate_node_ids(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for node in &graph.nodes {
        *counts.entry(node.id.as_str()).or_default() += 1;
    }
    let mut duplicated: Vec<&str> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect();
    duplicated.sort();
    for id in duplicated {
        issues.push(ValidationIssue::error(
            Some(id),
            format!("/nodes/{}", id),
            codes::DUPLICATE_NODE_ID,
            format!("node id '{}' is used more than once", id),
        ));
    }
}

fn check_edges(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let mut seen: HashMap<_, &str> = HashMap::new();
    for edge in &graph.edges {
        for (endpoint, label) in [(&edge.source, "source"), (&edge.target, "target")] {
            if !graph.has_node(endpoint) {
                issues.push(ValidationIssue::error(
                    None,
                    format!("/edges/{}", edge.id),
                    codes::EDGE_ENDPOINT_MISSING,
                    format!("edge {} of '{}' does not exist", label, endpoint),
                ));
            }
        }
        if let Some(first) = seen.insert(edge.duplicate_key(), edge.id.as_str()) {
            issues.push(ValidationIssue::error(
                None,
                format!("/edges/{}", edge.id),
                codes::DUPLICATE_EDGE,
                format!(
                    "edge duplicates '{}': same endpoints and handle pair",
                    first
                ),
            ));
        }
    }
}

fn check_fan_in(
    graph: &WorkflowGraph,
    snapshot: &CatalogSnapshot,
    issues: &mut Vec<ValidationIssue>,
) {
    let preds = graph.predecessors();
    for node in &graph.nodes {
        if node.role == NodeRole::Trigger {
            continue;
        }
        let incoming = preds.get(node.id.as_str()).map_or(0, |edges| edges.len());
        if incoming <= 1 {
            continue;
        }
        let accepts = snapshot
            .resolve(
                &node.app,
                &node.operation,
                RoleQuery::for_node_role(node.role),
            )
            .map(|handle| handle.operation().accepts_fan_in)
            .unwrap_or(false);
        if !accepts {
            issues.push(ValidationIssue::error(
                Some(node.id.as_str()),
                format!("/nodes/{}", node.id),
                codes::FAN_IN_NOT_ALLOWED,
                format!(
                    "node '{}' has {} predecessors but {}.{} does not accept fan-in",
                    node.id, incoming, node.app, node.operation
                ),
            ));
        }
    }
}

fn check_trigger_inputs(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let preds = graph.predecessors();
    for node in &graph.nodes {
        if node.role != NodeRole::Trigger {
            continue;
        }
        if preds.get(node.id.as_str()).map_or(false, |e| !e.is_empty()) {
            issues.push(ValidationIssue::error(
                Some(node.id.as_str()),
                format!("/nodes/{}", node.id),
                codes::TRIGGER_HAS_INPUT,
                format!("trigger '{}' must not have incoming edges", node.id),
            ));
        }
    }
}

/// One error per strongly connected component; returns whether any exist
fn check_cycles(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) -> bool {
    let components = cycles(graph);
    for component in &components {
        issues.push(ValidationIssue::error(
            None,
            "/graph",
            codes::CYCLE_DETECTED,
            format!("cycle involving nodes: {}", component.join(", ")),
        ));
    }
    !components.is_empty()
}

fn check_orphans(graph: &WorkflowGraph, issues: &mut Vec<ValidationIssue>) {
    let Some(ancestors) = ancestor_sets(graph) else {
        return;
    };
    let trigger_ids: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.role == NodeRole::Trigger)
        .map(|n| n.id.as_str())
        .collect();

    for node in &graph.nodes {
        if node.role == NodeRole::Trigger {
            continue;
        }
        let has_trigger_ancestor = ancestors
            .get(&node.id)
            .map(|set| trigger_ids.iter().any(|t| set.contains(*t)))
            .unwrap_or(false);
        if !has_trigger_ancestor {
            issues.push(ValidationIssue::error(
                Some(node.id.as_str()),
                format!("/nodes/{}", node.id),
                codes::ORPHAN_ACTION,
                format!("node '{}' is not reachable from any trigger", node.id),
            ));
        }
    }
}
