//! Structural diff and promotion gating
//!
//! Compares two canonical graphs by node-id and edge-id set arithmetic plus a
//! per-node structural compare, classifies breaking changes, and gates
//! promotion to production behind a migration plan when any exist.
//!
//! The capability index lives upstream of this crate, so the two lookups the
//! classifier needs come in through the [`CapabilityView`] seam.

use crate::error::{GraphError, Result};
use crate::graph::{Environment, WorkflowGraph};
use crate::node::{Node, NodeRole, ParamValue};
use crate::path::ValuePath;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

/// Capability lookups the diff classifier needs from the connector index
pub trait CapabilityView {
    /// Required parameter names of an operation, if known
    fn required_params(&self, app: &str, operation: &str) -> Option<Vec<String>>;

    /// Declared JSON type of one output field of an operation, if known
    fn output_field_type(&self, app: &str, operation: &str, field: &str) -> Option<String>;
}

/// A [`CapabilityView`] that knows nothing; classification then relies on
/// node-level metadata alone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl CapabilityView for NoCapabilities {
    fn required_params(&self, _app: &str, _operation: &str) -> Option<Vec<String>> {
        None
    }

    fn output_field_type(&self, _app: &str, _operation: &str, _field: &str) -> Option<String> {
        None
    }
}

/// Kind of a breaking change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakingChangeKind {
    /// An output consumed downstream no longer exists
    OutputRemoved,
    /// A consumed output field changed its declared type
    OutputTypeChanged,
    /// The operation now demands a parameter it previously did not
    RequiredInputAdded,
    /// A condition handle with downstream consumers disappeared
    HandleRemoved,
}

/// One breaking change found by the diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingChange {
    /// Node the change is anchored to
    pub node_id: String,
    /// Classification
    #[serde(rename = "type")]
    pub kind: BreakingChangeKind,
    /// Human description
    pub description: String,
}

/// Structural diff between two workflow graphs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDiff {
    /// Node ids present only in `to`
    pub added_nodes: Vec<String>,
    /// Node ids present only in `from`
    pub removed_nodes: Vec<String>,
    /// Node ids whose app, operation, or parameter key set changed
    pub modified_nodes: Vec<String>,
    /// Edge ids present only in `to`
    pub added_edges: Vec<String>,
    /// Edge ids present only in `from`
    pub removed_edges: Vec<String>,
    /// Workflow metadata differs between the two sides
    pub metadata_changed: bool,
    /// Breaking changes, in node-id order
    pub breaking_changes: Vec<BreakingChange>,
}

impl WorkflowDiff {
    /// True when nothing differs
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.modified_nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
            && !self.metadata_changed
    }

    /// True when promotion needs a migration plan
    pub fn is_breaking(&self) -> bool {
        !self.breaking_changes.is_empty()
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        format!(
            "{} added, {} removed, {} modified nodes; {} added, {} removed edges; {} breaking",
            self.added_nodes.len(),
            self.removed_nodes.len(),
            self.modified_nodes.len(),
            self.added_edges.len(),
            self.removed_edges.len(),
            self.breaking_changes.len(),
        )
    }
}

/// A ref consumption site: consumer node, producer node, first output field
struct Consumption<'a> {
    consumer: &'a str,
    producer: &'a str,
    field: Option<String>,
}

fn ref_consumptions(graph: &WorkflowGraph) -> Vec<Consumption<'_>> {
    let mut sites = Vec::new();
    for node in &graph.nodes {
        for value in node.params.values() {
            if let ParamValue::Ref { node: target, path } = value {
                let field = ValuePath::parse(path).and_then(|p| p.head_key().map(str::to_string));
                sites.push(Consumption {
                    consumer: node.id.as_str(),
                    producer: target.as_str(),
                    field,
                });
            }
        }
    }
    sites
}

/// Declared type of one output field: resolver hints win, then the index
fn output_field_type(node: &Node, caps: &dyn CapabilityView, field: &str) -> Option<String> {
    let from_hints = node
        .output_metadata
        .json_schema
        .as_ref()
        .and_then(|schema| schema.get("properties"))
        .and_then(|props| props.get(field))
        .and_then(|prop| prop.get("type"))
        .and_then(Value::as_str)
        .map(str::to_string);
    from_hints.or_else(|| caps.output_field_type(&node.app, &node.operation, field))
}

/// Compute the structural diff between two canonical graphs
pub fn diff_graphs(
    from: &WorkflowGraph,
    to: &WorkflowGraph,
    caps: &dyn CapabilityView,
) -> WorkflowDiff {
    let from_nodes: HashMap<&str, &Node> =
        from.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let to_nodes: HashMap<&str, &Node> = to.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut added_nodes: Vec<String> = to_nodes
        .keys()
        .filter(|id| !from_nodes.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    let mut removed_nodes: Vec<String> = from_nodes
        .keys()
        .filter(|id| !to_nodes.contains_key(*id))
        .map(|id| id.to_string())
        .collect();

    let mut modified_nodes: Vec<String> = Vec::new();
    for (id, from_node) in &from_nodes {
        let Some(to_node) = to_nodes.get(id) else {
            continue;
        };
        let from_keys: BTreeSet<&String> = from_node.params.keys().collect();
        let to_keys: BTreeSet<&String> = to_node.params.keys().collect();
        if from_node.app != to_node.app
            || from_node.operation != to_node.operation
            || from_keys != to_keys
        {
            modified_nodes.push(id.to_string());
        }
    }

    let from_edges: BTreeSet<&str> = from.edges.iter().map(|e| e.id.as_str()).collect();
    let to_edges: BTreeSet<&str> = to.edges.iter().map(|e| e.id.as_str()).collect();
    let mut added_edges: Vec<String> = to_edges
        .difference(&from_edges)
        .map(|id| id.to_string())
        .collect();
    let mut removed_edges: Vec<String> = from_edges
        .difference(&to_edges)
        .map(|id| id.to_string())
        .collect();

    added_nodes.sort();
    removed_nodes.sort();
    modified_nodes.sort();
    added_edges.sort();
    removed_edges.sort();

    let breaking_changes = classify_breaking(from, to, &from_nodes, &to_nodes, caps);

    WorkflowDiff {
        added_nodes,
        removed_nodes,
        modified_nodes,
        added_edges,
        removed_edges,
        metadata_changed: false,
        breaking_changes,
    }
}

/// Diff two graphs plus their workflow metadata maps
pub fn diff_with_metadata(
    from: &WorkflowGraph,
    from_metadata: &Map<String, Value>,
    to: &WorkflowGraph,
    to_metadata: &Map<String, Value>,
    caps: &dyn CapabilityView,
) -> WorkflowDiff {
    let mut diff = diff_graphs(from, to, caps);
    // Reserved bookkeeping keys never count as a metadata change.
    let scrub = |m: &Map<String, Value>| {
        let mut m = m.clone();
        m.remove("createdAt");
        m.remove("updatedAt");
        m
    };
    diff.metadata_changed = scrub(from_metadata) != scrub(to_metadata);
    diff
}

fn classify_breaking(
    from: &WorkflowGraph,
    to: &WorkflowGraph,
    from_nodes: &HashMap<&str, &Node>,
    to_nodes: &HashMap<&str, &Node>,
    caps: &dyn CapabilityView,
) -> Vec<BreakingChange> {
    let mut changes: Vec<BreakingChange> = Vec::new();
    let consumptions = ref_consumptions(from);

    // Outputs consumed downstream must survive with the same declared type.
    for site in &consumptions {
        let Some(from_producer) = from_nodes.get(site.producer) else {
            continue;
        };
        match to_nodes.get(site.producer) {
            None => {
                changes.push(BreakingChange {
                    node_id: site.producer.to_string(),
                    kind: BreakingChangeKind::OutputRemoved,
                    description: format!(
                        "node '{}' was removed but '{}' still consumed its output",
                        site.producer, site.consumer
                    ),
                });
            }
            Some(to_producer) => {
                if from_producer.app != to_producer.app
                    || from_producer.operation != to_producer.operation
                {
                    changes.push(BreakingChange {
                        node_id: site.producer.to_string(),
                        kind: BreakingChangeKind::OutputRemoved,
                        description: format!(
                            "operation of '{}' changed from {}.{} to {}.{}, replacing outputs consumed by '{}'",
                            site.producer,
                            from_producer.app,
                            from_producer.operation,
                            to_producer.app,
                            to_producer.operation,
                            site.consumer
                        ),
                    });
                    continue;
                }
                if let Some(field) = &site.field {
                    let before = output_field_type(from_producer, caps, field);
                    let after = output_field_type(to_producer, caps, field);
                    if let (Some(before), Some(after)) = (before, after) {
                        if before != after {
                            changes.push(BreakingChange {
                                node_id: site.producer.to_string(),
                                kind: BreakingChangeKind::OutputTypeChanged,
                                description: format!(
                                    "output field '{}' of '{}' changed type from {} to {}",
                                    field, site.producer, before, after
                                ),
                            });
                        }
                    }
                }
            }
        }
    }

    // New required parameters on surviving nodes.
    for (id, from_node) in from_nodes {
        let Some(to_node) = to_nodes.get(id) else {
            continue;
        };
        let before: BTreeSet<String> = caps
            .required_params(&from_node.app, &from_node.operation)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let after: BTreeSet<String> = caps
            .required_params(&to_node.app, &to_node.operation)
            .unwrap_or_default()
            .into_iter()
            .collect();
        for param in after.difference(&before) {
            changes.push(BreakingChange {
                node_id: id.to_string(),
                kind: BreakingChangeKind::RequiredInputAdded,
                description: format!("operation of '{}' now requires parameter '{}'", id, param),
            });
        }
    }

    // Condition handles that fed downstream consumers must survive.
    for node in &from.nodes {
        if node.role != NodeRole::Condition {
            continue;
        }
        if !to_nodes.contains_key(node.id.as_str()) {
            continue; // already reported as output-removed if consumed
        }
        let from_handles: BTreeSet<&str> = from
            .outgoing(&node.id)
            .iter()
            .filter_map(|e| e.source_handle.as_deref())
            .collect();
        let to_handles: BTreeSet<&str> = to
            .outgoing(&node.id)
            .iter()
            .filter_map(|e| e.source_handle.as_deref())
            .collect();
        for handle in from_handles.difference(&to_handles) {
            changes.push(BreakingChange {
                node_id: node.id.clone(),
                kind: BreakingChangeKind::HandleRemoved,
                description: format!(
                    "condition '{}' no longer routes its '{}' handle",
                    node.id, handle
                ),
            });
        }
    }

    changes.sort_by(|a, b| a.node_id.cmp(&b.node_id).then(a.description.cmp(&b.description)));
    changes.dedup();
    changes
}

/// Enforce the promotion policy
///
/// Publishing to production with breaking changes requires a complete
/// migration plan in `metadata["migration"]`; non-breaking diffs and
/// development promotions pass unconditionally.
pub fn check_promotion(
    diff: &WorkflowDiff,
    environment: Environment,
    metadata: &Map<String, Value>,
) -> Result<()> {
    if environment != Environment::Production || !diff.is_breaking() {
        return Ok(());
    }

    let plan = metadata
        .get("migration")
        .and_then(|v| serde_json::from_value::<crate::graph::MigrationPlan>(v.clone()).ok());
    if plan.is_some() {
        return Ok(());
    }

    Err(GraphError::MigrationPlanRequired(format!(
        "{} breaking change(s) require a migration plan to publish to production",
        diff.breaking_changes.len()
    )))
}
