//! Workflow graph structure
//!
//! A [`WorkflowGraph`] is the canonical node/edge set produced by the
//! normalizer; a [`Workflow`] wraps it with identity and metadata, and a
//! [`Revision`] is an immutable published snapshot tagged with its
//! environment. Adjacency and predecessor accessors here are what the
//! validator and dispatcher walk.

use crate::node::Node;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Handle name emitted by condition nodes on their `true` branch
pub const HANDLE_TRUE: &str = "true";
/// Handle name emitted by condition nodes on their `false` branch
pub const HANDLE_FALSE: &str = "false";

/// A directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Edge id; synthesized as `edge-{index}-{source}-{target}` when absent
    pub id: String,
    /// Source node id
    pub source: String,
    /// Target node id
    pub target: String,
    /// Output handle on the source (condition nodes use `true`/`false`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Input handle on the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    /// Editor label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Declared payload type hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl Edge {
    /// Deterministic id for an edge missing one
    pub fn synthesized_id(index: usize, source: &str, target: &str) -> String {
        format!("edge-{}-{}-{}", index, source, target)
    }

    /// Key identifying a parallel duplicate: same endpoints and handle pair
    pub fn duplicate_key(&self) -> (String, String, Option<String>, Option<String>) {
        (
            self.source.clone(),
            self.target.clone(),
            self.source_handle.clone(),
            self.target_handle.clone(),
        )
    }
}

/// Canonical node/edge set of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Nodes in draft order
    pub nodes: Vec<Node>,
    /// Directed edges
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// True when a node with this id exists
    pub fn has_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Successor adjacency: node id → outgoing edges
    pub fn adjacency(&self) -> HashMap<&str, Vec<&Edge>> {
        let mut adj: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for node in &self.nodes {
            adj.entry(node.id.as_str()).or_default();
        }
        for edge in &self.edges {
            adj.entry(edge.source.as_str()).or_default().push(edge);
        }
        adj
    }

    /// Predecessor map: node id → incoming edges
    pub fn predecessors(&self) -> HashMap<&str, Vec<&Edge>> {
        let mut preds: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for node in &self.nodes {
            preds.entry(node.id.as_str()).or_default();
        }
        for edge in &self.edges {
            preds.entry(edge.target.as_str()).or_default().push(edge);
        }
        preds
    }

    /// Ids of edges leaving `id`
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == id).collect()
    }

    /// Ids of edges entering `id`
    pub fn incoming(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == id).collect()
    }
}

/// Deployment environment of a published revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Parse from the lowercase wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    /// Lowercase wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A workflow draft or head revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Workflow identity
    pub id: Uuid,
    /// Human name
    pub name: String,
    /// Monotonic version counter, bumped on save
    pub version: i64,
    /// Free-form metadata; reserved keys: `createdAt`, `updatedAt`, `migration`
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Node/edge set
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Create a new draft with version 1
    pub fn new(name: impl Into<String>, graph: WorkflowGraph) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: 1,
            metadata: Map::new(),
            graph,
        }
    }

    /// Parse the migration plan from `metadata["migration"]`, if present
    pub fn migration_plan(&self) -> Option<MigrationPlan> {
        self.metadata
            .get("migration")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// An immutable published revision of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Revision identity
    pub id: Uuid,
    /// Owning workflow
    pub workflow_id: Uuid,
    /// Environment this revision is published to
    pub environment: Environment,
    /// Workflow version captured at publish time
    pub version: i64,
    /// Frozen graph
    pub graph: WorkflowGraph,
    /// Metadata captured at publish time
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Publish timestamp
    pub published_at: DateTime<Utc>,
}

/// Migration plan required to promote a breaking revision to production
///
/// All three booleans must be present for the plan to count as complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    /// Freeze in-flight runs on the previous revision
    pub freeze_active_runs: bool,
    /// Move scheduled triggers onto the new revision
    pub schedule_roll_forward: bool,
    /// Backfill runs missed during the freeze window
    pub schedule_backfill: bool,
    /// Operator notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
