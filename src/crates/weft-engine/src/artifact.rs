//! Per-run artifact store
//!
//! Maps node id to its latest successful output for the lifetime of one run.
//! The dispatcher is the sole owner: workers hand outputs back over the
//! completion channel, and the dispatcher both writes them here and reads
//! them when resolving downstream refs. Dropped with the run.

use serde_json::Value;
use std::collections::HashMap;
use weft_graph::ValuePath;

/// Why a ref lookup failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactMiss {
    /// No artifact stored for that node
    UnknownNode(String),
    /// The path does not parse
    BadPath(String),
    /// The path points into the artifact but nothing is there
    MissingPath { node: String, path: String },
}

impl std::fmt::Display for ArtifactMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode(node) => write!(f, "no artifact for node '{}'", node),
            Self::BadPath(path) => write!(f, "malformed artifact path '{}'", path),
            Self::MissingPath { node, path } => {
                write!(f, "artifact of '{}' has nothing at '{}'", node, path)
            }
        }
    }
}

/// In-memory artifact map for one run
#[derive(Debug, Default)]
pub struct ArtifactStore {
    outputs: HashMap<String, Value>,
}

impl ArtifactStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node's successful output, replacing any earlier one
    pub fn insert(&mut self, node_id: impl Into<String>, output: Value) {
        self.outputs.insert(node_id.into(), output);
    }

    /// Whole artifact of a node
    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// Resolve a ref `(node, path)` into the stored artifacts
    pub fn resolve(&self, node_id: &str, path: &str) -> Result<Value, ArtifactMiss> {
        let artifact = self
            .outputs
            .get(node_id)
            .ok_or_else(|| ArtifactMiss::UnknownNode(node_id.to_string()))?;
        let parsed = ValuePath::parse(path).ok_or_else(|| ArtifactMiss::BadPath(path.to_string()))?;
        parsed
            .resolve(artifact)
            .cloned()
            .ok_or_else(|| ArtifactMiss::MissingPath {
                node: node_id.to_string(),
                path: path.to_string(),
            })
    }

    /// Number of stored artifacts
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// True when nothing has completed yet
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_resolve() {
        let mut store = ArtifactStore::new();
        store.insert("t", json!({ "payload": { "rows": [{ "name": "ada" }] } }));

        assert_eq!(
            store.resolve("t", "payload.rows[0].name").unwrap(),
            json!("ada")
        );
        assert_eq!(store.resolve("t", "").unwrap()["payload"]["rows"][0]["name"], "ada");
    }

    #[test]
    fn test_misses_are_classified() {
        let mut store = ArtifactStore::new();
        store.insert("t", json!({ "a": 1 }));

        assert_eq!(
            store.resolve("ghost", "a").unwrap_err(),
            ArtifactMiss::UnknownNode("ghost".into())
        );
        assert_eq!(
            store.resolve("t", "a[").unwrap_err(),
            ArtifactMiss::BadPath("a[".into())
        );
        assert!(matches!(
            store.resolve("t", "b.c").unwrap_err(),
            ArtifactMiss::MissingPath { .. }
        ));
    }

    #[test]
    fn test_reinsert_replaces() {
        let mut store = ArtifactStore::new();
        store.insert("t", json!(1));
        store.insert("t", json!(2));
        assert_eq!(store.get("t"), Some(&json!(2)));
        assert_eq!(store.len(), 1);
    }
}
