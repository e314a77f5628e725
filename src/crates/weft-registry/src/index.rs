//! Capability index
//!
//! An immutable [`CatalogSnapshot`] resolves `(app, operation, role)` lookups
//! for the validator and dispatcher. The mutable [`CapabilityIndex`] wrapper
//! holds the current snapshot behind an `RwLock<Arc<_>>`; refresh swaps the
//! Arc atomically so readers never observe torn state. The index is injected
//! wherever it is consumed, never reached through a global.

use crate::catalog::{ConnectorDef, OperationDef, OpRole};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use weft_graph::{CapabilityView, NodeRole};

/// Why a lookup missed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMiss {
    /// No connector with that id
    UnknownApp,
    /// Connector exists but has no such operation
    UnknownOperation,
    /// Operation exists under a different role
    RoleMismatch,
    /// Operation is declared but the worker fleet does not implement it
    NotImplemented,
}

impl std::fmt::Display for ResolveMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownApp => "unknown app",
            Self::UnknownOperation => "unknown operation",
            Self::RoleMismatch => "role mismatch",
            Self::NotImplemented => "not implemented by the worker fleet",
        };
        write!(f, "{}", s)
    }
}

/// Role constraint for a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleQuery {
    /// Must be an action
    Action,
    /// Must be a trigger
    Trigger,
    /// Either role matches
    Auto,
}

impl RoleQuery {
    /// The query a canonical node role implies
    pub fn for_node_role(role: NodeRole) -> Self {
        match OpRole::for_node_role(role) {
            OpRole::Action => Self::Action,
            OpRole::Trigger => Self::Trigger,
        }
    }

    fn matches(&self, role: OpRole) -> bool {
        match self {
            Self::Action => role == OpRole::Action,
            Self::Trigger => role == OpRole::Trigger,
            Self::Auto => true,
        }
    }
}

struct ConnectorEntry {
    def: ConnectorDef,
    /// Lowercase operation id → index into `def.operations`
    ops: HashMap<String, usize>,
    /// Lowercase ids of operations the current worker fleet implements
    implemented: HashSet<String>,
}

/// A resolved capability: one operation of one connector
///
/// Handles stay valid for the lifetime of the snapshot they came from;
/// consumers cache them until a refresh event replaces the snapshot.
#[derive(Clone)]
pub struct CapabilityHandle {
    entry: Arc<ConnectorEntry>,
    op_index: usize,
}

impl CapabilityHandle {
    /// The connector definition
    pub fn connector(&self) -> &ConnectorDef {
        &self.entry.def
    }

    /// The operation definition
    pub fn operation(&self) -> &OperationDef {
        &self.entry.def.operations[self.op_index]
    }
}

impl std::fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("connector", &self.entry.def.id)
            .field("operation", &self.operation().id)
            .finish()
    }
}

/// Immutable catalog snapshot
pub struct CatalogSnapshot {
    connectors: HashMap<String, Arc<ConnectorEntry>>,
    built_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    /// Build a snapshot from connector definitions and the set of
    /// `(connector, operation)` pairs the worker fleet implements
    pub fn build(defs: Vec<ConnectorDef>, implemented: &HashSet<(String, String)>) -> Self {
        let mut connectors = HashMap::new();
        for def in defs {
            let key = def.id.to_ascii_lowercase();
            let ops = def
                .operations
                .iter()
                .enumerate()
                .map(|(i, op)| (op.id.to_ascii_lowercase(), i))
                .collect();
            let implemented_ops = def
                .operations
                .iter()
                .filter(|op| {
                    implemented.contains(&(key.clone(), op.id.to_ascii_lowercase()))
                })
                .map(|op| op.id.to_ascii_lowercase())
                .collect();
            connectors.insert(
                key,
                Arc::new(ConnectorEntry {
                    def,
                    ops,
                    implemented: implemented_ops,
                }),
            );
        }
        Self {
            connectors,
            built_at: Utc::now(),
        }
    }

    /// Build a snapshot where every declared operation counts as implemented
    ///
    /// Test and single-process deployments use this; multi-fleet deployments
    /// pass the real support set to [`CatalogSnapshot::build`].
    pub fn build_fully_implemented(defs: Vec<ConnectorDef>) -> Self {
        let implemented = defs
            .iter()
            .flat_map(|def| {
                def.operations.iter().map(|op| {
                    (
                        def.id.to_ascii_lowercase(),
                        op.id.to_ascii_lowercase(),
                    )
                })
            })
            .collect();
        Self::build(defs, &implemented)
    }

    /// When this snapshot was built
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Resolve an `(app, operation, role)` triple to a capability handle
    ///
    /// App and operation match case-insensitively; the role must match
    /// exactly unless the query is [`RoleQuery::Auto`].
    pub fn resolve(
        &self,
        app: &str,
        operation: &str,
        role: RoleQuery,
    ) -> Result<CapabilityHandle, ResolveMiss> {
        let entry = self
            .connectors
            .get(&app.to_ascii_lowercase())
            .ok_or(ResolveMiss::UnknownApp)?;
        let op_key = operation.to_ascii_lowercase();
        let &op_index = entry.ops.get(&op_key).ok_or(ResolveMiss::UnknownOperation)?;
        let op = &entry.def.operations[op_index];
        if !role.matches(op.role) {
            return Err(ResolveMiss::RoleMismatch);
        }
        if !entry.implemented.contains(&op_key) {
            return Err(ResolveMiss::NotImplemented);
        }
        Ok(CapabilityHandle {
            entry: Arc::clone(entry),
            op_index,
        })
    }

    /// Connector definition by id, regardless of runtime support
    pub fn connector(&self, app: &str) -> Option<&ConnectorDef> {
        self.connectors
            .get(&app.to_ascii_lowercase())
            .map(|e| &e.def)
    }

    /// All connector definitions, sorted by id
    pub fn connectors(&self) -> Vec<&ConnectorDef> {
        let mut defs: Vec<&ConnectorDef> = self.connectors.values().map(|e| &e.def).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// True when the worker fleet implements the operation
    pub fn is_implemented(&self, app: &str, operation: &str) -> bool {
        self.connectors
            .get(&app.to_ascii_lowercase())
            .map(|e| e.implemented.contains(&operation.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Default concurrency cap per connector id, for the dispatcher's
    /// per-connector semaphores
    pub fn concurrency_caps(&self) -> HashMap<String, u32> {
        self.connectors
            .values()
            .map(|e| (e.def.id.clone(), e.def.default_concurrency))
            .collect()
    }
}

impl std::fmt::Debug for CatalogSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogSnapshot")
            .field("connectors", &self.connectors.len())
            .field("built_at", &self.built_at)
            .finish()
    }
}

impl CapabilityView for CatalogSnapshot {
    fn required_params(&self, app: &str, operation: &str) -> Option<Vec<String>> {
        let connector = self.connector(app)?;
        connector.operation(operation).map(OperationDef::required_params)
    }

    fn output_field_type(&self, app: &str, operation: &str, field: &str) -> Option<String> {
        self.connector(app)?
            .operation(operation)?
            .output_field_type(field)
    }
}

/// Mutable holder of the current catalog snapshot
///
/// Readers take a cheap `Arc` clone and keep using it for the duration of one
/// validation or run; `refresh` swaps the pointer atomically.
pub struct CapabilityIndex {
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl CapabilityIndex {
    /// Create an index over an initial snapshot
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replace the snapshot; in-flight readers keep the one they hold
    pub fn refresh(&self, snapshot: CatalogSnapshot) {
        let mut guard = self.snapshot.write();
        *guard = Arc::new(snapshot);
        tracing::info!("Capability index refreshed");
    }
}

impl std::fmt::Debug for CapabilityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityIndex")
            .field("snapshot", &*self.snapshot.read())
            .finish()
    }
}
