//! Static validator for canonical workflow graphs
//!
//! [`validate`] is a pure function from a canonical graph and a capability
//! snapshot to a sorted report of errors and warnings. It performs no I/O and
//! is deterministic, so the editor can call it on every debounced edit and
//! the server can call it again, authoritatively, at run submission.
//!
//! Structural checks live in `graph_checks`, per-node semantic and schema
//! checks in `node_checks`. Issue paths are node-scoped JSON pointers
//! (`/nodes/{id}/params/{key}`) so the editor can attach banners precisely.

mod graph_checks;
pub mod issue;
mod node_checks;

pub use issue::{codes, Severity, ValidationIssue, ValidationReport};

use weft_graph::{ancestor_sets, WorkflowGraph};
use weft_registry::CatalogSnapshot;

/// Validator tuning knobs
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Outgoing-edge count above which `LARGE_FAN_OUT` warns
    pub large_fan_out_threshold: usize,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            large_fan_out_threshold: 10,
        }
    }
}

/// Validate a canonical graph against a capability snapshot
///
/// Never fails; problems come back as data. Errors block execution,
/// warnings do not. Both lists are stable-sorted by `(node_id, path, code)`.
pub fn validate(
    graph: &WorkflowGraph,
    snapshot: &CatalogSnapshot,
    options: &ValidateOptions,
) -> ValidationReport {
    let mut issues = graph_checks::check(graph, snapshot);

    // The ancestor relation is only defined on acyclic graphs; ref checks
    // degrade to existence checks when a cycle error is present.
    let ancestors = ancestor_sets(graph);
    issues.extend(node_checks::check(
        graph,
        snapshot,
        options,
        ancestors.as_ref(),
    ));

    ValidationReport::from_issues(issues)
}
