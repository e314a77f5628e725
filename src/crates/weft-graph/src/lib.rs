//! Canonical workflow graph model for weft
//!
//! This crate owns the shapes every other part of the platform agrees on:
//!
//! - [`node`] / [`graph`] - canonical nodes, edges, workflows, and revisions
//! - [`normalize`] - total normalization of user drafts into canonical graphs
//! - [`path`] - dotted/bracket value paths used by ref parameters
//! - [`topo`] - cycle detection and deterministic topological order
//! - [`diff`] - structural diff, breaking-change classification, and
//!   promotion gating
//!
//! The normalizer never fails and is idempotent; the validator (in
//! `weft-validate`) is the component that turns canonical-but-wrong graphs
//! into actionable errors.

pub mod diff;
pub mod error;
pub mod graph;
pub mod node;
pub mod normalize;
pub mod path;
pub mod topo;

pub use diff::{
    BreakingChange, BreakingChangeKind, CapabilityView, NoCapabilities, WorkflowDiff,
    check_promotion, diff_graphs, diff_with_metadata,
};
pub use error::{GraphError, Result};
pub use graph::{
    Edge, Environment, MigrationPlan, Revision, Workflow, WorkflowGraph, HANDLE_FALSE, HANDLE_TRUE,
};
pub use node::{
    CredentialSource, LlmParam, MetadataHints, Node, NodeAuth, NodeRole, ParamMap, ParamValue,
    Position,
};
pub use normalize::{canonicalize_app, normalize_draft, normalize_node};
pub use path::{PathSegment, ValuePath};
pub use topo::{ancestor_sets, cycles, topological_order};
