//! Engine error types

use thiserror::Error;
use weft_validate::ValidationReport;

/// Errors raised by the dispatch engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The authoritative pre-flight validation rejected the graph
    #[error("Graph failed validation with {} error(s)", .0.errors.len())]
    ValidationFailed(ValidationReport),

    /// The graph has no topological order (should be caught by validation)
    #[error("Graph is not a DAG")]
    NotADag,

    /// A node resolved no capability at execution time
    #[error("Node '{node}' resolves no capability: {reason}")]
    UnresolvedCapability { node: String, reason: String },

    /// No runtime is registered for a connector
    #[error("No runtime registered for connector '{0}'")]
    MissingRuntime(String),

    /// Internal invariant violation
    #[error("Internal engine error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
