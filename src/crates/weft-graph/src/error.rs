//! Error types for graph operations

use thiserror::Error;

/// Errors that can occur during graph construction, diffing, and promotion
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph structure is invalid
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// The graph contains at least one cycle, so no topological order exists
    #[error("Graph contains a cycle involving nodes: {0:?}")]
    CycleDetected(Vec<String>),

    /// A referenced node does not exist in the graph
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Publishing a breaking revision without a migration plan
    #[error("Migration plan required: {0}")]
    MigrationPlanRequired(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
