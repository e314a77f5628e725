//! Error types for the capability registry

use thiserror::Error;

/// Errors raised by registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Catalog definition is malformed
    #[error("Invalid catalog definition: {0}")]
    InvalidDefinition(String),

    /// A runtime registered under a connector id the catalog does not know
    #[error("Runtime registered for unknown connector: {0}")]
    UnknownRuntimeConnector(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
