//! Connector capability registry for weft
//!
//! - [`catalog`] - declarative connector/operation definitions and the
//!   built-in catalog
//! - [`index`] - immutable snapshot index with atomic refresh and the
//!   `(app, operation, role)` resolve contract
//! - [`runtime`] - the `ConnectorRuntime` trait every connector implements,
//!   plus the shared error classification
//! - [`metadata`] - TTL-cached describe resolver feeding advisory hints

pub mod catalog;
pub mod error;
pub mod index;
pub mod metadata;
pub mod runtime;

pub use catalog::{builtin_connectors, ConnectorDef, Lifecycle, OperationDef, OpRole};
pub use error::{RegistryError, Result};
pub use index::{CapabilityHandle, CapabilityIndex, CatalogSnapshot, ResolveMiss, RoleQuery};
pub use metadata::{MetadataResolver, ResolvedMetadata, DEFAULT_TTL};
pub use runtime::{
    CancelSignal, ConnectorRuntime, Credentials, ErrorKind, InvocationOutcome, InvocationRequest,
    InvokeContext, InvokeError, RuntimeRegistry,
};
