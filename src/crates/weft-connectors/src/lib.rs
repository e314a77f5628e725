//! Built-in connector runtimes for weft
//!
//! - [`core`] - the `core` control connector: triggers, branch/join, map,
//!   delay, noop
//! - [`http`] - the reqwest-backed `http.request` operation
//!
//! App connectors beyond these (Slack, Gmail, Sheets, ...) are external
//! SDKs the host registers itself; the capability index marks their
//! operations unimplemented until it does.

pub mod core;
pub mod http;

pub use crate::core::CoreConnector;
pub use crate::http::HttpConnector;

use std::sync::Arc;
use weft_registry::RuntimeRegistry;

/// Registry preloaded with the built-in runtimes
pub fn builtin_runtimes() -> RuntimeRegistry {
    let mut registry = RuntimeRegistry::new();
    registry.register(Arc::new(CoreConnector::new()));
    registry.register(Arc::new(HttpConnector::new()));
    registry
}
