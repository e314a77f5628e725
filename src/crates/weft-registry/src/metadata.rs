//! Metadata resolver
//!
//! Calls connector `describe` endpoints to discover structural hints (sheet
//! tabs, columns, sample rows) for a node at its current parameters. Results
//! feed `metadata`/`outputMetadata` on the node and are strictly advisory:
//! failure degrades to an empty hint set and a diagnostic, never an error to
//! the caller. Identical requests inside the TTL window are served from
//! cache, which also implements the per-node debounce.

use crate::runtime::RuntimeRegistry;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use weft_graph::MetadataHints;

/// Default cache/debounce window
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Outcome of one resolver call
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    /// Discovered hints; empty on failure
    pub hints: MetadataHints,
    /// Served from the TTL cache
    pub cache_hit: bool,
    /// Non-fatal diagnostic when discovery failed
    pub diagnostic: Option<String>,
}

struct CacheEntry {
    at: Instant,
    hints: MetadataHints,
    diagnostic: Option<String>,
}

/// TTL-cached describe resolver over the runtime registry
pub struct MetadataResolver {
    runtimes: Arc<RuntimeRegistry>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl MetadataResolver {
    /// Resolver with the default 5 s window
    pub fn new(runtimes: Arc<RuntimeRegistry>) -> Self {
        Self::with_ttl(runtimes, DEFAULT_TTL)
    }

    /// Resolver with a custom window
    pub fn with_ttl(runtimes: Arc<RuntimeRegistry>, ttl: Duration) -> Self {
        Self {
            runtimes,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Discover hints for `(app, operation)` at the given parameters
    pub async fn resolve(
        &self,
        app: &str,
        operation: &str,
        params: &Map<String, Value>,
    ) -> ResolvedMetadata {
        let key = cache_key(app, operation, params);

        if let Some(entry) = self.fresh_entry(&key) {
            return ResolvedMetadata {
                hints: entry.0,
                cache_hit: true,
                diagnostic: entry.1,
            };
        }

        let (hints, diagnostic) = match self.runtimes.get(app) {
            None => (
                MetadataHints::default(),
                Some(format!("no runtime registered for connector '{}'", app)),
            ),
            Some(runtime) => match runtime.describe(operation, params).await {
                Ok(hints) => {
                    debug!(app, operation, "Metadata describe succeeded");
                    (hints, None)
                }
                Err(err) => {
                    warn!(app, operation, error = %err, "Metadata describe failed");
                    (
                        MetadataHints::default(),
                        Some(format!("describe failed: {}", err)),
                    )
                }
            },
        };

        self.cache.lock().insert(
            key,
            CacheEntry {
                at: Instant::now(),
                hints: hints.clone(),
                diagnostic: diagnostic.clone(),
            },
        );

        ResolvedMetadata {
            hints,
            cache_hit: false,
            diagnostic,
        }
    }

    fn fresh_entry(&self, key: &str) -> Option<(MetadataHints, Option<String>)> {
        let cache = self.cache.lock();
        let entry = cache.get(key)?;
        if entry.at.elapsed() <= self.ttl {
            Some((entry.hints.clone(), entry.diagnostic.clone()))
        } else {
            None
        }
    }

    /// Drop expired entries; called opportunistically by the server
    pub fn evict_expired(&self) {
        let mut cache = self.cache.lock();
        cache.retain(|_, entry| entry.at.elapsed() <= self.ttl);
    }
}

impl std::fmt::Debug for MetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataResolver")
            .field("ttl", &self.ttl)
            .field("entries", &self.cache.lock().len())
            .finish()
    }
}

fn cache_key(app: &str, operation: &str, params: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app.to_ascii_lowercase().as_bytes());
    hasher.update([0]);
    hasher.update(operation.to_ascii_lowercase().as_bytes());
    hasher.update([0]);
    // Map serialization is key-ordered, so equal params hash equally.
    hasher.update(Value::Object(params.clone()).to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OpRole;
    use crate::runtime::{
        ConnectorRuntime, InvocationOutcome, InvocationRequest, InvokeContext, InvokeError,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDescriber {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ConnectorRuntime for CountingDescriber {
        fn connector_id(&self) -> &str {
            "google-sheets"
        }

        fn supported_operations(&self) -> Vec<(String, OpRole)> {
            vec![("append-row".to_string(), OpRole::Action)]
        }

        async fn invoke(
            &self,
            _request: InvocationRequest,
            _ctx: &InvokeContext,
        ) -> Result<InvocationOutcome, InvokeError> {
            Ok(InvocationOutcome::default())
        }

        async fn describe(
            &self,
            _operation: &str,
            _params: &Map<String, Value>,
        ) -> Result<MetadataHints, InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(InvokeError::new(
                    crate::runtime::ErrorKind::Provider5xx,
                    "upstream down",
                ));
            }
            Ok(MetadataHints {
                columns: vec!["name".into(), "email".into()],
                tabs: vec!["Sheet1".into()],
                ..Default::default()
            })
        }
    }

    fn registry(fail: bool) -> (Arc<RuntimeRegistry>, Arc<CountingDescriber>) {
        let describer = Arc::new(CountingDescriber {
            calls: AtomicUsize::new(0),
            fail,
        });
        let mut registry = RuntimeRegistry::new();
        registry.register(describer.clone());
        (Arc::new(registry), describer)
    }

    fn params() -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("spreadsheetId".into(), json!("sheet-1"));
        params
    }

    #[tokio::test]
    async fn test_identical_requests_hit_cache() {
        let (registry, describer) = registry(false);
        let resolver = MetadataResolver::new(registry);

        let first = resolver.resolve("google-sheets", "append-row", &params()).await;
        assert!(!first.cache_hit);
        assert_eq!(first.hints.tabs, vec!["Sheet1"]);

        let second = resolver.resolve("google-sheets", "append-row", &params()).await;
        assert!(second.cache_hit);
        assert_eq!(describer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_params_miss_cache() {
        let (registry, describer) = registry(false);
        let resolver = MetadataResolver::new(registry);

        resolver.resolve("google-sheets", "append-row", &params()).await;
        let mut other = params();
        other.insert("tab".into(), json!("Q3"));
        resolver.resolve("google-sheets", "append-row", &other).await;
        assert_eq!(describer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_diagnostic() {
        let (registry, _) = registry(true);
        let resolver = MetadataResolver::new(registry);

        let resolved = resolver.resolve("google-sheets", "append-row", &params()).await;
        assert!(resolved.hints.is_empty());
        assert!(resolved.diagnostic.as_deref().unwrap().contains("describe failed"));
    }

    #[tokio::test]
    async fn test_unknown_runtime_degrades() {
        let (registry, _) = registry(false);
        let resolver = MetadataResolver::new(registry);

        let resolved = resolver.resolve("asana", "create-task", &params()).await;
        assert!(resolved.hints.is_empty());
        assert!(resolved.diagnostic.is_some());
    }

    #[tokio::test]
    async fn test_expired_entries_evicted() {
        let (registry, describer) = registry(false);
        let resolver = MetadataResolver::with_ttl(registry, Duration::from_millis(0));

        resolver.resolve("google-sheets", "append-row", &params()).await;
        resolver.evict_expired();
        resolver.resolve("google-sheets", "append-row", &params()).await;
        assert_eq!(describer.calls.load(Ordering::SeqCst), 2);
    }
}
