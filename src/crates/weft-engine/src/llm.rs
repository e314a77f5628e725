//! LLM parameter mapping
//!
//! An `llm(...)` parameter asks a model to produce the value from the
//! upstream payload at resolution time. The engine talks to whatever mapping
//! service the host wires in through [`LlmMapper`], and caches responses by a
//! hash of `(prompt, model, upstream snapshot)` for the parameter's
//! `cache_ttl_sec`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_graph::LlmParam;
use weft_registry::{ErrorKind, InvokeError};

/// One mapping request to the LLM service
#[derive(Debug, Clone)]
pub struct LlmMapRequest {
    /// The mapping parameter as authored on the node
    pub param: LlmParam,
    /// Summary of the upstream payload the prompt runs against
    pub upstream: Value,
}

/// The host's LLM mapping service
#[async_trait]
pub trait LlmMapper: Send + Sync {
    /// Produce the mapped value
    async fn map(&self, request: &LlmMapRequest) -> Result<Value, InvokeError>;
}

/// Mapper used when the host wires no LLM service in
///
/// Fails with a non-retryable validation error so runs using `llm` values
/// surface a clear misconfiguration instead of hanging.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredLlmMapper;

#[async_trait]
impl LlmMapper for UnconfiguredLlmMapper {
    async fn map(&self, request: &LlmMapRequest) -> Result<Value, InvokeError> {
        Err(InvokeError::new(
            ErrorKind::Validation,
            format!(
                "no LLM mapping service configured (model '{}')",
                request.param.model
            ),
        ))
    }
}

struct CacheEntry {
    at: Instant,
    ttl: Duration,
    value: Value,
}

/// TTL cache over a [`LlmMapper`]
pub struct CachedLlmMapper {
    inner: Arc<dyn LlmMapper>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl CachedLlmMapper {
    /// Wrap a mapping service with the response cache
    pub fn new(inner: Arc<dyn LlmMapper>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one `llm` parameter; returns the value and whether it was a
    /// cache hit
    pub async fn resolve(
        &self,
        param: &LlmParam,
        upstream: &Value,
    ) -> Result<(Value, bool), InvokeError> {
        let ttl = Duration::from_secs(param.cache_ttl_sec);
        let key = cache_key(param, upstream);

        if !ttl.is_zero() {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                if entry.at.elapsed() <= entry.ttl {
                    return Ok((entry.value.clone(), true));
                }
            }
        }

        let request = LlmMapRequest {
            param: param.clone(),
            upstream: upstream.clone(),
        };
        let value = self.inner.map(&request).await?;

        if !ttl.is_zero() {
            self.cache.lock().insert(
                key,
                CacheEntry {
                    at: Instant::now(),
                    ttl,
                    value: value.clone(),
                },
            );
        }
        Ok((value, false))
    }

    /// Drop expired entries
    pub fn evict_expired(&self) {
        self.cache
            .lock()
            .retain(|_, entry| entry.at.elapsed() <= entry.ttl);
    }
}

impl std::fmt::Debug for CachedLlmMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedLlmMapper")
            .field("entries", &self.cache.lock().len())
            .finish()
    }
}

fn cache_key(param: &LlmParam, upstream: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(param.prompt.as_bytes());
    hasher.update([0]);
    hasher.update(param.model.as_bytes());
    hasher.update([0]);
    hasher.update(upstream.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMapper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmMapper for CountingMapper {
        async fn map(&self, request: &LlmMapRequest) -> Result<Value, InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "mapped": request.upstream.clone() }))
        }
    }

    fn param(ttl: u64) -> LlmParam {
        LlmParam {
            prompt: "extract the email".into(),
            model: "small".into(),
            provider: "anthropic".into(),
            temperature: 0.0,
            max_tokens: 256,
            cache_ttl_sec: ttl,
            json_schema: None,
            system: None,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let inner = Arc::new(CountingMapper {
            calls: AtomicUsize::new(0),
        });
        let mapper = CachedLlmMapper::new(inner.clone());
        let upstream = json!({ "email": "a@example.com" });

        let (_, hit) = mapper.resolve(&param(60), &upstream).await.unwrap();
        assert!(!hit);
        let (value, hit) = mapper.resolve(&param(60), &upstream).await.unwrap();
        assert!(hit);
        assert_eq!(value["mapped"]["email"], "a@example.com");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_upstream_misses() {
        let inner = Arc::new(CountingMapper {
            calls: AtomicUsize::new(0),
        });
        let mapper = CachedLlmMapper::new(inner.clone());

        mapper.resolve(&param(60), &json!({ "a": 1 })).await.unwrap();
        mapper.resolve(&param(60), &json!({ "a": 2 })).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let inner = Arc::new(CountingMapper {
            calls: AtomicUsize::new(0),
        });
        let mapper = CachedLlmMapper::new(inner.clone());
        let upstream = json!({});

        mapper.resolve(&param(0), &upstream).await.unwrap();
        mapper.resolve(&param(0), &upstream).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unconfigured_mapper_fails_cleanly() {
        let mapper = CachedLlmMapper::new(Arc::new(UnconfiguredLlmMapper));
        let err = mapper.resolve(&param(0), &json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.retryable);
    }
}
