//! Per-connector concurrency limits
//!
//! One counted semaphore per connector id, shared process-wide across every
//! run, seeded from the capability index's default caps. The dispatcher
//! acquires a permit before spawning a node's worker, so a saturated
//! connector blocks scheduling without holding a worker slot.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Permit cap for connectors the index does not know
const FALLBACK_PERMITS: u32 = 8;

/// Process-wide map of connector id to counting semaphore
pub struct ConnectorLimiter {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    caps: HashMap<String, u32>,
}

impl ConnectorLimiter {
    /// Limiter seeded with per-connector caps from the capability index
    pub fn new(caps: HashMap<String, u32>) -> Self {
        Self {
            semaphores: Mutex::new(HashMap::new()),
            caps,
        }
    }

    fn semaphore(&self, connector_id: &str) -> Arc<Semaphore> {
        let key = connector_id.to_ascii_lowercase();
        let mut semaphores = self.semaphores.lock();
        Arc::clone(semaphores.entry(key.clone()).or_insert_with(|| {
            let permits = self.caps.get(&key).copied().unwrap_or(FALLBACK_PERMITS);
            Arc::new(Semaphore::new(permits as usize))
        }))
    }

    /// Acquire a permit for one call to the connector, waiting if saturated
    pub async fn acquire(&self, connector_id: &str) -> OwnedSemaphorePermit {
        let semaphore = self.semaphore(connector_id);
        // The semaphore is never closed, so acquisition only fails if the
        // limiter itself is dropped mid-acquire.
        semaphore
            .acquire_owned()
            .await
            .expect("connector semaphore closed")
    }

    /// Permits currently available, for health surfaces
    pub fn available(&self, connector_id: &str) -> usize {
        self.semaphore(connector_id).available_permits()
    }
}

impl std::fmt::Debug for ConnectorLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorLimiter")
            .field("connectors", &self.caps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_come_from_caps() {
        let limiter = ConnectorLimiter::new(HashMap::from([("slack".to_string(), 2)]));
        let _one = limiter.acquire("slack").await;
        let _two = limiter.acquire("SLACK").await;
        assert_eq!(limiter.available("slack"), 0);
    }

    #[tokio::test]
    async fn test_release_on_drop() {
        let limiter = ConnectorLimiter::new(HashMap::from([("slack".to_string(), 1)]));
        {
            let _permit = limiter.acquire("slack").await;
            assert_eq!(limiter.available("slack"), 0);
        }
        assert_eq!(limiter.available("slack"), 1);
    }

    #[tokio::test]
    async fn test_unknown_connector_gets_fallback() {
        let limiter = ConnectorLimiter::new(HashMap::new());
        assert_eq!(limiter.available("mystery"), FALLBACK_PERMITS as usize);
    }

    #[tokio::test]
    async fn test_saturated_connector_blocks_until_release() {
        let limiter = Arc::new(ConnectorLimiter::new(HashMap::from([(
            "slack".to_string(),
            1,
        )])));
        let permit = limiter.acquire("slack").await;

        let waiter = Arc::clone(&limiter);
        let handle = tokio::spawn(async move {
            let _second = waiter.acquire("slack").await;
        });

        // The waiter cannot finish until the first permit drops.
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        drop(permit);
        handle.await.unwrap();
    }
}
