//! Worker heartbeats and fleet health
//!
//! Workers post a heartbeat with their role tags; the registry ages them out
//! after a TTL and summarizes fleet health for the admission layer and the
//! health endpoint. A fleet with no live execution worker cannot accept
//! runs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Role tags a worker can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    /// Pulls runs off the queue and dispatches them
    Execution,
    /// Evaluates cron triggers
    Scheduler,
    /// Fires delayed continuations
    Timer,
}

impl WorkerRole {
    /// Parse from the lowercase wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "execution" => Some(Self::Execution),
            "scheduler" => Some(Self::Scheduler),
            "timer" => Some(Self::Timer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Heartbeat {
    roles: Vec<WorkerRole>,
    at: DateTime<Utc>,
}

/// Fleet summary reported by the health surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    /// Workers with a fresh heartbeat
    pub healthy_workers: usize,
    /// At least one fresh execution worker exists
    pub has_execution_worker: bool,
    /// At least one fresh scheduler worker exists
    pub scheduler_healthy: bool,
    /// At least one fresh timer worker exists
    pub timer_healthy: bool,
    /// Age of the most recent heartbeat, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_age_secs: Option<i64>,
}

/// Registry of worker heartbeats
pub struct WorkerRegistry {
    heartbeats: Mutex<HashMap<String, Heartbeat>>,
    ttl: Duration,
}

impl WorkerRegistry {
    /// Registry where heartbeats stay fresh for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            heartbeats: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record a heartbeat for a worker
    pub fn record(&self, worker_id: impl Into<String>, roles: Vec<WorkerRole>) {
        self.heartbeats.lock().insert(
            worker_id.into(),
            Heartbeat {
                roles,
                at: Utc::now(),
            },
        );
    }

    fn is_fresh(&self, heartbeat: &Heartbeat) -> bool {
        let age = Utc::now().signed_duration_since(heartbeat.at);
        age.num_milliseconds() >= 0 && age.num_milliseconds() as u128 <= self.ttl.as_millis()
    }

    /// Current fleet summary
    pub fn summary(&self) -> FleetSummary {
        let heartbeats = self.heartbeats.lock();
        let fresh: Vec<&Heartbeat> = heartbeats
            .values()
            .filter(|hb| self.is_fresh(hb))
            .collect();

        let has_role = |role: WorkerRole| fresh.iter().any(|hb| hb.roles.contains(&role));
        let last_age = heartbeats
            .values()
            .map(|hb| Utc::now().signed_duration_since(hb.at).num_seconds())
            .min();

        FleetSummary {
            healthy_workers: fresh.len(),
            has_execution_worker: has_role(WorkerRole::Execution),
            scheduler_healthy: has_role(WorkerRole::Scheduler),
            timer_healthy: has_role(WorkerRole::Timer),
            last_heartbeat_age_secs: last_age,
        }
    }

    /// Drop heartbeats staler than the TTL
    pub fn evict_stale(&self) {
        let mut heartbeats = self.heartbeats.lock();
        let ttl = self.ttl;
        heartbeats.retain(|_, hb| {
            let age = Utc::now().signed_duration_since(hb.at);
            age.num_milliseconds() >= 0 && age.num_milliseconds() as u128 <= ttl.as_millis() * 2
        });
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.heartbeats.lock().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fleet_has_no_execution_worker() {
        let registry = WorkerRegistry::new(Duration::from_secs(90));
        let summary = registry.summary();
        assert_eq!(summary.healthy_workers, 0);
        assert!(!summary.has_execution_worker);
        assert!(summary.last_heartbeat_age_secs.is_none());
    }

    #[test]
    fn test_roles_tracked_independently() {
        let registry = WorkerRegistry::new(Duration::from_secs(90));
        registry.record("w1", vec![WorkerRole::Execution]);
        registry.record("w2", vec![WorkerRole::Scheduler, WorkerRole::Timer]);

        let summary = registry.summary();
        assert_eq!(summary.healthy_workers, 2);
        assert!(summary.has_execution_worker);
        assert!(summary.scheduler_healthy);
        assert!(summary.timer_healthy);
        assert_eq!(summary.last_heartbeat_age_secs, Some(0));
    }

    #[test]
    fn test_stale_heartbeats_ignored() {
        let registry = WorkerRegistry::new(Duration::from_millis(0));
        registry.record("w1", vec![WorkerRole::Execution]);
        std::thread::sleep(Duration::from_millis(5));
        let summary = registry.summary();
        assert_eq!(summary.healthy_workers, 0);
        assert!(!summary.has_execution_worker);
    }

    #[test]
    fn test_reheartbeat_refreshes() {
        let registry = WorkerRegistry::new(Duration::from_secs(90));
        registry.record("w1", vec![WorkerRole::Execution]);
        registry.record("w1", vec![WorkerRole::Execution, WorkerRole::Timer]);
        let summary = registry.summary();
        assert_eq!(summary.healthy_workers, 1);
        assert!(summary.timer_healthy);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(WorkerRole::parse("execution"), Some(WorkerRole::Execution));
        assert_eq!(WorkerRole::parse("TIMER"), Some(WorkerRole::Timer));
        assert_eq!(WorkerRole::parse("janitor"), None);
    }
}
