//! Organization quotas
//!
//! The admission pipeline consumes quota decisions through the
//! [`QuotaService`] trait; billing systems plug in their own
//! implementation. The in-memory default enforces the configured limits
//! with a sliding one-hour window.

use crate::config::QuotaConfig;
use crate::error::AdmissionError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Quota decisions consumed at admission time
pub trait QuotaService: Send + Sync {
    /// Organization-wide execution quota
    fn check_execution_quota(&self) -> Result<(), AdmissionError>;

    /// Per-connector in-flight cap, for every connector the run touches
    fn check_connector_concurrency(&self, connectors: &[String]) -> Result<(), AdmissionError>;

    /// Cross-cutting usage quotas (API calls, tokens)
    fn check_usage_quotas(&self) -> Result<(), AdmissionError>;

    /// Record an admitted run and its connectors
    fn record_admission(&self, connectors: &[String]);

    /// Release a finished run's connector slots
    fn release_run(&self, connectors: &[String]);

    /// Account usage reported by connector diagnostics
    fn add_usage(&self, api_calls: u64, tokens: u64);
}

struct UsageWindow {
    window_start: DateTime<Utc>,
    api_calls: u64,
    tokens: u64,
}

/// Config-driven in-memory quota enforcement
pub struct InMemoryQuotaService {
    config: QuotaConfig,
    admissions: Mutex<VecDeque<DateTime<Utc>>>,
    connector_in_flight: Mutex<HashMap<String, u32>>,
    usage: Mutex<UsageWindow>,
}

impl InMemoryQuotaService {
    /// Service enforcing the configured limits
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            admissions: Mutex::new(VecDeque::new()),
            connector_in_flight: Mutex::new(HashMap::new()),
            usage: Mutex::new(UsageWindow {
                window_start: Utc::now(),
                api_calls: 0,
                tokens: 0,
            }),
        }
    }

    fn prune_admissions(admissions: &mut VecDeque<DateTime<Utc>>) {
        let cutoff = Utc::now() - ChronoDuration::hours(1);
        while admissions.front().is_some_and(|t| *t < cutoff) {
            admissions.pop_front();
        }
    }

    fn roll_usage_window(usage: &mut UsageWindow) {
        if Utc::now().signed_duration_since(usage.window_start) >= ChronoDuration::hours(1) {
            usage.window_start = Utc::now();
            usage.api_calls = 0;
            usage.tokens = 0;
        }
    }
}

impl QuotaService for InMemoryQuotaService {
    fn check_execution_quota(&self) -> Result<(), AdmissionError> {
        let mut admissions = self.admissions.lock();
        Self::prune_admissions(&mut admissions);
        if admissions.len() as u32 >= self.config.max_runs_per_hour {
            let resets_at = admissions
                .front()
                .map(|oldest| *oldest + ChronoDuration::hours(1))
                .unwrap_or_else(|| Utc::now() + ChronoDuration::hours(1));
            return Err(AdmissionError::ExecutionQuotaExceeded { resets_at });
        }
        Ok(())
    }

    fn check_connector_concurrency(&self, connectors: &[String]) -> Result<(), AdmissionError> {
        let in_flight = self.connector_in_flight.lock();
        for connector in connectors {
            let current = in_flight.get(connector).copied().unwrap_or(0);
            if current >= self.config.max_connector_in_flight {
                return Err(AdmissionError::ConnectorConcurrencyExceeded {
                    connector: connector.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_usage_quotas(&self) -> Result<(), AdmissionError> {
        let mut usage = self.usage.lock();
        Self::roll_usage_window(&mut usage);
        if usage.api_calls >= self.config.max_api_calls_per_hour {
            return Err(AdmissionError::UsageQuotaExceeded {
                quota_type: "api_calls".to_string(),
            });
        }
        if usage.tokens >= self.config.max_tokens_per_hour {
            return Err(AdmissionError::UsageQuotaExceeded {
                quota_type: "tokens".to_string(),
            });
        }
        Ok(())
    }

    fn record_admission(&self, connectors: &[String]) {
        self.admissions.lock().push_back(Utc::now());
        let mut in_flight = self.connector_in_flight.lock();
        for connector in connectors {
            *in_flight.entry(connector.clone()).or_default() += 1;
        }
    }

    fn release_run(&self, connectors: &[String]) {
        let mut in_flight = self.connector_in_flight.lock();
        for connector in connectors {
            if let Some(count) = in_flight.get_mut(connector) {
                *count = count.saturating_sub(1);
            }
        }
    }

    fn add_usage(&self, api_calls: u64, tokens: u64) {
        let mut usage = self.usage.lock();
        Self::roll_usage_window(&mut usage);
        usage.api_calls += api_calls;
        usage.tokens += tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(max_runs: u32, max_in_flight: u32) -> InMemoryQuotaService {
        InMemoryQuotaService::new(QuotaConfig {
            max_runs_per_hour: max_runs,
            max_connector_in_flight: max_in_flight,
            max_api_calls_per_hour: 10,
            max_tokens_per_hour: 100,
        })
    }

    #[test]
    fn test_execution_quota_trips_with_reset_time() {
        let quotas = service(2, 10);
        quotas.record_admission(&[]);
        quotas.record_admission(&[]);

        match quotas.check_execution_quota() {
            Err(AdmissionError::ExecutionQuotaExceeded { resets_at }) => {
                assert!(resets_at > Utc::now());
            }
            other => panic!("expected quota exceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_connector_concurrency_releases() {
        let quotas = service(100, 1);
        let slack = vec!["slack".to_string()];

        quotas.check_connector_concurrency(&slack).unwrap();
        quotas.record_admission(&slack);
        assert!(matches!(
            quotas.check_connector_concurrency(&slack),
            Err(AdmissionError::ConnectorConcurrencyExceeded { connector }) if connector == "slack"
        ));

        quotas.release_run(&slack);
        quotas.check_connector_concurrency(&slack).unwrap();
    }

    #[test]
    fn test_usage_quota_by_type() {
        let quotas = service(100, 10);
        quotas.add_usage(10, 0);
        assert!(matches!(
            quotas.check_usage_quotas(),
            Err(AdmissionError::UsageQuotaExceeded { quota_type }) if quota_type == "api_calls"
        ));

        let quotas = service(100, 10);
        quotas.add_usage(0, 100);
        assert!(matches!(
            quotas.check_usage_quotas(),
            Err(AdmissionError::UsageQuotaExceeded { quota_type }) if quota_type == "tokens"
        ));
    }

    #[test]
    fn test_within_limits_passes() {
        let quotas = service(10, 10);
        quotas.record_admission(&["http".to_string()]);
        quotas.check_execution_quota().unwrap();
        quotas
            .check_connector_concurrency(&["http".to_string()])
            .unwrap();
        quotas.check_usage_quotas().unwrap();
    }
}
