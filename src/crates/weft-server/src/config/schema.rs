//! Configuration schema for the weft server

use serde::{Deserialize, Serialize};

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeftConfig {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Database location
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Dispatcher tuning
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Queue, heartbeat, and streaming tuning
    #[serde(default)]
    pub queue: QueueConfig,

    /// Organization quotas enforced at admission
    #[serde(default)]
    pub quotas: QuotaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8420,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path (relative to ~/.weft or absolute)
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "weft.db".to_string(),
        }
    }
}

/// Dispatcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Concurrent node evaluations per run
    pub max_in_flight: usize,
    /// Wall-clock cap on a whole run, in seconds
    pub run_deadline_secs: u64,
    /// Large fan-out warning threshold for the validator
    pub large_fan_out_threshold: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            run_deadline_secs: 15 * 60,
            large_fan_out_threshold: 10,
        }
    }
}

/// Queue, heartbeat, and streaming tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds between queue health probes
    pub health_interval_secs: u64,
    /// Probe latency above which health degrades to warn, in milliseconds
    pub warn_latency_ms: u64,
    /// Seconds before an unacked queue entry is redelivered
    pub visibility_timeout_secs: u64,
    /// Seconds a worker heartbeat stays fresh
    pub heartbeat_ttl_secs: u64,
    /// Live event stream buffer size before the consumer is dropped
    pub live_buffer: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            health_interval_secs: 30,
            warn_latency_ms: 250,
            visibility_timeout_secs: 60,
            heartbeat_ttl_secs: 90,
            live_buffer: 256,
        }
    }
}

/// Organization quotas enforced at admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Runs admitted per hour
    pub max_runs_per_hour: u32,
    /// In-flight runs touching one connector
    pub max_connector_in_flight: u32,
    /// API-call usage budget per hour
    pub max_api_calls_per_hour: u64,
    /// Token usage budget per hour
    pub max_tokens_per_hour: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_runs_per_hour: 1000,
            max_connector_in_flight: 32,
            max_api_calls_per_hour: 100_000,
            max_tokens_per_hour: 2_000_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter (overridden by RUST_LOG)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
