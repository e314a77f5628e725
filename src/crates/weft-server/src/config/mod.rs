//! Server configuration: schema and layered loading

pub mod loader;
pub mod schema;

pub use loader::{resolve_database_path, ConfigLoader};
pub use schema::{
    DatabaseConfig, ExecutionConfig, LoggingConfig, QueueConfig, QuotaConfig, ServerConfig,
    WeftConfig,
};
